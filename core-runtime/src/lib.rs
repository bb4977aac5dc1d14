//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the storage client core:
//! - Logging and tracing setup
//! - Client configuration with fail-fast bridge validation
//! - Event bus for auth and storage notifications
//!
//! Every other core crate depends on this one for its configuration types and
//! the [`EventBus`](events::EventBus).

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{AuthEndpoints, ClientConfig, ClientConfigBuilder, LoginEncoding, RefreshMode};
pub use error::{Error, Result};
pub use events::{AuthEvent, CoreEvent, EventBus, EventStream, StorageEvent};

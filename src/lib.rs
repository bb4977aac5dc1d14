//! Workspace placeholder crate.
//!
//! Exposes the `desktop-shims` feature so host applications can depend on
//! `storage-client-workspace` and get the full client (`core-service` with
//! `reqwest` and keychain defaults) without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;

//! # Authentication Module
//!
//! Bearer-token session handling for the storage service.
//!
//! ## Overview
//!
//! [`AuthenticatedClient`] attaches the stored access token to every
//! outbound request. When the service answers 401 it exchanges the refresh
//! token once, stores the new tokens and replays the request. If the exchange
//! is impossible or fails, the credential store is cleared, a
//! `ReauthRequired` event is emitted and the caller receives the original
//! 401 error.
//!
//! ## Features
//!
//! - Bearer injection from a pluggable [`CredentialStore`]
//! - Refresh-and-replay-once on 401, per request or single-flight
//! - Cancellation and per-request timeouts
//! - Unverified JWT decoding for display identity
//! - Login, signup, logout and session restore via [`SessionManager`]

pub mod client;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod refresh;
pub mod session;
pub mod types;

pub use client::{classify, AuthenticatedClient, PendingRequest};
pub use credentials::{CredentialStore, InMemoryCredentialStore, SecureCredentialStore};
pub use error::{AuthError, Result};
pub use identity::{decode_unverified_claims, UnverifiedClaims, UserIdentity};
pub use refresh::{RefreshOutcome, TokenRefresher};
pub use session::{validate_signup, SessionManager, SignupResponse};
pub use types::{AccessToken, RefreshToken, RequestPhase, TokenPair};

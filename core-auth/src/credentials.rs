//! Credential Store
//!
//! Three independent string slots shared by the authenticated client and the
//! login/logout flows:
//!
//! | Slot | Key |
//! |------|-----|
//! | access token | `access_token` |
//! | refresh token | `refresh_token` |
//! | last signed-in email | `user_email` |
//!
//! Each read or write of a slot is atomic; concurrent writers are
//! last-writer-wins. Two implementations ship:
//!
//! - [`SecureCredentialStore`] persists through a host [`SecureStore`]
//!   (keychain on desktop), surviving restarts.
//! - [`InMemoryCredentialStore`] keeps everything in process memory.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::credentials::{CredentialStore, SecureCredentialStore};
//! use core_auth::{AccessToken, RefreshToken, TokenPair};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let credentials = SecureCredentialStore::new(secure_store);
//!
//! let pair = TokenPair::new(AccessToken::new("A1"), Some(RefreshToken::new("R1")));
//! credentials.store_tokens(&pair).await?;
//! assert!(credentials.access_token().await?.is_some());
//!
//! credentials.clear().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{AccessToken, RefreshToken, TokenPair};
use async_trait::async_trait;
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_EMAIL_KEY: &str = "user_email";

/// Get/set/clear access to the session credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn access_token(&self) -> Result<Option<AccessToken>>;

    async fn refresh_token(&self) -> Result<Option<RefreshToken>>;

    async fn user_email(&self) -> Result<Option<String>>;

    async fn set_access_token(&self, token: &AccessToken) -> Result<()>;

    async fn set_refresh_token(&self, token: &RefreshToken) -> Result<()>;

    async fn set_user_email(&self, email: &str) -> Result<()>;

    /// Remove all three slots.
    async fn clear(&self) -> Result<()>;

    /// Store the access token, and the refresh token when one is present.
    /// An absent refresh token leaves the stored one untouched.
    async fn store_tokens(&self, tokens: &TokenPair) -> Result<()> {
        self.set_access_token(&tokens.access_token).await?;
        if let Some(refresh_token) = &tokens.refresh_token {
            self.set_refresh_token(refresh_token).await?;
        }
        Ok(())
    }
}

/// Credential store backed by a host [`SecureStore`].
#[derive(Clone)]
pub struct SecureCredentialStore {
    secure_store: Arc<dyn SecureStore>,
}

impl SecureCredentialStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        debug!("Initializing SecureCredentialStore");
        Self { secure_store }
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        let bytes = self.secure_store.get_secret(key).await.map_err(|e| {
            warn!(key = key, error = %e, "Failed to read credential");
            AuthError::SecureStorageUnavailable(e.to_string())
        })?;

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        match String::from_utf8(bytes) {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            Ok(_) => Ok(None),
            Err(_) => {
                warn!(key = key, "Stored credential is not valid UTF-8, discarding");
                let _ = self.secure_store.delete_secret(key).await;
                Ok(None)
            }
        }
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.secure_store
            .set_secret(key, value.as_bytes())
            .await
            .map_err(|e| {
                warn!(key = key, error = %e, "Failed to write credential");
                AuthError::SecureStorageUnavailable(e.to_string())
            })
    }
}

#[async_trait]
impl CredentialStore for SecureCredentialStore {
    async fn access_token(&self) -> Result<Option<AccessToken>> {
        Ok(self.read(ACCESS_TOKEN_KEY).await?.map(AccessToken::new))
    }

    async fn refresh_token(&self) -> Result<Option<RefreshToken>> {
        Ok(self.read(REFRESH_TOKEN_KEY).await?.map(RefreshToken::new))
    }

    async fn user_email(&self) -> Result<Option<String>> {
        self.read(USER_EMAIL_KEY).await
    }

    async fn set_access_token(&self, token: &AccessToken) -> Result<()> {
        self.write(ACCESS_TOKEN_KEY, token.as_str()).await
    }

    async fn set_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        self.write(REFRESH_TOKEN_KEY, token.as_str()).await
    }

    async fn set_user_email(&self, email: &str) -> Result<()> {
        self.write(USER_EMAIL_KEY, email).await
    }

    async fn clear(&self) -> Result<()> {
        // attempt every slot even if one delete fails
        let mut first_error = None;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_EMAIL_KEY] {
            if let Err(e) = self.secure_store.delete_secret(key).await {
                warn!(key = key, error = %e, "Failed to delete credential");
                first_error.get_or_insert(AuthError::SecureStorageUnavailable(e.to_string()));
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("Credentials cleared");
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Slots {
    access_token: Option<AccessToken>,
    refresh_token: Option<RefreshToken>,
    user_email: Option<String>,
}

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    slots: RwLock<Slots>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, mostly for tests and demos.
    pub fn with_tokens(access_token: &str, refresh_token: Option<&str>) -> Self {
        Self {
            slots: RwLock::new(Slots {
                access_token: Some(AccessToken::new(access_token)),
                refresh_token: refresh_token.map(RefreshToken::new),
                user_email: None,
            }),
        }
    }

    /// True when no slot holds a value.
    pub async fn is_empty(&self) -> bool {
        let slots = self.slots.read().await;
        slots.access_token.is_none() && slots.refresh_token.is_none() && slots.user_email.is_none()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn access_token(&self) -> Result<Option<AccessToken>> {
        Ok(self.slots.read().await.access_token.clone())
    }

    async fn refresh_token(&self) -> Result<Option<RefreshToken>> {
        Ok(self.slots.read().await.refresh_token.clone())
    }

    async fn user_email(&self) -> Result<Option<String>> {
        Ok(self.slots.read().await.user_email.clone())
    }

    async fn set_access_token(&self, token: &AccessToken) -> Result<()> {
        self.slots.write().await.access_token = Some(token.clone());
        Ok(())
    }

    async fn set_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        self.slots.write().await.refresh_token = Some(token.clone());
        Ok(())
    }

    async fn set_user_email(&self, email: &str) -> Result<()> {
        self.slots.write().await.user_email = Some(email.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.slots.write().await = Slots::default();
        Ok(())
    }

    async fn store_tokens(&self, tokens: &TokenPair) -> Result<()> {
        let mut slots = self.slots.write().await;
        slots.access_token = Some(tokens.access_token.clone());
        if let Some(refresh_token) = &tokens.refresh_token {
            slots.refresh_token = Some(refresh_token.clone());
        }
        Ok(())
    }
}

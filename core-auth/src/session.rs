//! Sign-in lifecycle on top of [`AuthenticatedClient`].

use crate::client::AuthenticatedClient;
use crate::error::{AuthError, Result};
use crate::identity::UserIdentity;
use crate::types::TokenPair;
use bridge_traits::HttpRequest;
use core_runtime::config::{AuthEndpoints, LoginEncoding};
use core_runtime::events::{AuthEvent, CoreEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// Minimum password length accepted by the service.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignupRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

/// Reply of the signup endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
}

pub struct SessionManager {
    client: Arc<AuthenticatedClient>,
    endpoints: AuthEndpoints,
    login_encoding: LoginEncoding,
    current: RwLock<Option<UserIdentity>>,
}

impl SessionManager {
    pub fn new(
        client: Arc<AuthenticatedClient>,
        endpoints: AuthEndpoints,
        login_encoding: LoginEncoding,
    ) -> Self {
        Self {
            client,
            endpoints,
            login_encoding,
            current: RwLock::new(None),
        }
    }

    pub fn client(&self) -> &Arc<AuthenticatedClient> {
        &self.client
    }

    /// Rebuild the identity from stored credentials, typically at start-up.
    ///
    /// Returns `None` when no access token is stored. Unreadable storage is
    /// treated the same way.
    pub async fn restore(&self) -> Option<UserIdentity> {
        let credentials = self.client.credentials();

        let token = match credentials.access_token().await {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => return None,
            Err(e) => {
                warn!(error = %e, "Stored credentials unreadable, starting signed out");
                return None;
            }
        };
        let email = credentials.user_email().await.ok().flatten();

        let identity = UserIdentity::from_credentials(&token, email);
        *self.current.write().await = Some(identity.clone());
        info!(user_id = ?identity.user_id, "Session restored");
        Some(identity)
    }

    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn login(&self, email: &str, password: &str) -> Result<UserIdentity> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput(
                "email and password are required".to_string(),
            ));
        }

        let body = LoginRequest {
            username: email,
            password,
        };
        let request = HttpRequest::post(self.endpoints.login.clone());
        let request = match self.login_encoding {
            LoginEncoding::Json => request.json(&body),
            LoginEncoding::Form => request.form(&body),
        }
        .map_err(|e| AuthError::Serialization(e.to_string()))?;

        let response = match self.client.send_public(request).await {
            Ok(response) => response,
            Err(err) => {
                let _ = self.client.event_bus().emit(CoreEvent::Auth(AuthEvent::AuthError {
                    message: err.user_message(),
                    recoverable: err.is_recoverable(),
                }));
                return Err(err);
            }
        };

        let pair: TokenPair = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        if pair.access_token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "login response carried an empty access token".to_string(),
            ));
        }

        // a new sign-in never inherits the previous session's refresh token
        let credentials = self.client.credentials();
        credentials.clear().await?;
        credentials.store_tokens(&pair).await?;
        credentials.set_user_email(email).await?;

        let identity = UserIdentity::from_credentials(&pair.access_token, Some(email.to_string()));
        *self.current.write().await = Some(identity.clone());

        info!(user_id = ?identity.user_id, "Signed in");
        let _ = self.client.event_bus().emit(CoreEvent::Auth(AuthEvent::SignedIn {
            user_id: identity.user_id.clone(),
            email: identity.email.clone(),
        }));

        Ok(identity)
    }

    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<SignupResponse> {
        validate_signup(name, email, password)?;

        let request = HttpRequest::post(self.endpoints.signup.clone())
            .json(&SignupRequest {
                name: name.trim(),
                email: email.trim(),
                password,
            })
            .map_err(|e| AuthError::Serialization(e.to_string()))?;

        let response = self.client.send_public(request).await?;
        let reply: SignupResponse = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        info!(user_id = ?reply.user_id, "Account created");
        Ok(reply)
    }

    /// Drop all credentials and the cached identity.
    pub async fn logout(&self) -> Result<()> {
        let result = self.client.credentials().clear().await;
        *self.current.write().await = None;

        info!("Signed out");
        let _ = self
            .client
            .event_bus()
            .emit(CoreEvent::Auth(AuthEvent::SignedOut));

        result
    }

    /// Cached identity. Dropped once the credential store no longer holds
    /// an access token, e.g. after a failed refresh.
    pub async fn current_user(&self) -> Option<UserIdentity> {
        let cached = self.current.read().await.clone()?;

        match self.client.credentials().access_token().await {
            Ok(Some(token)) if !token.is_empty() => Some(cached),
            _ => {
                *self.current.write().await = None;
                None
            }
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current_user().await.is_some()
    }
}

/// Client-side checks applied before a signup request is sent.
pub fn validate_signup(name: &str, email: &str, password: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AuthError::InvalidInput("name is required".to_string()));
    }
    if !email.contains('@') {
        return Err(AuthError::InvalidInput(
            "a valid email address is required".to_string(),
        ));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

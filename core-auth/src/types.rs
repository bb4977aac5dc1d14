use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque bearer credential sent as `Authorization: Bearer <token>`.
///
/// # Security
///
/// `Debug` redacts the value. Use [`as_str`](Self::as_str) only at the point
/// where the header is built or the token is persisted.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Value of the `Authorization` header for this token.
    pub fn authorization_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Long-lived credential exchanged at the refresh endpoint. Never attached to
/// ordinary requests.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshToken(String);

impl RefreshToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken([REDACTED])")
    }
}

/// Token set returned by the login and refresh endpoints.
///
/// Login always returns both tokens; refresh may omit `refresh_token`, in
/// which case the stored one stays in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: AccessToken, refresh_token: Option<RefreshToken>) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: None,
        }
    }
}

/// Lifecycle of one authenticated request.
///
/// ```text
/// Initial -> Dispatched -> Succeeded
///                       -> FailedOther
///                       -> AuthExpired -> Refreshing -> RetriedSucceeded
///                                                    -> RetriedFailed
///                                                    -> ReauthRequired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPhase {
    Initial,
    Dispatched,
    /// 2xx response.
    Succeeded,
    /// Any failure other than a first-time 401; surfaced unchanged.
    FailedOther,
    /// 401 on a request that has not been replayed yet.
    AuthExpired,
    /// Refresh-token exchange in flight.
    Refreshing,
    /// New token stored; the request was replayed with it.
    RetriedSucceeded,
    /// The refresh call itself failed; credentials cleared.
    RetriedFailed,
    /// No refresh token was available; credentials cleared.
    ReauthRequired,
}

impl RequestPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestPhase::Succeeded
                | RequestPhase::FailedOther
                | RequestPhase::RetriedSucceeded
                | RequestPhase::RetriedFailed
                | RequestPhase::ReauthRequired
        )
    }
}

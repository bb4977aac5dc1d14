use bridge_traits::{BridgeError, HttpResponse};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The service answered with a non-2xx status.
    #[error("HTTP {status}: {}", .detail.as_deref().unwrap_or("request failed"))]
    Http { status: u16, detail: Option<String> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out: {operation}")]
    OperationTimeout { operation: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),
}

/// FastAPI-style error envelope: `detail` is either a string or a list of
/// validation entries carrying `msg`.
#[derive(Deserialize)]
struct ErrorEnvelope {
    detail: DetailField,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetailField {
    Message(String),
    Validation(Vec<ValidationEntry>),
}

#[derive(Deserialize)]
struct ValidationEntry {
    msg: String,
}

impl AuthError {
    /// Build an `Http` error from a non-2xx response, extracting `detail`.
    pub fn from_response(response: &HttpResponse) -> Self {
        let detail = serde_json::from_slice::<ErrorEnvelope>(&response.body)
            .ok()
            .and_then(|envelope| match envelope.detail {
                DetailField::Message(msg) => Some(msg),
                DetailField::Validation(entries) => entries.into_iter().next().map(|e| e.msg),
            })
            .filter(|msg| !msg.trim().is_empty());

        AuthError::Http {
            status: response.status,
            detail,
        }
    }

    /// HTTP status for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for a 401 from the service.
    pub fn is_unauthenticated(&self) -> bool {
        self.status() == Some(401)
    }

    /// Whether retrying the same user action could succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AuthError::Http { status, .. } => *status >= 500 || *status == 429,
            AuthError::Network(_) | AuthError::OperationTimeout { .. } | AuthError::Cancelled => {
                true
            }
            _ => false,
        }
    }

    /// Message suitable for showing to an end user: the service `detail`
    /// when present, a generic sentence otherwise.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Http {
                detail: Some(detail),
                ..
            } => detail.clone(),
            AuthError::Http { status: 401, .. } | AuthError::NotAuthenticated => {
                "Your session has expired. Please sign in again.".to_string()
            }
            AuthError::Http { status, .. } if *status >= 500 => {
                "The server encountered an error. Please try again later.".to_string()
            }
            AuthError::Http { .. } => "The request could not be completed.".to_string(),
            AuthError::Network(_) => "Unable to reach the server.".to_string(),
            AuthError::OperationTimeout { .. } => "The request timed out.".to_string(),
            AuthError::Cancelled => "The request was cancelled.".to_string(),
            AuthError::InvalidInput(msg) => msg.clone(),
            _ => "An unexpected error occurred.".to_string(),
        }
    }
}

impl From<BridgeError> for AuthError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout(msg) => AuthError::OperationTimeout { operation: msg },
            other => AuthError::Network(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

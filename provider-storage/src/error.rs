//! Error types for the storage provider

use core_auth::AuthError;
use thiserror::Error;

/// Storage provider errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Request failed in the authenticated client (HTTP status, network,
    /// expired session)
    #[error(transparent)]
    Request(#[from] AuthError),

    /// Rejected before any request was sent
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// File exceeds the configured upload limit
    #[error("File too large: {file_name} is {size} bytes, limit is {limit} bytes")]
    FileTooLarge {
        file_name: String,
        size: u64,
        limit: u64,
    },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// HTTP status of a service rejection.
    pub fn status(&self) -> Option<u16> {
        match self {
            StorageError::Request(err) => err.status(),
            _ => None,
        }
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            StorageError::Request(err) => err.user_message(),
            StorageError::FileTooLarge { file_name, limit, .. } => format!(
                "{} is too large. Max size: {} per file.",
                file_name,
                crate::types::format_bytes(*limit)
            ),
            other => other.to_string(),
        }
    }
}

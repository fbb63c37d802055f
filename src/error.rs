//! Error types for the feed synchronizer.

use crate::types::ItemId;
use thiserror::Error;

/// Main error type for feed operations.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Invalid or expired credential. Fatal to the session.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transient transport failure, including request timeouts.
    #[error("Network error: {0}")]
    Network(String),

    /// The mutation targets an item the server no longer has.
    #[error("Item no longer present: {0}")]
    Conflict(ItemId),

    #[error("Feed has been stopped")]
    Stopped,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl FeedError {
    /// Whether the caller may retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Network(_))
    }

    /// Whether the session must be re-authenticated.
    pub fn is_auth(&self) -> bool {
        matches!(self, FeedError::Auth(_) | FeedError::InvalidCredential(_))
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Decode(e.to_string())
    }
}

impl From<base64::DecodeError> for FeedError {
    fn from(e: base64::DecodeError) -> Self {
        FeedError::InvalidCredential(e.to_string())
    }
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;

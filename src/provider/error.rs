//! Provider error types

use crate::execution::retry::Retryable;
use thiserror::Error;

/// Error returned by an external model provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("provider '{0}' is unavailable")]
    Unavailable(String),
}

impl ProviderError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ProviderError::Auth(message),
            404 => ProviderError::NotFound(message),
            408 => ProviderError::Timeout(message),
            429 => ProviderError::RateLimited(message),
            500..=599 => ProviderError::Server { status, message },
            _ => ProviderError::BadRequest(format!("status {}: {}", status, message)),
        }
    }
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::Connection(_)
                | ProviderError::Server { .. }
                | ProviderError::RateLimited(_)
        )
    }
}

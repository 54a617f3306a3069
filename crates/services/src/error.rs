//! Shared error types for the services crate.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors emitted by question sources.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    #[error("question source kept rate limiting after retries")]
    RateLimited,
    #[error("question request failed with status {0}")]
    RequestFailed(StatusCode),
    #[error("question source returned a malformed response")]
    MalformedResponse,
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl SourceError {
    /// Whether the engine may transparently retry after this failure.
    ///
    /// Rate limiting and transport-level failures are transient; any other
    /// status or a malformed payload will not improve on a blind retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited | SourceError::Transport(_))
    }
}

/// Errors emitted by the quiz engine for calls outside their valid state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineError {
    #[error("no active session")]
    NotActive,
    #[error("retry is only valid from the error state")]
    NotRetryable,
}

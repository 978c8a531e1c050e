//! Error types for lares-search

use thiserror::Error;

/// Search provider error type
#[derive(Debug, Error)]
pub enum Error {
    /// Provider not configured (missing API key)
    #[error("search provider not configured: {0}")]
    NotConfigured(String),

    /// Authentication rejected (401)
    #[error("search provider auth failed: {0}")]
    Auth(String),

    /// Rate limit exceeded (429)
    #[error("search provider rate limit exceeded")]
    RateLimit,

    /// Transient provider failure (5xx, network)
    #[error("transient search provider error: {0}")]
    Transient(String),

    /// Permanent provider failure, surfaced to the caller
    #[error("search provider error: {0}")]
    Fatal(String),

    /// Response body did not match the tool-call contract
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Whether a retry with backoff may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimit | Error::Transient(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

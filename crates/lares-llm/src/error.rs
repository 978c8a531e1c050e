//! Error types for lares-llm

use thiserror::Error;

/// LLM gateway error type
#[derive(Debug, Error)]
pub enum Error {
    /// Gateway not configured (missing API key)
    #[error("gateway not configured: {0}")]
    NotConfigured(String),

    /// Authentication rejected by the provider (401/403)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// API error (non-auth 4xx)
    #[error("api error: {0}")]
    Api(String),

    /// Rate limit exceeded
    #[error("rate limit exceeded")]
    RateLimit,

    /// Upstream 5xx
    #[error("server error: {0}")]
    Server(String),

    /// Response body did not match the expected completion shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Response could not be parsed as JSON after all repair passes
    #[error("unparseable json response: {0}")]
    Parse(String),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),
}

impl Error {
    /// Whether a retry with backoff may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RateLimit | Error::Server(_) | Error::Network(_) | Error::Timeout(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

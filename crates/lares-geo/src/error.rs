//! Error types for lares-geo

use thiserror::Error;

/// Geo provider error type
#[derive(Debug, Error)]
pub enum Error {
    /// Provider not configured (missing API key)
    #[error("geo provider not configured: {0}")]
    NotConfigured(String),

    /// Authentication rejected
    #[error("geo provider auth failed: {0}")]
    Auth(String),

    /// Transient provider failure (5xx, 429, network)
    #[error("transient geo provider error: {0}")]
    Transient(String),

    /// Permanent provider failure
    #[error("geo provider error: {0}")]
    Fatal(String),

    /// Response body did not match the provider contract
    #[error("invalid geo response: {0}")]
    InvalidResponse(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

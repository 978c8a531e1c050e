//! Error types for lares-voice

use thiserror::Error;

/// Telephony provider error type
#[derive(Debug, Error)]
pub enum Error {
    /// Provider not configured (missing API key or assistant id)
    #[error("telephony provider not configured: {0}")]
    NotConfigured(String),

    /// Authentication rejected
    #[error("telephony auth failed: {0}")]
    Auth(String),

    /// Call creation rejected by the provider
    #[error("call rejected: {0}")]
    CallRejected(String),

    /// Transient provider failure
    #[error("transient telephony error: {0}")]
    Transient(String),

    /// Permanent provider failure
    #[error("telephony error: {0}")]
    Fatal(String),

    /// Response body did not match the provider contract
    #[error("invalid telephony response: {0}")]
    InvalidResponse(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

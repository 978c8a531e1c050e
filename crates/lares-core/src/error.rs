//! Error types for lares-core
//!
//! One enum per the request taxonomy: configuration, upstream auth,
//! transient, fatal, parse, timeout, logic. The coordinator decides
//! per stage whether an error fails the request or degrades to a
//! missing optional field plus a warning.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// A required key or setting is absent. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// LLM gateway error
    #[error("llm error: {0}")]
    Llm(#[from] lares_llm::Error),

    /// Search provider error
    #[error("search error: {0}")]
    Search(#[from] lares_search::Error),

    /// Geocoder / POI provider error
    #[error("geo error: {0}")]
    Geo(#[from] lares_geo::Error),

    /// Telephony provider error
    #[error("voice error: {0}")]
    Voice(#[from] lares_voice::Error),

    /// Invariant violation caught at validation
    #[error("invalid input: {0}")]
    Logic(String),

    /// Stage or request deadline exceeded
    #[error("timeout: {0}")]
    Timeout(String),

    /// Unrecoverable internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// A message safe to render directly in a chat bubble.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Error::Configuration(msg) => format!(
                "The assistant is not fully configured: {msg}. \
                 Set the missing environment variable and restart the server."
            ),
            Error::Llm(lares_llm::Error::NotConfigured(msg)) => format!(
                "The assistant is not fully configured: {msg}. \
                 Set the missing environment variable and restart the server."
            ),
            Error::Llm(lares_llm::Error::Auth(_)) => {
                "The language model rejected our credentials. Please check the LLM_API_KEY \
                 configuration."
                    .to_string()
            }
            Error::Llm(lares_llm::Error::Parse(_)) => {
                "I had trouble understanding that. Could you rephrase your request?".to_string()
            }
            Error::Llm(_) => {
                "The language model is unavailable right now. Please try again in a moment."
                    .to_string()
            }
            Error::Search(_) => {
                "Property search is unavailable right now. Please try again in a moment."
                    .to_string()
            }
            Error::Geo(_) => "Map data is unavailable right now.".to_string(),
            Error::Voice(_) => {
                "The negotiation call could not be placed. Please try again later.".to_string()
            }
            Error::Logic(msg) => msg.clone(),
            Error::Timeout(_) => {
                "That took longer than expected. Please try again.".to_string()
            }
            Error::Internal(_) => "Something went wrong on our side. Please try again.".to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_message_names_the_key() {
        let err = Error::Configuration("LLM_API_KEY not set".to_string());
        let msg = err.user_message();
        assert!(msg.contains("LLM_API_KEY"));
        assert!(msg.contains("environment variable"));
    }

    #[test]
    fn test_parse_error_asks_to_rephrase() {
        let err = Error::Llm(lares_llm::Error::Parse("bad".to_string()));
        assert!(err.user_message().contains("rephrase"));
    }

    #[test]
    fn test_logic_error_passes_message_through() {
        let err = Error::Logic("budget_min must not exceed budget_max".to_string());
        assert_eq!(err.user_message(), "budget_min must not exceed budget_max");
    }
}

//! Lares LLM - chat-completion gateway
//!
//! Single-point adapter to the external chat-completion service:
//! - Gateway: `ChatGateway` trait + HTTP implementation with retry/backoff
//! - JSON: repair ladder for model output (fences, embedded objects)
//! - Mock: scripted gateway for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod gateway;
pub mod json;
pub mod mock;

pub use error::{Error, Result};
pub use gateway::{
    mask_api_key, ChatGateway, CompletionRequest, GatewayConfig, HttpGateway, DEFAULT_BASE_URL,
    DEFAULT_MODEL,
};
pub use json::{coerce_json, parse_with_repair};
pub use mock::MockGateway;

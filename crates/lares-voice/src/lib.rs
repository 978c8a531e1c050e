//! Lares Voice - telephony provider client
//!
//! Primitives for the negotiation pipeline: brief the voice assistant,
//! place an outbound call, and poll its status until terminal.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;

pub use client::{
    CallState, CallStatus, HttpVoiceClient, VoiceCallProvider, VoiceConfig, DEFAULT_VOICE_URL,
};
pub use error::{Error, Result};

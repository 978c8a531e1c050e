//! Telephony provider client
//!
//! Thin wrapper over the voice-call vendor's REST API: push a fresh
//! brief onto the assistant, start an outbound call, and poll status
//! until the call reaches a terminal state. The polling cadence and
//! the overall deadline live in the negotiation agent; this client
//! only exposes the primitives.

use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default provider endpoint
pub const DEFAULT_VOICE_URL: &str = "https://api.vapi.ai";

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Terminal and in-flight call states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Call accepted, not yet ringing
    Queued,
    /// Ringing the callee
    Ringing,
    /// Live conversation
    InProgress,
    /// Completed normally
    Ended,
    /// Failed to connect or dropped with an error
    Failed,
    /// Provider reported something unrecognized
    Unknown,
}

impl CallState {
    /// Whether the call has finished, one way or the other.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    fn from_provider(raw: &str) -> Self {
        match raw {
            "queued" => CallState::Queued,
            "ringing" => CallState::Ringing,
            "in-progress" => CallState::InProgress,
            "ended" => CallState::Ended,
            "failed" => CallState::Failed,
            _ => CallState::Unknown,
        }
    }
}

/// A snapshot of one call.
#[derive(Debug, Clone)]
pub struct CallStatus {
    /// Current state
    pub state: CallState,
    /// Post-call analysis summary, present once the provider has one
    pub summary: Option<String>,
}

/// Voice-call provider trait implemented by the HTTP client and stubs.
#[async_trait::async_trait]
pub trait VoiceCallProvider: Send + Sync {
    /// Replace the assistant's system prompt and opening line.
    async fn update_assistant(&self, system_prompt: &str, first_message: &str) -> Result<()>;

    /// Start an outbound call; returns the provider call id.
    async fn create_call(&self, customer_phone: &str) -> Result<String>;

    /// Fetch the current status of a call.
    async fn call_status(&self, call_id: &str) -> Result<CallStatus>;
}

/// Telephony configuration
#[derive(Clone)]
pub struct VoiceConfig {
    /// API key
    pub api_key: String,
    /// Assistant to brief and dial with
    pub assistant_id: String,
    /// Provider phone number id used as the caller line
    pub phone_number_id: Option<String>,
    /// Default callee (demo/target phone)
    pub target_phone: Option<String>,
    /// Provider base URL
    pub base_url: String,
}

impl fmt::Debug for VoiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceConfig")
            .field("api_key", &"[REDACTED]")
            .field("assistant_id", &self.assistant_id)
            .field("phone_number_id", &self.phone_number_id)
            .field("target_phone", &self.target_phone.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl VoiceConfig {
    /// Create a configuration.
    #[must_use]
    pub fn new(api_key: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            assistant_id: assistant_id.into(),
            phone_number_id: None,
            target_phone: None,
            base_url: DEFAULT_VOICE_URL.to_string(),
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("TELEPHONY_API_KEY")
            .map_err(|_| Error::NotConfigured("TELEPHONY_API_KEY not set".to_string()))?;
        let assistant_id = std::env::var("TELEPHONY_ASSISTANT_ID")
            .map_err(|_| Error::NotConfigured("TELEPHONY_ASSISTANT_ID not set".to_string()))?;

        let mut config = Self::new(api_key, assistant_id);
        config.phone_number_id = std::env::var("TELEPHONY_PHONE_NUMBER_ID").ok();
        config.target_phone = std::env::var("TELEPHONY_TARGET_PHONE").ok();
        Ok(config)
    }

    /// Set the provider base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the callee phone number.
    #[must_use]
    pub fn with_target_phone(mut self, phone: impl Into<String>) -> Self {
        self.target_phone = Some(phone.into());
        self
    }
}

/// HTTP telephony client.
pub struct HttpVoiceClient {
    client: Client,
    config: VoiceConfig,
}

impl HttpVoiceClient {
    /// Create a new client.
    pub fn new(config: VoiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(VoiceConfig::from_env()?)
    }

    /// The configured default callee, when one exists.
    #[must_use]
    pub fn target_phone(&self) -> Option<&str> {
        self.config.target_phone.as_deref()
    }

    fn triage(status: reqwest::StatusCode, body: &str) -> Error {
        match status.as_u16() {
            401 | 403 => Error::Auth(format!("http {status}")),
            429 | 500..=599 => Error::Transient(format!("http {status}")),
            _ => Error::Fatal(format!("http {status}: {body}")),
        }
    }
}

#[async_trait::async_trait]
impl VoiceCallProvider for HttpVoiceClient {
    #[instrument(skip_all)]
    async fn update_assistant(&self, system_prompt: &str, first_message: &str) -> Result<()> {
        let url = format!("{}/assistant/{}", self.config.base_url, self.config.assistant_id);
        let payload = json!({
            "firstMessage": first_message,
            "model": {
                "messages": [{ "role": "system", "content": system_prompt }]
            }
        });

        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::triage(status, &body));
        }
        debug!("assistant brief updated");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn create_call(&self, customer_phone: &str) -> Result<String> {
        let url = format!("{}/call/phone", self.config.base_url);
        let payload = json!({
            "assistantId": self.config.assistant_id,
            "phoneNumberId": self.config.phone_number_id,
            "customer": { "number": normalize_phone(customer_phone) },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        if !status.is_success() {
            // A rejected create fails the whole negotiation.
            return Err(match status.as_u16() {
                401 | 403 => Error::Auth(format!("http {status}")),
                _ => Error::CallRejected(format!("http {status}: {body}")),
            });
        }

        let parsed: Value =
            serde_json::from_str(&body).map_err(|e| Error::InvalidResponse(e.to_string()))?;
        parsed["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidResponse("no call id in response".to_string()))
    }

    #[instrument(skip(self))]
    async fn call_status(&self, call_id: &str) -> Result<CallStatus> {
        let url = format!("{}/call/{}", self.config.base_url, call_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::triage(status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;

        let state = body["status"]
            .as_str()
            .map(CallState::from_provider)
            .unwrap_or(CallState::Unknown);
        let summary = body["analysis"]["summary"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(CallStatus { state, summary })
    }
}

/// Coerce a phone number toward E.164.
fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('+') {
        trimmed.to_string()
    } else if let Some(rest) = trimmed.strip_prefix("00") {
        format!("+{rest}")
    } else {
        format!("+{trimmed}")
    }
}

//! Chat-completion gateway
//!
//! Single point of contact with the external chat-completion service.
//! Callers describe one completion (system prompt, user prompt, whether
//! the answer must be JSON) and get back either text or a typed error.
//! JSON responses are pushed through the repair ladder in [`crate::json`]
//! and, if still unparseable, re-issued once with a stricter
//! instruction before the gateway gives up.

use crate::error::{Error, Result};
use crate::json;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default chat-completion endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.asi1.ai/v1";

/// Default model
pub const DEFAULT_MODEL: &str = "asi1-mini";

/// Per-attempt request timeout
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for one completion (first try + retries)
const MAX_ATTEMPTS: u32 = 3;

/// Initial backoff delay
const BACKOFF_BASE_MS: u64 = 500;

/// Backoff cap
const BACKOFF_CAP_MS: u64 = 8_000;

/// Bounded connection pool per host
const POOL_MAX_IDLE: usize = 32;

/// Appended to the system prompt on the JSON re-issue pass
const STRICT_JSON_SUFFIX: &str = "\n\nIMPORTANT: Your previous answer was not valid JSON. \
     Respond with ONLY a single valid JSON value. No markdown fences, no prose, no comments.";

/// Mask an API key for safe display in logs.
#[must_use]
pub fn mask_api_key(key: &str) -> String {
    if key.len() <= 8 {
        return "****".to_string();
    }
    format!("{}...{}", &key[..4], &key[key.len() - 4..])
}

/// One completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt
    pub system_prompt: String,
    /// User prompt
    pub user_prompt: String,
    /// When set, the returned string is guaranteed to parse as JSON
    pub want_json: bool,
    /// Completion token cap
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl CompletionRequest {
    /// Create a request with default sampling settings.
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            want_json: false,
            max_tokens: 1024,
            temperature: 0.1,
        }
    }

    /// Require a JSON answer.
    #[must_use]
    pub fn expect_json(mut self) -> Self {
        self.want_json = true;
        self
    }

    /// Set the completion token cap.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Gateway trait implemented by the HTTP client and by test stubs.
#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    /// Run one completion. When `request.want_json` is set the returned
    /// string parses as JSON or the call fails with [`Error::Parse`].
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Gateway configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// API key
    pub api_key: String,
    /// Base URL of the chat-completion service
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_key", &mask_api_key(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GatewayConfig {
    /// Create a configuration with an API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: ATTEMPT_TIMEOUT,
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| Error::NotConfigured("LLM_API_KEY not set".to_string()))?;
        let base_url =
            std::env::var("LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Ok(Self {
            api_key,
            base_url,
            model,
            timeout: ATTEMPT_TIMEOUT,
        })
    }

    /// Set the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

// Wire types for the OpenAI-compatible chat endpoint.

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: String,
}

/// HTTP gateway to an OpenAI-compatible chat-completion service.
pub struct HttpGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    /// Create a new gateway.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(POOL_MAX_IDLE)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    /// One HTTP attempt, no retries.
    async fn attempt(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let wire = WireRequest {
            model: &self.config.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                WireMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&wire)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(self.config.timeout.as_millis() as u64)
                } else {
                    Error::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => Error::Auth(format!("http {status}")),
                429 => Error::RateLimit,
                s if s >= 500 => Error::Server(format!("http {status}")),
                _ => Error::Api(format!("http {status}")),
            });
        }

        let parsed: WireResponse =
            serde_json::from_str(&body).map_err(|e| Error::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::InvalidResponse("no choices in response".to_string()))
    }

    /// One completion with transient-error retries.
    async fn request_with_retry(&self, request: &CompletionRequest) -> Result<String> {
        let mut delay_ms = BACKOFF_BASE_MS;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let jittered = jitter(delay_ms);
                    warn!(
                        attempt,
                        delay_ms = jittered,
                        error = %e,
                        "completion attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(jittered)).await;
                    delay_ms = (delay_ms * 2).min(BACKOFF_CAP_MS);
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop returns from the final attempt")
    }
}

/// Apply ±25% jitter. Nanosecond clock bits stand in for a PRNG so we
/// don't pull in the rand crate for one modulo.
fn jitter(delay_ms: u64) -> u64 {
    let span = delay_ms / 2;
    if span == 0 {
        return delay_ms;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    delay_ms - span / 2 + nanos % span
}

#[async_trait::async_trait]
impl ChatGateway for HttpGateway {
    #[instrument(skip(self, request), fields(model = %self.config.model, want_json = request.want_json))]
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let text = self.request_with_retry(&request).await?;

        if !request.want_json {
            return Ok(text);
        }

        match json::coerce_json(&text) {
            Ok(value) => Ok(value),
            Err(first) => {
                debug!(error = %first, "json repair failed, re-issuing with strict instruction");
                let mut strict = request.clone();
                strict.system_prompt.push_str(STRICT_JSON_SUFFIX);
                strict.temperature = 0.0;
                let retry_text = self.request_with_retry(&strict).await?;
                json::coerce_json(&retry_text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = CompletionRequest::new("sys", "user")
            .expect_json()
            .with_max_tokens(512)
            .with_temperature(0.5);
        assert!(req.want_json);
        assert_eq!(req.max_tokens, 512);
        assert!((req.temperature - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_config_debug_masks_key() {
        let config = GatewayConfig::new("sk-1234567890abcdef");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("1234567890"));
        assert!(rendered.contains("sk-1...cdef"));
    }

    #[test]
    fn test_mask_short_key() {
        assert_eq!(mask_api_key("short"), "****");
    }

    #[test]
    fn test_jitter_stays_in_band() {
        for _ in 0..32 {
            let d = jitter(1000);
            assert!((750..=1250).contains(&d), "jittered delay {d} out of band");
        }
    }

    #[test]
    fn test_jitter_zero_delay() {
        assert_eq!(jitter(1), 1);
    }
}

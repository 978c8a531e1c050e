//! Search and scrape provider
//!
//! Client for an MCP-style tool server exposing two tools:
//! `search_engine` (web search) and `scrape_as_markdown` (page fetch).
//! Both operations are idempotent; rate limits and transient failures
//! are retried with backoff, auth failures surface immediately.

use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Default tool server endpoint
pub const DEFAULT_TOOL_SERVER_URL: &str = "https://mcp.brightdata.com/mcp";

/// Request timeout per tool call
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts for a retryable failure
const MAX_ATTEMPTS: u32 = 3;

/// Backoff between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(750);

/// A single web search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result title
    pub title: String,
    /// Destination URL
    pub url: String,
    /// Result snippet
    pub snippet: String,
    /// Display form of the URL
    pub display_url: String,
}

/// Search provider trait implemented by the HTTP client and test stubs.
#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    /// Issue a web search and return raw hits.
    async fn search(&self, query: &str, engine: &str) -> Result<Vec<SearchHit>>;

    /// Scrape a page as markdown.
    async fn scrape_markdown(&self, url: &str) -> Result<String>;
}

/// Tool server configuration
#[derive(Clone)]
pub struct SearchConfig {
    /// API token for the tool server
    pub api_key: String,
    /// Tool server base URL
    pub base_url: String,
    /// Per-call timeout
    pub timeout: Duration,
}

impl fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SearchConfig {
    /// Create a configuration with an API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_TOOL_SERVER_URL.to_string(),
            timeout: CALL_TIMEOUT,
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("SEARCH_PROVIDER_API_KEY")
            .map_err(|_| Error::NotConfigured("SEARCH_PROVIDER_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Set the tool server base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// HTTP client for the tool server.
pub struct ToolServerClient {
    client: Client,
    config: SearchConfig,
}

impl ToolServerClient {
    /// Create a new client.
    pub fn new(config: SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(SearchConfig::from_env()?)
    }

    /// Invoke one tool on the server, returning the text payload.
    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<String> {
        let url = format!(
            "{}?token={}",
            self.config.base_url,
            urlencoding::encode(&self.config.api_key)
        );
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": tool, "arguments": arguments },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => Error::Auth(format!("http {status}")),
                429 => Error::RateLimit,
                s if s >= 500 => Error::Transient(format!("http {status}")),
                _ => Error::Fatal(format!("http {status}")),
            });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| Error::InvalidResponse(e.to_string()))?;
        parsed["result"]["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidResponse("no content in tool result".to_string()))
    }

    /// One tool call with bounded retries for rate limits and
    /// transient failures.
    async fn call_tool_with_retry(&self, tool: &str, arguments: Value) -> Result<String> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.call_tool(tool, arguments.clone()).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(tool, attempt, error = %e, "tool call failed, retrying");
                    tokio::time::sleep(RETRY_DELAY * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop returns from the final attempt")
    }
}

#[async_trait::async_trait]
impl SearchProvider for ToolServerClient {
    #[instrument(skip(self))]
    async fn search(&self, query: &str, engine: &str) -> Result<Vec<SearchHit>> {
        let raw = self
            .call_tool_with_retry(
                "search_engine",
                json!({ "query": query, "engine": engine }),
            )
            .await?;

        let hits = parse_search_output(&raw)?;
        debug!(query, hits = hits.len(), "search complete");
        Ok(hits)
    }

    #[instrument(skip(self))]
    async fn scrape_markdown(&self, url: &str) -> Result<String> {
        self.call_tool_with_retry("scrape_as_markdown", json!({ "url": url }))
            .await
    }
}

/// Parse the search tool's JSON payload into hits.
///
/// The tool returns `{"organic": [{title, link, description,
/// display_link}, ...]}`; entries missing a link are skipped.
fn parse_search_output(raw: &str) -> Result<Vec<SearchHit>> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| Error::InvalidResponse(e.to_string()))?;

    let organic = match value.get("organic").and_then(Value::as_array) {
        Some(entries) => entries,
        None => return Ok(Vec::new()),
    };

    let hits = organic
        .iter()
        .filter_map(|entry| {
            let url = entry.get("link").and_then(Value::as_str)?;
            Some(SearchHit {
                title: entry
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                url: url.to_string(),
                snippet: entry
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                display_url: entry
                    .get("display_link")
                    .and_then(Value::as_str)
                    .unwrap_or(url)
                    .to_string(),
            })
        })
        .collect();

    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_output() {
        let raw = r#"{
            "organic": [
                {"title": "T2 em Faro", "link": "https://www.idealista.pt/x", "description": "Apartamento T2", "display_link": "idealista.pt"},
                {"title": "no link entry"},
                {"title": "T3", "link": "https://www.imovirtual.com/y", "description": ""}
            ]
        }"#;
        let hits = parse_search_output(raw).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "T2 em Faro");
        assert_eq!(hits[0].display_url, "idealista.pt");
        assert_eq!(hits[1].display_url, "https://www.imovirtual.com/y");
    }

    #[test]
    fn test_parse_empty_organic() {
        let hits = parse_search_output(r#"{"organic": []}"#).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_parse_missing_organic() {
        let hits = parse_search_output(r#"{"other": 1}"#).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_invalid_response() {
        let err = parse_search_output("not json").unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::RateLimit.is_retryable());
        assert!(Error::Transient("x".into()).is_retryable());
        assert!(!Error::Auth("x".into()).is_retryable());
        assert!(!Error::Fatal("x".into()).is_retryable());
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = SearchConfig::new("secret-token");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret-token"));
    }
}

//! Mock gateway for testing
//!
//! Returns queued responses in order, then a default, so agent tests
//! can script multi-step LLM conversations without a network.

use crate::error::{Error, Result};
use crate::gateway::{ChatGateway, CompletionRequest};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A scripted gateway response.
enum Scripted {
    Text(String),
    Fail(fn() -> Error),
}

/// Mock [`ChatGateway`] that replays queued responses.
pub struct MockGateway {
    responses: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a text response.
    pub fn push_text(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Scripted::Text(text.into()));
    }

    /// Queue a failure.
    pub fn push_failure(&self, make: fn() -> Error) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Scripted::Fail(make));
    }

    /// Requests the mock has seen, in order.
    #[must_use]
    pub fn seen_requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl ChatGateway for MockGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let next = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            Some(Scripted::Text(text)) => {
                if request.want_json {
                    crate::json::coerce_json(&text)
                } else {
                    Ok(text)
                }
            }
            Some(Scripted::Fail(make)) => Err(make()),
            None => Ok("ok".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order() {
        let mock = MockGateway::new();
        mock.push_text("first");
        mock.push_text("second");

        let req = CompletionRequest::new("s", "u");
        assert_eq!(mock.complete(req.clone()).await.unwrap(), "first");
        assert_eq!(mock.complete(req).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_json_contract_applies_to_mock() {
        let mock = MockGateway::new();
        mock.push_text("```json\n{\"a\": 1}\n```");
        let req = CompletionRequest::new("s", "u").expect_json();
        let out = mock.complete(req).await.unwrap();
        assert_eq!(out, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let mock = MockGateway::new();
        mock.push_failure(|| Error::RateLimit);
        let err = mock
            .complete(CompletionRequest::new("s", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimit));
    }
}

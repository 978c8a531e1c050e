//! Chat endpoint
//!
//! One synchronous request per user turn. The response is always
//! well-formed JSON with `status` of "success" or "error"; pipeline
//! degradation shows up inside `data`, never as malformed output.

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use lares_core::{ChatOutcome, Coordinator, Error};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Slack on top of the coordinator's total budget before the HTTP
/// layer gives up on a request
const DEADLINE_SLACK: Duration = Duration::from_secs(5);

/// Chat request body
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The user's message
    pub message: String,
    /// Opaque session id chosen by the client
    pub session_id: String,
}

/// Chat response body
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// "success" or "error"
    pub status: &'static str,
    /// Endpoint-specific payload
    pub data: serde_json::Value,
}

impl ChatResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            status: "success",
            data,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: "error",
            data: json!({ "message": message }),
        }
    }
}

/// Handle one chat turn.
async fn chat(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    let deadline = coordinator.total_budget() + DEADLINE_SLACK;
    let outcome = tokio::time::timeout(
        deadline,
        coordinator.chat(&request.session_id, &request.message),
    )
    .await;

    let response = match outcome {
        Ok(Ok(ChatOutcome::Gathering { message })) => ChatResponse::success(json!({
            "message": message,
            "is_complete": false,
        })),
        Ok(Ok(ChatOutcome::Results(results))) => match serde_json::to_value(&*results) {
            Ok(data) => ChatResponse::success(data),
            Err(e) => {
                warn!(error = %e, "result serialization failed");
                ChatResponse::error("Something went wrong while rendering results.".to_string())
            }
        },
        Ok(Err(e)) => {
            warn!(error = %e, "chat request failed");
            match e {
                // Config problems render as chat guidance, not errors.
                Error::Configuration(_) => ChatResponse::success(json!({
                    "message": e.user_message(),
                    "is_complete": false,
                })),
                other => ChatResponse::error(other.user_message()),
            }
        }
        Err(_) => {
            warn!(session_id = %request.session_id, "chat request missed the total deadline");
            ChatResponse::error(
                "That took longer than expected. Please try again.".to_string(),
            )
        }
    };

    Json(response)
}

/// Create chat routes.
pub fn routes() -> Router {
    Router::new().route("/api/chat", post(chat))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_shape() {
        let response = ChatResponse::success(json!({ "message": "hi", "is_complete": false }));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["data"]["is_complete"], false);
    }

    #[test]
    fn test_error_shape() {
        let response = ChatResponse::error("nope".to_string());
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["data"]["message"], "nope");
    }
}

//! Negotiation endpoint
//!
//! Synchronous: the response arrives once the voice call reaches a
//! terminal state or the pipeline fails.

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use lares_core::{Coordinator, NegotiationRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Negotiate request body
#[derive(Debug, Deserialize)]
pub struct NegotiateRequest {
    /// Property address
    pub address: String,
    /// Caller name
    pub name: String,
    /// Caller email
    pub email: String,
    /// Free-text instructions
    #[serde(default)]
    pub additional_info: String,
}

/// Negotiate response body
#[derive(Debug, Serialize)]
pub struct NegotiateResponse {
    /// Whether the call completed normally
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    /// Leverage score in [0, 10]
    pub leverage_score: f64,
    /// Probing findings
    pub findings: Vec<String>,
    /// Provider transcript summary
    pub call_summary: String,
}

/// Handle one negotiation request.
async fn negotiate(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Json(request): Json<NegotiateRequest>,
) -> Json<NegotiateResponse> {
    let outcome = coordinator
        .negotiate(NegotiationRequest {
            address: request.address,
            name: request.name,
            email: request.email,
            additional_info: request.additional_info,
        })
        .await;

    let response = match outcome {
        Ok(record) => {
            let message = if record.success {
                format!("Negotiation call completed for {}.", record.address)
            } else {
                record.call_summary.clone()
            };
            NegotiateResponse {
                success: record.success,
                message,
                leverage_score: record.leverage_score,
                findings: record.findings,
                call_summary: record.call_summary,
            }
        }
        Err(e) => {
            warn!(error = %e, "negotiation request failed");
            NegotiateResponse {
                success: false,
                message: e.user_message(),
                leverage_score: 0.0,
                findings: vec![],
                call_summary: String::new(),
            }
        }
    };

    Json(response)
}

/// Create negotiate routes.
pub fn routes() -> Router {
    Router::new().route("/api/negotiate", post(negotiate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape() {
        let response = NegotiateResponse {
            success: true,
            message: "done".to_string(),
            leverage_score: 6.5,
            findings: vec!["price_history: reduced twice".to_string()],
            call_summary: "Seller accepted viewing.".to_string(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["leverage_score"], 6.5);
        assert_eq!(value["findings"].as_array().unwrap().len(), 1);
    }
}

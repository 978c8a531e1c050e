//! Web API module for Lares
//!
//! Three endpoints:
//! - `GET /health` — liveness
//! - `POST /api/chat` — the conversational search pipeline
//! - `POST /api/negotiate` — the voice negotiation pipeline

pub mod chat;
pub mod health;
pub mod negotiate;

use axum::Router;

/// Create the API router with all endpoints.
pub fn routes() -> Router {
    Router::new()
        .merge(health::routes())
        .merge(chat::routes())
        .merge(negotiate::routes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Extension;
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use lares_core::{Coordinator, CoordinatorConfig, Providers};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// An app with no providers configured at all.
    fn bare_app() -> Router {
        let coordinator = Arc::new(Coordinator::new(
            Providers::default(),
            CoordinatorConfig::default(),
        ));
        routes().layer(Extension(coordinator))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).expect("response must be well-formed JSON")
    }

    fn post_json(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_is_idempotent() {
        for _ in 0..2 {
            let response = bare_app()
                .oneshot(Request::get("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let value = body_json(response).await;
            assert_eq!(value["status"], "ok");
        }
    }

    #[tokio::test]
    async fn test_chat_without_llm_key_is_success_with_guidance() {
        let response = bare_app()
            .oneshot(post_json(
                "/api/chat",
                r#"{"message": "Olá", "session_id": "t1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["status"], "success");
        assert_eq!(value["data"]["is_complete"], false);
        assert!(value["data"]["message"]
            .as_str()
            .unwrap()
            .contains("LLM_API_KEY"));
    }

    #[tokio::test]
    async fn test_chat_response_always_has_status() {
        let response = bare_app()
            .oneshot(post_json(
                "/api/chat",
                r#"{"message": "", "session_id": "t1"}"#,
            ))
            .await
            .unwrap();
        let value = body_json(response).await;
        let status = value["status"].as_str().unwrap();
        assert!(status == "success" || status == "error");
        assert!(value["data"]["message"].is_string());
    }

    #[tokio::test]
    async fn test_negotiate_without_providers_fails_cleanly() {
        let response = bare_app()
            .oneshot(post_json(
                "/api/negotiate",
                r#"{"address": "Rua X, Faro", "name": "Ana", "email": "ana@example.com",
                    "additional_info": ""}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["success"], false);
        assert!(value["message"].as_str().unwrap().contains("LLM_API_KEY"));
        assert_eq!(value["leverage_score"], 0.0);
    }
}

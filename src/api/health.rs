//! Health check endpoint.

use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok" while the process serves requests
    pub status: &'static str,
}

/// Liveness probe.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Create health routes.
pub fn routes() -> Router {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_shape() {
        let response = health_check().await;
        let rendered = serde_json::to_string(&response.0).unwrap();
        assert_eq!(rendered, r#"{"status":"ok"}"#);
    }
}

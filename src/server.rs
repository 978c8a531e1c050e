//! Server module for Lares
//!
//! Loads configuration from the environment, wires whichever external
//! providers have keys, and serves the three HTTP endpoints. A missing
//! provider key logs a warning and degrades the matching pipeline
//! stage; it never prevents startup.

use crate::api;
use anyhow::{Context, Result};
use axum::{Extension, Router};
use lares_core::agents::NegotiationConfig;
use lares_core::{Coordinator, CoordinatorConfig, Providers};
use lares_geo::{Geocoder, HttpGeocoder, HttpPoiProvider, PoiProvider};
use lares_llm::{ChatGateway, HttpGateway};
use lares_search::{SearchProvider, ToolServerClient};
use lares_voice::{HttpVoiceClient, VoiceCallProvider};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Default listen port
const DEFAULT_PORT: u16 = 8080;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen port
    pub port: u16,
    /// Session store capacity
    pub session_capacity: usize,
    /// Allowed CORS origins; empty means permissive (development)
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    /// Read configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("LISTEN_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("invalid LISTEN_PORT: {raw}"))?,
            Err(_) => DEFAULT_PORT,
        };
        let session_capacity = match std::env::var("SESSION_CAPACITY") {
            Ok(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid SESSION_CAPACITY: {raw}"))?,
            Err(_) => lares_core::DEFAULT_SESSION_CAPACITY,
        };
        let cors_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            port,
            session_capacity,
            cors_origins,
        })
    }
}

/// Wire every provider that has a key; warn about the rest.
fn build_providers() -> Providers {
    let gateway: Option<Arc<dyn ChatGateway>> = match HttpGateway::from_env() {
        Ok(gateway) => {
            info!("LLM gateway configured");
            Some(Arc::new(gateway))
        }
        Err(e) => {
            warn!("LLM gateway not configured: {e}");
            None
        }
    };

    let search: Option<Arc<dyn SearchProvider>> = match ToolServerClient::from_env() {
        Ok(client) => {
            info!("Search provider configured");
            Some(Arc::new(client))
        }
        Err(e) => {
            warn!("Search provider not configured: {e}");
            None
        }
    };

    let geocoder: Option<Arc<dyn Geocoder>> = match HttpGeocoder::from_env() {
        Ok(geocoder) => {
            info!("Geocoder configured");
            Some(Arc::new(geocoder))
        }
        Err(e) => {
            warn!("Geocoder not configured: {e}");
            None
        }
    };

    let pois: Option<Arc<dyn PoiProvider>> = match HttpPoiProvider::from_env() {
        Ok(provider) => {
            info!("POI provider configured");
            Some(Arc::new(provider))
        }
        Err(e) => {
            warn!("POI provider not configured: {e}");
            None
        }
    };

    let voice: Option<Arc<dyn VoiceCallProvider>> = match HttpVoiceClient::from_env() {
        Ok(client) => {
            info!("Telephony provider configured");
            Some(Arc::new(client))
        }
        Err(e) => {
            warn!("Telephony provider not configured: {e}");
            None
        }
    };

    Providers {
        gateway,
        search,
        geocoder,
        pois,
        voice,
    }
}

/// CORS layer: configured origins when given, permissive otherwise.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<axum::http::HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// Run the server.
pub async fn run() -> Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    info!("Configuration loaded (port {})", config.port);

    let providers = build_providers();
    let negotiation = NegotiationConfig::from_env();
    if negotiation.target_phone.is_none() {
        warn!("TELEPHONY_TARGET_PHONE not set; negotiation calls will be rejected");
    }
    let coordinator_config = CoordinatorConfig {
        session_capacity: config.session_capacity,
        negotiation,
        ..CoordinatorConfig::default()
    };
    let coordinator = Arc::new(Coordinator::new(providers, coordinator_config));
    info!("Coordinator initialized");

    let app = Router::new()
        .merge(api::routes())
        .layer(Extension(coordinator))
        .layer(cors_layer(&config));

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .context("Invalid server address")?;

    info!("HTTP server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}

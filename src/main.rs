//! Lares - multi-agent real-estate search assistant
//!
//! Binary entry point: environment, tracing, then the HTTP server.

#![forbid(unsafe_code)]

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lares=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Lares v{}", env!("CARGO_PKG_VERSION"));

    server::run().await
}

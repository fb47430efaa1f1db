//! camstream server entry point

use std::sync::Arc;

use camstream::codec::JpegCodec;
use camstream::device::VirtualProvider;
use camstream::engine::AcquisitionEngine;
use camstream::state::{AppConfig, AppState};
use camstream::web_api;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camstream=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::default();
    tracing::info!(?config, "Starting camstream");

    // A hardware SDK shim plugs in behind DeviceProvider; the virtual
    // backend keeps the server runnable with no camera attached.
    let provider = Arc::new(VirtualProvider::default());
    let engine = Arc::new(AcquisitionEngine::new(provider, Arc::new(JpegCodec)));

    // Best-effort open at startup; the API can open the camera later.
    if let Err(e) = engine.open(None).await {
        tracing::warn!(error = %e, "Camera not opened at startup");
    }

    let state = AppState::new(engine.clone(), config.clone());
    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

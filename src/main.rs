//! Switchboard - conversational-session orchestrator
//!
//! Accepts questions keyed by conversation, dispatches them to an
//! external analysis backend under a bounded concurrency budget, and
//! threads continuity state between turns.

mod api;
mod backend;
mod config;
mod dispatch;
mod prompt;
mod session;

use api::{create_router, AppState};
use backend::CliBackend;
use config::Settings;
use dispatch::Dispatcher;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config_path = std::env::var("SWITCHBOARD_CONFIG")
        .unwrap_or_else(|_| "switchboard.json".to_string());

    let port: u16 = std::env::var("SWITCHBOARD_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    tracing::info!(path = %config_path, "Loading settings");
    let settings = Settings::load(&config_path)?;

    tracing::info!(
        workers = settings.workers,
        targets = ?settings.targets.keys().collect::<Vec<_>>(),
        backend = %settings.backend_program,
        "Settings loaded"
    );

    // Build the dispatcher
    let backend = CliBackend::new(settings.backend_program.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        backend,
        settings.targets.clone(),
        settings.workers,
    ));

    // Create router
    let state = AppState::new(Arc::clone(&dispatcher));
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Switchboard listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(
        active_sessions = dispatcher.active_sessions().await,
        "Shutting down"
    );

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received shutdown signal");
}

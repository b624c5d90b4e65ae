//! HTTP server startup and routing

use std::sync::Arc;
use tracing::info;

use crate::{
    completion::LLMWorker,
    config::Config,
    memory_db::MemoryDatabase,
    shared_state::UnifiedAppState,
};

/// Opens the database, wires the completion client and serves until shutdown.
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::metrics::init_metrics();
    cfg.print_config();

    let database = Arc::new(MemoryDatabase::new(&cfg.db_path)?);
    info!("Story database ready at {}", cfg.db_path.display());

    let llm = Arc::new(LLMWorker::from_config(&cfg)?);
    let addr = cfg.api_addr()?;
    let state = UnifiedAppState::new(cfg, database, llm);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub fn build_router(state: UnifiedAppState) -> axum::Router {
    use axum::{
        Router,
        routing::{get, post},
    };
    use tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
        timeout::TimeoutLayer,
    };
    use std::time::Duration;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::DELETE])
        .allow_headers(Any);

    let timeout = Duration::from_secs(state.config.request_timeout_seconds.saturating_mul(2).max(30));

    Router::new()
        .route("/api/chat", post(crate::api::chat))
        .route("/api/chat/stream", post(crate::api::chat_stream))
        .route("/api/stats", get(crate::api::database_stats))
        .route("/api/sessions/:id/stats", get(crate::api::session_stats))
        .route("/api/sessions/:id/summary", get(crate::api::session_summary))
        .route("/api/sessions/:id", axum::routing::delete(crate::api::delete_session))
        .route("/healthz", get(|| async { "OK" }))
        .route("/metrics", get(crate::metrics::get_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}

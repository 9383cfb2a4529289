//! HTTP server setup and routing

use axum::{
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use modelsync_common::events::EventBus;
use modelsync_common::{time, Error, Result};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::cache::TieredCache;
use crate::config::RuntimeSettings;
use crate::realtime::Broadcaster;
use crate::reconcile::Reconciler;
use crate::scheduler::Scheduler;

/// Shared application context passed to all handlers
///
/// Clone is cheap: everything inside is an Arc or a pool handle.
#[derive(Clone)]
pub struct AppContext {
    pub pool: SqlitePool,
    pub cache: Arc<TieredCache<Value>>,
    pub events: EventBus,
    pub reconciler: Arc<Reconciler>,
    pub settings: Arc<RwLock<RuntimeSettings>>,
    pub scheduler: Arc<Scheduler>,
    pub broadcaster: Arc<Broadcaster>,
    pub started_at: DateTime<Utc>,
}

/// Build the full route table.
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(index))
        // Health and build identification
        .route("/health", get(super::health::health))
        .route("/build_info", get(super::health::build_info))
        // Read API
        .route("/models", get(super::models::list_models))
        .route("/models/:id", get(super::models::get_model))
        .route("/status", get(super::models::status_summary))
        // Admin operations
        .route("/models/:id/override", post(super::models::override_model))
        .route("/tasks", get(super::tasks::list_tasks))
        .route("/tasks/:name/run", post(super::tasks::run_task))
        .route("/tasks/:name/enable", post(super::tasks::enable_task))
        .route("/sync/history", get(super::tasks::sync_history))
        .route("/settings", get(super::settings::get_settings))
        .route("/settings", put(super::settings::update_settings))
        // Realtime feeds
        .route("/events", get(super::sse::event_stream))
        .route("/ws", get(super::ws::ws_handler))
        .with_state(ctx)
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
}

/// GET / - service identification
async fn index() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": time::now(),
    }))
}

/// Run the HTTP server until the shutdown token fires.
pub async fn run(ctx: AppContext, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = build_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

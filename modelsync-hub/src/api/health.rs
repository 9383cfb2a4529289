//! Health and build identification endpoints.

use axum::{extract::State, Json};
use modelsync_common::time;
use serde_json::{json, Value};

use crate::api::server::AppContext;

/// GET /health - service health with store, cache, and realtime detail
pub async fn health(State(ctx): State<AppContext>) -> Json<Value> {
    let database = match sqlx::query("SELECT 1").execute(&ctx.pool).await {
        Ok(_) => "ok",
        Err(_) => "error",
    };

    Json(json!({
        "status": if database == "ok" { "healthy" } else { "degraded" },
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": time::seconds_since(ctx.started_at),
        "database": database,
        "cache": ctx.cache.stats(),
        "realtime": {
            "connected_clients": ctx.broadcaster.client_count(),
            "rooms": ctx.broadcaster.room_count(),
        },
    }))
}

/// GET /build_info - compile-time build identification
pub async fn build_info() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "git_hash": env!("GIT_HASH"),
        "build_timestamp": env!("BUILD_TIMESTAMP"),
        "profile": env!("BUILD_PROFILE"),
    }))
}

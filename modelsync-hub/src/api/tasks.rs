//! Scheduler administration endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::api::server::AppContext;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::scheduler::TaskKind;

/// GET /tasks - status of every scheduled task
pub async fn list_tasks(State(ctx): State<AppContext>) -> Json<Value> {
    let tasks = ctx.scheduler.status().await;
    Json(json!({ "tasks": tasks }))
}

/// POST /tasks/:name/run - trigger one run immediately
///
/// The run proceeds in the background; 202 means it was accepted, not
/// that it finished. A run already in flight makes the trigger a no-op.
pub async fn run_task(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if TaskKind::parse(&name).is_none() {
        return Err(ApiError::NotFound(format!("Unknown task '{}'", name)));
    }

    let scheduler = ctx.scheduler.clone();
    let task = name.clone();
    tokio::spawn(async move {
        if let Err(e) = scheduler.run_now(&task).await {
            warn!("Manual run of '{}' failed: {}", task, e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "task": name, "status": "triggered" })),
    ))
}

/// POST /tasks/:name/enable - re-arm a disabled task
pub async fn enable_task(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    ctx.scheduler.enable(&name).await?;
    Ok(Json(json!({ "task": name, "status": "enabled" })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// GET /sync/history - most recent sync runs, newest first
pub async fn sync_history(
    State(ctx): State<AppContext>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let runs = db::sync_runs::recent_runs(&ctx.pool, limit).await?;
    Ok(Json(json!({ "count": runs.len(), "runs": runs })))
}

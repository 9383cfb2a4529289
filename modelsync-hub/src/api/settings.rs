//! Runtime settings and sanity envelope endpoints.
//!
//! Updates are written to the settings table, then the in-memory
//! [`RuntimeSettings`] snapshot is reloaded so running tasks pick up
//! the new values without a restart. Sanity rule changes are pushed
//! into the reconciler the same way.

use axum::{extract::State, Json};
use modelsync_common::config::SanityRule;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

use crate::api::server::AppContext;
use crate::config::RuntimeSettings;
use crate::db;
use crate::error::{ApiError, ApiResult};

/// GET /settings - every runtime setting plus the sanity envelope
pub async fn get_settings(State(ctx): State<AppContext>) -> ApiResult<Json<Value>> {
    let mut settings = db::settings::get_all_settings(&ctx.pool).await?;
    // The envelope row is surfaced as sanity_rules, not as a raw setting
    settings.remove("sanity_envelope");
    let sanity_rules = ctx.reconciler.rules().await;
    Ok(Json(json!({
        "settings": settings,
        "sanity_rules": sanity_rules,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub sanity_rules: Option<Vec<SanityRule>>,
}

/// PUT /settings - update runtime settings and/or the sanity envelope
///
/// Every key is validated before anything is written; a bad request
/// changes nothing. Responds with the updated snapshot.
pub async fn update_settings(
    State(ctx): State<AppContext>,
    Json(req): Json<UpdateSettingsRequest>,
) -> ApiResult<Json<Value>> {
    for (key, value) in &req.settings {
        validate_setting(key, value).map_err(ApiError::BadRequest)?;
    }

    for (key, value) in &req.settings {
        db::settings::set_setting(&ctx.pool, key, value.clone()).await?;
        info!("Setting '{}' updated to '{}'", key, value);
    }

    if let Some(rules) = &req.sanity_rules {
        db::settings::set_sanity_rules(&ctx.pool, rules).await?;
        ctx.reconciler.set_rules(rules.clone()).await;
        info!("Sanity envelope updated ({} rules)", rules.len());
    }

    if !req.settings.is_empty() {
        let reloaded = RuntimeSettings::load(&ctx.pool).await?;
        *ctx.settings.write().await = reloaded;
    }

    get_settings(State(ctx)).await
}

/// Check a settings key is known and its value parses to the right
/// shape. Interval and threshold settings must be at least 1; the
/// realtime buffer sizes may be 0.
fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    let ok = match key {
        "sync_interval_seconds"
        | "cache_ttl_seconds"
        | "cache_stale_after_seconds"
        | "cache_cleanup_interval_seconds"
        | "health_check_interval_seconds"
        | "ws_heartbeat_interval_seconds"
        | "ws_heartbeat_timeout_seconds" => value.parse::<u64>().map(|v| v >= 1).unwrap_or(false),
        "max_consecutive_errors" => value.parse::<u32>().map(|v| v >= 1).unwrap_or(false),
        "sync_history_keep" | "ws_backfill_size" | "ws_outbound_queue_size" => {
            value.parse::<usize>().is_ok()
        }
        _ => return Err(format!("Unknown setting '{}'", key)),
    };

    if ok {
        Ok(())
    } else {
        Err(format!("Setting '{}' must be a positive integer", key))
    }
}

//! Model read endpoints and the manual override operation.
//!
//! Reads never answer 5xx because of upstream or store breakage: a
//! request is served from the tiered cache when possible, from the
//! canonical store on a cache miss, and from the bundled snapshot when
//! the store is unreachable. Every payload is labeled with where the
//! data came from and how current it is.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use modelsync_common::events::SyncEvent;
use modelsync_common::records::{DataSource, SourceKind, SourceObservation};
use modelsync_common::time;
use serde::Deserialize;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::api::server::AppContext;
use crate::cache::Freshness;
use crate::error::{ApiError, ApiResult};
use crate::{db, fallback, sync};

const MODELS_KEY: &str = "models:all";
const SUMMARY_KEY: &str = "status:summary";

fn model_key(id: &str) -> String {
    format!("models:{}", id)
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListModelsQuery {
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsResponse {
    pub data_source: DataSource,
    pub freshness: Freshness,
    pub count: usize,
    pub retrieved_at: DateTime<Utc>,
    pub models: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    pub data_source: DataSource,
    pub freshness: Freshness,
    pub retrieved_at: DateTime<Utc>,
    pub model: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummaryResponse {
    pub data_source: DataSource,
    pub freshness: Freshness,
    pub retrieved_at: DateTime<Utc>,
    pub summary: Value,
}

// ============================================================================
// Read Endpoints
// ============================================================================

/// GET /models - list canonical records, optionally filtered by provider
pub async fn list_models(
    State(ctx): State<AppContext>,
    Query(query): Query<ListModelsQuery>,
) -> Json<ModelsResponse> {
    let provider = query.provider.as_deref();

    if let Some((value, freshness)) = ctx.cache.get(MODELS_KEY) {
        if freshness == Freshness::Stale {
            spawn_list_revalidation(&ctx);
        }
        let models = filter_models(&value, provider);
        return Json(ModelsResponse {
            data_source: DataSource::Cached,
            freshness,
            count: count_of(&models),
            retrieved_at: time::now(),
            models,
        });
    }

    match db::records::list_records(&ctx.pool, None).await {
        Ok(records) => match serde_json::to_value(&records) {
            Ok(value) => {
                cache_set(&ctx, MODELS_KEY, value.clone()).await;
                let models = filter_models(&value, provider);
                Json(ModelsResponse {
                    data_source: DataSource::Live,
                    freshness: Freshness::Fresh,
                    count: count_of(&models),
                    retrieved_at: time::now(),
                    models,
                })
            }
            Err(e) => {
                error!("Failed to serialize records, serving snapshot: {}", e);
                fallback_list(provider)
            }
        },
        Err(e) => {
            error!("Store unavailable, serving bundled snapshot: {}", e);
            fallback_list(provider)
        }
    }
}

/// GET /models/:id - one canonical record
///
/// Unknown ids are a 404; that is client error, not upstream breakage.
pub async fn get_model(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<ModelResponse>> {
    let key = model_key(&id);

    if let Some((model, freshness)) = ctx.cache.get(&key) {
        if freshness == Freshness::Stale {
            spawn_model_revalidation(&ctx, &id);
        }
        return Ok(Json(ModelResponse {
            data_source: DataSource::Cached,
            freshness,
            retrieved_at: time::now(),
            model,
        }));
    }

    match db::records::get_record(&ctx.pool, &id).await {
        Ok(Some(record)) => {
            let model = serde_json::to_value(&record)
                .map_err(|e| ApiError::Internal(format!("record serialization: {}", e)))?;
            cache_set(&ctx, &key, model.clone()).await;
            Ok(Json(ModelResponse {
                data_source: DataSource::Live,
                freshness: Freshness::Fresh,
                retrieved_at: time::now(),
                model,
            }))
        }
        Ok(None) => Err(ApiError::NotFound(format!("Model '{}' not found", id))),
        Err(e) => {
            error!("Store unavailable for '{}', trying snapshot: {}", id, e);
            let record = fallback::records()
                .iter()
                .find(|r| r.entity_id == id)
                .ok_or_else(|| {
                    ApiError::NotFound(format!("Model '{}' not found in snapshot", id))
                })?;
            let model = serde_json::to_value(record)
                .map_err(|e| ApiError::Internal(format!("snapshot serialization: {}", e)))?;
            Ok(Json(ModelResponse {
                data_source: DataSource::Fallback,
                freshness: Freshness::Stale,
                retrieved_at: fallback::captured_at(),
                model,
            }))
        }
    }
}

/// GET /status - aggregate summary over the canonical store
pub async fn status_summary(State(ctx): State<AppContext>) -> Json<StatusSummaryResponse> {
    if let Some((summary, freshness)) = ctx.cache.get(SUMMARY_KEY) {
        if freshness == Freshness::Stale {
            spawn_summary_revalidation(&ctx);
        }
        return Json(StatusSummaryResponse {
            data_source: DataSource::Cached,
            freshness,
            retrieved_at: time::now(),
            summary,
        });
    }

    match sync::build_status_summary(&ctx.pool).await {
        Ok(summary) => {
            cache_set(&ctx, SUMMARY_KEY, summary.clone()).await;
            Json(StatusSummaryResponse {
                data_source: DataSource::Live,
                freshness: Freshness::Fresh,
                retrieved_at: time::now(),
                summary,
            })
        }
        Err(e) => {
            error!("Store unavailable, summarizing bundled snapshot: {}", e);
            Json(StatusSummaryResponse {
                data_source: DataSource::Fallback,
                freshness: Freshness::Stale,
                retrieved_at: fallback::captured_at(),
                summary: sync::summarize_records(fallback::records()),
            })
        }
    }
}

// ============================================================================
// Admin Override
// ============================================================================

/// POST /models/:id/override - apply operator-set field values
///
/// The body is a map of canonical field names to values. Each entry
/// becomes a manual-kind claim, which outranks every automated source
/// in reconciliation. Only existing models can be overridden.
pub async fn override_model(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(fields): Json<BTreeMap<String, Value>>,
) -> ApiResult<Json<Value>> {
    if fields.is_empty() {
        return Err(ApiError::BadRequest("No fields provided".to_string()));
    }

    let record = db::records::get_record(&ctx.pool, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Model '{}' not found", id)))?;

    let mut obs = SourceObservation::new(
        record.display_name.clone(),
        SourceKind::Manual,
        fields,
        time::now(),
    );
    obs.entity_id = Some(id.clone());

    info!("Manual override for '{}' touching {} field(s)", id, obs.fields.len());
    let result = ctx
        .reconciler
        .apply(&ctx.pool, &id, std::slice::from_ref(&obs))
        .await?;

    if let Err(e) = db::observations::insert_observation(&ctx.pool, &obs).await {
        warn!("Failed to audit override for '{}': {}", id, e);
    }

    if !result.changed_fields.is_empty() {
        ctx.events.emit_lossy(SyncEvent::ModelUpdated {
            entity_id: id.clone(),
            provider_id: result.record.provider_id.clone(),
            changed_fields: result.changed_fields.clone(),
            timestamp: result.record.updated_at,
        });
        for pattern in ["models:*", "status:*"] {
            let removed = ctx.cache.invalidate(pattern);
            ctx.events.emit_lossy(SyncEvent::CacheInvalidated {
                pattern: pattern.to_string(),
                entries_removed: removed,
                timestamp: time::now(),
            });
        }
    }

    let rejected: Vec<Value> = result
        .rejected
        .iter()
        .map(|r| {
            json!({
                "field": r.field,
                "value": r.value,
                "source": r.source_kind.as_str(),
                "reason": r.reason.as_str(),
            })
        })
        .collect();

    Ok(Json(json!({
        "entity_id": id,
        "changed_fields": result.changed_fields,
        "rejected": rejected,
        "record": serde_json::to_value(&result.record)
            .map_err(|e| ApiError::Internal(format!("record serialization: {}", e)))?,
    })))
}

// ============================================================================
// Helpers
// ============================================================================

fn filter_models(models: &Value, provider: Option<&str>) -> Value {
    match (models.as_array(), provider) {
        (Some(arr), Some(p)) => Value::Array(
            arr.iter()
                .filter(|m| m["provider_id"] == p)
                .cloned()
                .collect(),
        ),
        _ => models.clone(),
    }
}

fn count_of(models: &Value) -> usize {
    models.as_array().map(|a| a.len()).unwrap_or(0)
}

fn fallback_list(provider: Option<&str>) -> Json<ModelsResponse> {
    let value = serde_json::to_value(fallback::records()).unwrap_or_else(|_| json!([]));
    let models = filter_models(&value, provider);
    Json(ModelsResponse {
        data_source: DataSource::Fallback,
        freshness: Freshness::Stale,
        count: count_of(&models),
        retrieved_at: fallback::captured_at(),
        models,
    })
}

async fn cache_set(ctx: &AppContext, key: &str, value: Value) {
    let (ttl, stale_after) = {
        let settings = ctx.settings.read().await;
        (settings.cache_ttl(), settings.cache_stale_after())
    };
    ctx.cache.set(key, value, ttl, stale_after);
}

/// Refresh the model list behind a stale cache hit. The cache hands out
/// at most one revalidation slot per key, so concurrent stale reads do
/// not stampede the store.
fn spawn_list_revalidation(ctx: &AppContext) {
    let Some(guard) = ctx.cache.try_begin_revalidation(MODELS_KEY) else {
        return;
    };
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let _guard = guard;
        match db::records::list_records(&ctx.pool, None).await {
            Ok(records) => {
                if let Ok(value) = serde_json::to_value(&records) {
                    cache_set(&ctx, MODELS_KEY, value).await;
                    debug!("Revalidated '{}' in background", MODELS_KEY);
                }
            }
            Err(e) => warn!("Background revalidation of '{}' failed: {}", MODELS_KEY, e),
        }
    });
}

fn spawn_model_revalidation(ctx: &AppContext, id: &str) {
    let key = model_key(id);
    let Some(guard) = ctx.cache.try_begin_revalidation(&key) else {
        return;
    };
    let ctx = ctx.clone();
    let id = id.to_string();
    tokio::spawn(async move {
        let _guard = guard;
        match db::records::get_record(&ctx.pool, &id).await {
            Ok(Some(record)) => {
                if let Ok(value) = serde_json::to_value(&record) {
                    cache_set(&ctx, &key, value).await;
                    debug!("Revalidated '{}' in background", key);
                }
            }
            // A deleted record just ages out of the cache
            Ok(None) => debug!("Model '{}' gone from store, leaving entry to expire", id),
            Err(e) => warn!("Background revalidation of '{}' failed: {}", key, e),
        }
    });
}

fn spawn_summary_revalidation(ctx: &AppContext) {
    let Some(guard) = ctx.cache.try_begin_revalidation(SUMMARY_KEY) else {
        return;
    };
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let _guard = guard;
        match sync::build_status_summary(&ctx.pool).await {
            Ok(summary) => {
                cache_set(&ctx, SUMMARY_KEY, summary).await;
                debug!("Revalidated '{}' in background", SUMMARY_KEY);
            }
            Err(e) => warn!("Background revalidation of '{}' failed: {}", SUMMARY_KEY, e),
        }
    });
}

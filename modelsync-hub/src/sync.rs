//! Synchronization pipeline: fetch, extract, reconcile, publish.
//!
//! One run fetches upstream data (JSON envelope first, page scrape as
//! fallback), reconciles every observation into the canonical store,
//! invalidates the read cache, emits change events, and records itself
//! in the run history. Failures short of a run-ending error are carried
//! in the run's error list rather than aborting it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use modelsync_common::events::{EventBus, SyncEvent};
use modelsync_common::records::{fields, CanonicalRecord, SourceObservation};
use modelsync_common::{time, Error, Result};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::TieredCache;
use crate::config::RuntimeSettings;
use crate::db::{self, sync_runs::SyncRun};
use crate::reconcile::Reconciler;
use crate::upstream::UpstreamClient;
use crate::{extract, fallback};

/// Everything one sync run needs, cheap to clone into task closures.
#[derive(Clone)]
pub struct SyncContext {
    pub pool: SqlitePool,
    pub cache: Arc<TieredCache<Value>>,
    pub events: EventBus,
    pub reconciler: Arc<Reconciler>,
    pub upstream: Arc<UpstreamClient>,
    pub settings: Arc<RwLock<RuntimeSettings>>,
}

/// Run one full synchronization pass.
///
/// Returns the recorded run on success. A returned error means the run
/// produced no data at all (both fetch paths failed, or the store broke);
/// the failed run is still written to history before returning.
pub async fn run_model_sync(ctx: &SyncContext) -> Result<SyncRun> {
    let run_id = Uuid::new_v4();
    let started_at = time::now();
    let started = Instant::now();
    let mut errors: Vec<String> = Vec::new();

    info!("Starting model sync run {}", run_id);

    let (observations, strategy) = match fetch_observations(ctx, &mut errors).await {
        Ok(pair) => pair,
        Err(e) => {
            errors.push(e.to_string());
            let run = failed_run(run_id, started_at, started.elapsed().as_millis() as u64, errors);
            persist_run(ctx, &run).await;
            return Err(e);
        }
    };

    // Group claims per entity so one reconciliation sees them all
    let mut by_entity: BTreeMap<String, Vec<SourceObservation>> = BTreeMap::new();
    for obs in observations {
        if let Some(entity_id) = obs.entity_id.clone() {
            by_entity.entry(entity_id).or_default().push(obs);
        }
    }

    let records_total = by_entity.len();
    let mut records_created = 0;
    let mut records_updated = 0;

    for (entity_id, entity_obs) in &by_entity {
        match ctx.reconciler.apply(&ctx.pool, entity_id, entity_obs).await {
            Ok(outcome) => {
                for obs in entity_obs {
                    if let Err(e) = db::observations::insert_observation(&ctx.pool, obs).await {
                        warn!("Failed to audit observation for '{}': {}", entity_id, e);
                        errors.push(format!("{}: {}", entity_id, e));
                    }
                }
                if outcome.created {
                    records_created += 1;
                    ctx.events.emit_lossy(SyncEvent::ModelCreated {
                        entity_id: outcome.record.entity_id.clone(),
                        provider_id: outcome.record.provider_id.clone(),
                        display_name: outcome.record.display_name.clone(),
                        timestamp: outcome.record.created_at,
                    });
                } else if !outcome.changed_fields.is_empty() {
                    records_updated += 1;
                    ctx.events.emit_lossy(SyncEvent::ModelUpdated {
                        entity_id: outcome.record.entity_id.clone(),
                        provider_id: outcome.record.provider_id.clone(),
                        changed_fields: outcome.changed_fields.clone(),
                        timestamp: outcome.record.updated_at,
                    });
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipped entity '{}': {}", entity_id, e);
                errors.push(format!("{}: {}", entity_id, e));
            }
            Err(e) => {
                // Store failure ends the run
                errors.push(e.to_string());
                let run =
                    failed_run(run_id, started_at, started.elapsed().as_millis() as u64, errors);
                persist_run(ctx, &run).await;
                return Err(e);
            }
        }
    }

    for pattern in ["models:*", "status:*"] {
        let removed = ctx.cache.invalidate(pattern);
        ctx.events.emit_lossy(SyncEvent::CacheInvalidated {
            pattern: pattern.to_string(),
            entries_removed: removed,
            timestamp: time::now(),
        });
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    let data_quality = if strategy.as_deref() == Some("table_fallback") {
        "fallback"
    } else if errors.is_empty() {
        "complete"
    } else {
        "partial"
    }
    .to_string();

    ctx.events.emit_lossy(SyncEvent::SyncCompleted {
        records_total,
        records_created,
        records_updated,
        data_quality: data_quality.clone(),
        duration_ms,
        timestamp: time::now(),
    });

    let run = SyncRun {
        run_id,
        task: "model-sync".to_string(),
        success: true,
        strategy,
        records_total,
        records_created,
        records_updated,
        data_quality,
        errors,
        started_at,
        duration_ms,
    };
    persist_run(ctx, &run).await;

    info!(
        "Sync run {} done: {} records ({} created, {} updated, quality {}) in {}ms",
        run_id, records_total, records_created, records_updated, run.data_quality, duration_ms
    );
    Ok(run)
}

/// Fetch observations, preferring the JSON envelope over the page scrape.
async fn fetch_observations(
    ctx: &SyncContext,
    errors: &mut Vec<String>,
) -> Result<(Vec<SourceObservation>, Option<String>)> {
    match ctx.upstream.fetch_api_observations().await {
        Ok(observations) => return Ok((observations, Some("api_envelope".to_string()))),
        Err(e) => {
            warn!("API fetch failed, falling back to page scrape: {}", e);
            errors.push(format!("api: {}", e));
        }
    }

    let html = ctx.upstream.fetch_page().await?;
    let result = extract::extract(&html);
    if !result.success {
        return Err(Error::ExtractionFailed(
            "page yielded no extractable models".to_string(),
        ));
    }
    Ok((
        result.observations,
        result.strategy.map(|s| s.as_str().to_string()),
    ))
}

fn failed_run(
    run_id: Uuid,
    started_at: chrono::DateTime<chrono::Utc>,
    duration_ms: u64,
    errors: Vec<String>,
) -> SyncRun {
    SyncRun {
        run_id,
        task: "model-sync".to_string(),
        success: false,
        strategy: None,
        records_total: 0,
        records_created: 0,
        records_updated: 0,
        data_quality: "failed".to_string(),
        errors,
        started_at,
        duration_ms,
    }
}

/// Write the run to history and trim it to the configured length.
async fn persist_run(ctx: &SyncContext, run: &SyncRun) {
    if let Err(e) = db::sync_runs::record_run(&ctx.pool, run).await {
        warn!("Failed to record sync run {}: {}", run.run_id, e);
        return;
    }
    let keep = ctx.settings.read().await.sync_history_keep;
    if let Err(e) = db::sync_runs::prune_to_last(&ctx.pool, keep as i64).await {
        warn!("Failed to prune sync history: {}", e);
    }
}

/// Seed the canonical store from the bundled snapshot when it is empty.
///
/// Keeps the read API non-empty on a fresh database before the first
/// sync lands. Snapshot entries are config-kind observations, so any
/// later live source outranks them.
pub async fn seed_from_snapshot_if_empty(ctx: &SyncContext) -> Result<usize> {
    if db::records::count_records(&ctx.pool).await? > 0 {
        return Ok(0);
    }

    let mut seeded = 0;
    for obs in fallback::observations() {
        let Some(entity_id) = obs.entity_id.clone() else {
            continue;
        };
        match ctx
            .reconciler
            .apply(&ctx.pool, &entity_id, std::slice::from_ref(&obs))
            .await
        {
            Ok(_) => seeded += 1,
            Err(e) => warn!("Snapshot seed skipped '{}': {}", entity_id, e),
        }
    }

    info!("Seeded {} baseline records from bundled snapshot", seeded);
    Ok(seeded)
}

/// Aggregate view over the canonical store for the status endpoints.
pub async fn build_status_summary(pool: &SqlitePool) -> Result<Value> {
    let records = db::records::list_records(pool, None).await?;
    Ok(summarize_records(&records))
}

/// Summarize a record set. Averages are rounded to one decimal place.
///
/// Pure so the read API can also summarize the bundled snapshot when
/// the store is unreachable.
pub fn summarize_records(records: &[CanonicalRecord]) -> Value {
    let total_models = records.len();
    let active_models = records.iter().filter(|r| r.active).count();
    let providers: BTreeSet<&str> = records.iter().map(|r| r.provider_id.as_str()).collect();

    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        if let Some(category) = record
            .field(fields::CATEGORY)
            .and_then(|f| f.value.as_str())
        {
            *categories.entry(category.to_string()).or_default() += 1;
        }
    }

    json!({
        "total_models": total_models,
        "active_models": active_models,
        "providers": providers.len(),
        "avg_intelligence_score": rounded_avg(records, fields::INTELLIGENCE_SCORE),
        "avg_output_speed": rounded_avg(records, fields::OUTPUT_SPEED),
        "categories": categories,
        "generated_at": time::now(),
    })
}

fn rounded_avg(records: &[CanonicalRecord], field: &str) -> Option<f64> {
    let values: Vec<f64> = records.iter().filter_map(|r| r.numeric_field(field)).collect();
    if values.is_empty() {
        return None;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    Some((avg * 10.0).round() / 10.0)
}

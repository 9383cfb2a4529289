//! Sync run history database operations

use chrono::{DateTime, Utc};
use modelsync_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// One persisted sync run, as returned by `GET /sync/history`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub run_id: Uuid,
    /// Task name that produced the run ("model-sync")
    pub task: String,
    pub success: bool,
    /// Extraction strategy that produced the data, when known
    pub strategy: Option<String>,
    pub records_total: usize,
    pub records_created: usize,
    pub records_updated: usize,
    /// "complete", "partial", "fallback" or "failed"
    pub data_quality: String,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Persist one run to the history table
pub async fn record_run(pool: &SqlitePool, run: &SyncRun) -> Result<()> {
    let errors = serde_json::to_string(&run.errors)
        .map_err(|e| Error::Internal(format!("Failed to serialize errors: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO sync_runs (
            run_id, task, success, strategy, records_total, records_created,
            records_updated, data_quality, errors, started_at, duration_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.run_id.to_string())
    .bind(&run.task)
    .bind(run.success as i64)
    .bind(&run.strategy)
    .bind(run.records_total as i64)
    .bind(run.records_created as i64)
    .bind(run.records_updated as i64)
    .bind(&run.data_quality)
    .bind(&errors)
    .bind(run.started_at.to_rfc3339())
    .bind(run.duration_ms as i64)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent runs, newest first
pub async fn recent_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<SyncRun>> {
    let rows = sqlx::query(
        r#"
        SELECT run_id, task, success, strategy, records_total, records_created,
               records_updated, data_quality, errors, started_at, duration_ms
        FROM sync_runs
        ORDER BY started_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let run_id: String = row.get("run_id");
            let run_id = Uuid::parse_str(&run_id)
                .map_err(|e| Error::Internal(format!("Failed to parse run_id: {}", e)))?;

            let errors: String = row.get("errors");
            let errors: Vec<String> = serde_json::from_str(&errors)
                .map_err(|e| Error::Internal(format!("Failed to deserialize errors: {}", e)))?;

            let started_at: String = row.get("started_at");
            let started_at = chrono::DateTime::parse_from_rfc3339(&started_at)
                .map_err(|e| Error::Internal(format!("Failed to parse started_at: {}", e)))?
                .with_timezone(&chrono::Utc);

            Ok(SyncRun {
                run_id,
                task: row.get("task"),
                success: row.get::<i64, _>("success") != 0,
                strategy: row.get("strategy"),
                records_total: row.get::<i64, _>("records_total") as usize,
                records_created: row.get::<i64, _>("records_created") as usize,
                records_updated: row.get::<i64, _>("records_updated") as usize,
                data_quality: row.get("data_quality"),
                errors,
                started_at,
                duration_ms: row.get::<i64, _>("duration_ms") as u64,
            })
        })
        .collect()
}

/// Delete all but the newest `keep` runs
///
/// Returns the number of pruned rows.
pub async fn prune_to_last(pool: &SqlitePool, keep: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM sync_runs
        WHERE run_id NOT IN (
            SELECT run_id FROM sync_runs
            ORDER BY started_at DESC
            LIMIT ?
        )
        "#,
    )
    .bind(keep)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

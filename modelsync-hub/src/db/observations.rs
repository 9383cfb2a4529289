//! Observation audit log database operations
//!
//! Observations are append-only. Every claim a source makes about an entity
//! lands here before reconciliation, so precedence decisions and anomaly
//! rejections can be audited after the fact.

use modelsync_common::records::{SourceKind, SourceObservation};
use modelsync_common::{Error, Result};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Append one observation to the audit log
///
/// Returns the rowid of the inserted observation.
pub async fn insert_observation(pool: &SqlitePool, obs: &SourceObservation) -> Result<i64> {
    let entity_id = obs
        .entity_id
        .as_deref()
        .ok_or_else(|| Error::InvalidInput("Observation has no entity id".to_string()))?;
    let fields = serde_json::to_string(&obs.fields)
        .map_err(|e| Error::Internal(format!("Failed to serialize fields: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO observations (
            entity_id, raw_name, source_kind, fields, confidence, observed_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entity_id)
    .bind(&obs.raw_name)
    .bind(obs.source_kind.as_str())
    .bind(&fields)
    .bind(obs.confidence)
    .bind(obs.observed_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Most recent observations for an entity, newest first
pub async fn list_for_entity(
    pool: &SqlitePool,
    entity_id: &str,
    limit: i64,
) -> Result<Vec<SourceObservation>> {
    let rows = sqlx::query(
        r#"
        SELECT entity_id, raw_name, source_kind, fields, confidence, observed_at
        FROM observations
        WHERE entity_id = ?
        ORDER BY observed_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(entity_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let fields: String = row.get("fields");
            let fields: BTreeMap<String, Value> = serde_json::from_str(&fields)
                .map_err(|e| Error::Internal(format!("Failed to deserialize fields: {}", e)))?;

            let source_kind: String = row.get("source_kind");
            let source_kind = SourceKind::from_str(&source_kind)?;

            let observed_at: String = row.get("observed_at");
            let observed_at = chrono::DateTime::parse_from_rfc3339(&observed_at)
                .map_err(|e| Error::Internal(format!("Failed to parse observed_at: {}", e)))?
                .with_timezone(&chrono::Utc);

            Ok(SourceObservation {
                entity_id: Some(row.get("entity_id")),
                raw_name: row.get("raw_name"),
                source_kind,
                fields,
                confidence: row.get("confidence"),
                observed_at,
            })
        })
        .collect()
}

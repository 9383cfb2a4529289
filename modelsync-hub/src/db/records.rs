//! Canonical record database operations

use modelsync_common::records::{CanonicalRecord, FieldValue};
use modelsync_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::BTreeMap;

/// Insert or update a canonical record
///
/// The provenance map is stored as JSON in the `fields` column.
pub async fn upsert_record(pool: &SqlitePool, record: &CanonicalRecord) -> Result<()> {
    let fields = serde_json::to_string(&record.fields)
        .map_err(|e| Error::Internal(format!("Failed to serialize fields: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO records (
            entity_id, display_name, provider_id, fields, active,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(entity_id) DO UPDATE SET
            display_name = excluded.display_name,
            provider_id = excluded.provider_id,
            fields = excluded.fields,
            active = excluded.active,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.entity_id)
    .bind(&record.display_name)
    .bind(&record.provider_id)
    .bind(&fields)
    .bind(record.active as i64)
    .bind(record.created_at.to_rfc3339())
    .bind(record.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a single canonical record by entity id
pub async fn get_record(pool: &SqlitePool, entity_id: &str) -> Result<Option<CanonicalRecord>> {
    let row = sqlx::query(
        r#"
        SELECT entity_id, display_name, provider_id, fields, active,
               created_at, updated_at
        FROM records
        WHERE entity_id = ?
        "#,
    )
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| record_from_row(&row)).transpose()
}

/// List active canonical records, optionally filtered by provider
pub async fn list_records(
    pool: &SqlitePool,
    provider: Option<&str>,
) -> Result<Vec<CanonicalRecord>> {
    let rows = match provider {
        Some(provider) => {
            sqlx::query(
                r#"
                SELECT entity_id, display_name, provider_id, fields, active,
                       created_at, updated_at
                FROM records
                WHERE active = 1 AND provider_id = ?
                ORDER BY entity_id
                "#,
            )
            .bind(provider)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT entity_id, display_name, provider_id, fields, active,
                       created_at, updated_at
                FROM records
                WHERE active = 1
                ORDER BY entity_id
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(record_from_row).collect()
}

/// Count active records
pub async fn count_records(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE active = 1")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn record_from_row(row: &SqliteRow) -> Result<CanonicalRecord> {
    let fields: String = row.get("fields");
    let fields: BTreeMap<String, FieldValue> = serde_json::from_str(&fields)
        .map_err(|e| Error::Internal(format!("Failed to deserialize fields: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    let updated_at: String = row.get("updated_at");
    let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| Error::Internal(format!("Failed to parse updated_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    Ok(CanonicalRecord {
        entity_id: row.get("entity_id"),
        display_name: row.get("display_name"),
        provider_id: row.get("provider_id"),
        fields,
        active: row.get::<i64, _>("active") != 0,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_test_db;
    use modelsync_common::records::SourceKind;
    use serde_json::json;

    fn sample_record(entity_id: &str, provider: &str) -> CanonicalRecord {
        let mut record = CanonicalRecord::new(entity_id, entity_id, provider);
        record.fields.insert(
            "output_speed".to_string(),
            FieldValue {
                value: json!(105.3),
                source_kind: SourceKind::Api,
                confidence: 0.95,
                verified_at: chrono::Utc::now(),
            },
        );
        record
    }

    #[tokio::test]
    async fn test_upsert_and_get_roundtrip() {
        let pool = setup_test_db().await;
        let record = sample_record("gpt-4o", "openai");

        upsert_record(&pool, &record).await.unwrap();

        let loaded = get_record(&pool, "gpt-4o").await.unwrap().unwrap();
        assert_eq!(loaded.entity_id, "gpt-4o");
        assert_eq!(loaded.provider_id, "openai");
        assert!(loaded.active);
        let speed = loaded.fields.get("output_speed").unwrap();
        assert_eq!(speed.value, json!(105.3));
        assert_eq!(speed.source_kind, SourceKind::Api);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let pool = setup_test_db().await;
        let loaded = get_record(&pool, "nope").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let pool = setup_test_db().await;
        let mut record = sample_record("gpt-4o", "openai");
        upsert_record(&pool, &record).await.unwrap();

        record.display_name = "GPT-4o".to_string();
        record
            .fields
            .get_mut("output_speed")
            .unwrap()
            .value = json!(120.0);
        upsert_record(&pool, &record).await.unwrap();

        let loaded = get_record(&pool, "gpt-4o").await.unwrap().unwrap();
        assert_eq!(loaded.display_name, "GPT-4o");
        assert_eq!(
            loaded.fields.get("output_speed").unwrap().value,
            json!(120.0)
        );

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1, "Upsert must not create duplicates");
    }

    #[tokio::test]
    async fn test_list_records_filters_by_provider() {
        let pool = setup_test_db().await;
        upsert_record(&pool, &sample_record("gpt-4o", "openai"))
            .await
            .unwrap();
        upsert_record(&pool, &sample_record("claude-3-5-sonnet", "anthropic"))
            .await
            .unwrap();

        let all = list_records(&pool, None).await.unwrap();
        assert_eq!(all.len(), 2);
        // Ordered by entity_id
        assert_eq!(all[0].entity_id, "claude-3-5-sonnet");

        let openai = list_records(&pool, Some("openai")).await.unwrap();
        assert_eq!(openai.len(), 1);
        assert_eq!(openai[0].entity_id, "gpt-4o");

        assert_eq!(count_records(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_inactive_records_excluded_from_list() {
        let pool = setup_test_db().await;
        let mut record = sample_record("retired-model", "other");
        record.active = false;
        upsert_record(&pool, &record).await.unwrap();

        assert!(list_records(&pool, None).await.unwrap().is_empty());
        // Direct lookup still works
        assert!(get_record(&pool, "retired-model").await.unwrap().is_some());
    }
}

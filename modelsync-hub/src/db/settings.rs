//! Settings database operations
//!
//! Key-value accessors over the `settings` table. Values are stored as
//! strings; the sanity envelope is stored as a JSON array under the
//! `sanity_envelope` key.

use modelsync_common::config::SanityRule;
use modelsync_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::collections::BTreeMap;

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

/// All settings as a sorted key/value map
pub async fn get_all_settings(db: &Pool<Sqlite>) -> Result<BTreeMap<String, String>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT key, value FROM settings ORDER BY key")
            .fetch_all(db)
            .await
            .map_err(Error::Database)?;

    Ok(rows.into_iter().collect())
}

/// Sanity envelope from the database, if one has been stored
pub async fn get_sanity_rules(db: &Pool<Sqlite>) -> Result<Option<Vec<SanityRule>>> {
    let json: Option<String> = get_setting(db, "sanity_envelope").await?;
    match json {
        Some(json) => {
            let rules: Vec<SanityRule> = serde_json::from_str(&json)
                .map_err(|e| Error::Config(format!("Parse sanity_envelope failed: {}", e)))?;
            Ok(Some(rules))
        }
        None => Ok(None),
    }
}

/// Store the sanity envelope as JSON
pub async fn set_sanity_rules(db: &Pool<Sqlite>, rules: &[SanityRule]) -> Result<()> {
    let json = serde_json::to_string(rules)
        .map_err(|e| Error::Internal(format!("Serialize sanity_envelope failed: {}", e)))?;
    set_setting(db, "sanity_envelope", json).await
}

// ============================================================================
// Tests
// ============================================================================

//! Database access for modelsync-hub

pub mod observations;
pub mod records;
pub mod settings;
pub mod sync_runs;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Connects to the SQLite database at `db_path`, creating it (and its
/// parent directory) when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize hub tables
///
/// Creates records, observations, sync_runs and settings tables if they
/// don't exist. Public so integration tests can run against an in-memory
/// pool.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Canonical record store, provenance map as JSON
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            entity_id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            fields TEXT NOT NULL DEFAULT '{}',
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_provider ON records(provider_id)")
        .execute(pool)
        .await?;

    // Append-only audit log of source observations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            raw_name TEXT NOT NULL,
            source_kind TEXT NOT NULL,
            fields TEXT NOT NULL DEFAULT '{}',
            confidence REAL NOT NULL,
            observed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_observations_entity ON observations(entity_id, observed_at)",
    )
    .execute(pool)
    .await?;

    // Sync run history
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            run_id TEXT PRIMARY KEY,
            task TEXT NOT NULL,
            success INTEGER NOT NULL,
            strategy TEXT,
            records_total INTEGER NOT NULL DEFAULT 0,
            records_created INTEGER NOT NULL DEFAULT 0,
            records_updated INTEGER NOT NULL DEFAULT 0,
            data_quality TEXT NOT NULL DEFAULT 'failed',
            errors TEXT NOT NULL DEFAULT '[]',
            started_at TEXT NOT NULL,
            duration_ms INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Runtime-tunable settings
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (records, observations, sync_runs, settings)");

    Ok(())
}

#[cfg(test)]
pub(crate) async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    init_tables(&pool).await.unwrap();
    pool
}

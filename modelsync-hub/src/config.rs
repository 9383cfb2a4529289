//! Runtime configuration for the hub.
//!
//! Two tiers: the TOML bootstrap (database path, port, upstream endpoints,
//! logging) lives in `modelsync_common::config` and cannot change while
//! running; everything tunable at runtime is database-first in the
//! `settings` table. Missing settings are initialized with built-in
//! defaults and written back so the table is always complete.
//!
//! Priority: command line > environment > TOML > database settings >
//! built-in defaults.

use modelsync_common::config::{default_sanity_rules, SanityRule};
use modelsync_common::Result;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::info;

use crate::db;

/// Runtime settings loaded from the database
///
/// Every value has a built-in default. Missing rows are seeded with the
/// default on first load.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    // === Sync pipeline ===
    pub sync_interval_seconds: u64,
    pub max_consecutive_errors: u32,
    pub sync_history_keep: usize,

    // === Read cache ===
    pub cache_ttl_seconds: u64,
    pub cache_stale_after_seconds: u64,
    pub cache_cleanup_interval_seconds: u64,

    // === Health summary ===
    pub health_check_interval_seconds: u64,

    // === Realtime distribution ===
    pub ws_heartbeat_interval_seconds: u64,
    pub ws_heartbeat_timeout_seconds: u64,
    pub ws_backfill_size: usize,
    pub ws_outbound_queue_size: usize,
}

impl RuntimeSettings {
    /// Load runtime settings, writing defaults back for any missing key.
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let settings = Self {
            sync_interval_seconds: setting(pool, "sync_interval_seconds", 300u64).await?,
            max_consecutive_errors: setting(pool, "max_consecutive_errors", 5u32).await?,
            sync_history_keep: setting(pool, "sync_history_keep", 20usize).await?,

            cache_ttl_seconds: setting(pool, "cache_ttl_seconds", 3600u64).await?,
            cache_stale_after_seconds: setting(pool, "cache_stale_after_seconds", 1800u64).await?,
            cache_cleanup_interval_seconds: setting(pool, "cache_cleanup_interval_seconds", 600u64)
                .await?,

            health_check_interval_seconds: setting(pool, "health_check_interval_seconds", 60u64)
                .await?,

            ws_heartbeat_interval_seconds: setting(pool, "ws_heartbeat_interval_seconds", 30u64)
                .await?,
            ws_heartbeat_timeout_seconds: setting(pool, "ws_heartbeat_timeout_seconds", 90u64)
                .await?,
            ws_backfill_size: setting(pool, "ws_backfill_size", 50usize).await?,
            ws_outbound_queue_size: setting(pool, "ws_outbound_queue_size", 64usize).await?,
        };

        info!("Loaded runtime settings from database");
        Ok(settings)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn cache_stale_after(&self) -> Duration {
        Duration::from_secs(self.cache_stale_after_seconds)
    }

    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_interval_seconds)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_timeout_seconds)
    }
}

async fn setting<T>(pool: &SqlitePool, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + std::fmt::Display + Clone,
    T::Err: std::fmt::Display,
{
    match db::settings::get_setting(pool, key).await? {
        Some(value) => Ok(value),
        None => {
            info!(
                "Setting '{}' not found in database, using default: {}",
                key, default
            );
            db::settings::set_setting(pool, key, default.clone()).await?;
            Ok(default)
        }
    }
}

/// Load the sanity envelope, seeding `bootstrap` when none is stored.
///
/// `bootstrap` comes from the TOML file (or the built-in rules); once
/// seeded, operator edits in the settings table win on every later load.
pub async fn load_sanity_rules(
    pool: &SqlitePool,
    bootstrap: &[SanityRule],
) -> Result<Vec<SanityRule>> {
    match db::settings::get_sanity_rules(pool).await? {
        Some(rules) => Ok(rules),
        None => {
            let rules = if bootstrap.is_empty() {
                default_sanity_rules()
            } else {
                bootstrap.to_vec()
            };
            info!("Sanity envelope not found in database, seeding {} rules", rules.len());
            db::settings::set_sanity_rules(pool, &rules).await?;
            Ok(rules)
        }
    }
}

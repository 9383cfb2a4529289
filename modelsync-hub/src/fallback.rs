//! Bundled snapshot served when both live data and cache are unavailable.
//!
//! The snapshot is compiled into the binary and parsed once. Its entries
//! flow through the same observation and merge machinery as live data,
//! so the resulting records carry honest provenance: source kind
//! `config`, baseline confidence, and verification timestamps pinned to
//! the capture date rather than process start.

use chrono::{DateTime, Utc};
use modelsync_common::config::default_sanity_rules;
use modelsync_common::records::{CanonicalRecord, SourceKind, SourceObservation};
use modelsync_common::time;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::extract::observation_from_value;
use crate::reconcile::merge;

static SNAPSHOT_JSON: &str = include_str!("fallback_snapshot.json");

#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    metadata: SnapshotMetadata,
    models: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotMetadata {
    #[serde(default)]
    captured_at: String,
    #[serde(default)]
    source: String,
}

static SNAPSHOT: Lazy<SnapshotFile> = Lazy::new(|| {
    serde_json::from_str(SNAPSHOT_JSON).unwrap_or_else(|e| {
        error!("Bundled fallback snapshot is invalid: {}", e);
        SnapshotFile::default()
    })
});

static RECORDS: Lazy<Vec<CanonicalRecord>> = Lazy::new(|| {
    let captured = captured_at();
    let rules = default_sanity_rules();
    let mut records = Vec::new();

    for obs in observations() {
        let Some(entity_id) = obs.entity_id.clone() else {
            continue;
        };
        match merge(&entity_id, None, std::slice::from_ref(&obs), &rules) {
            Ok(mut result) => {
                // The snapshot was verified at capture time, not at boot
                for field in result.record.fields.values_mut() {
                    field.verified_at = captured;
                }
                result.record.created_at = captured;
                result.record.updated_at = captured;
                records.push(result.record);
            }
            Err(e) => warn!("Skipping snapshot entry '{}': {}", entity_id, e),
        }
    }

    info!(
        source = %SNAPSHOT.metadata.source,
        "Loaded {} models from bundled fallback snapshot",
        records.len()
    );
    records
});

/// When the bundled snapshot was captured.
pub fn captured_at() -> DateTime<Utc> {
    SNAPSHOT
        .metadata
        .captured_at
        .parse::<DateTime<Utc>>()
        .unwrap_or_else(|_| time::now())
}

/// Snapshot entries as low-precedence config observations.
///
/// Used to seed an empty database on first boot; any live source
/// outranks these at reconciliation.
pub fn observations() -> Vec<SourceObservation> {
    let observed_at = captured_at();
    SNAPSHOT
        .models
        .iter()
        .filter_map(|raw| observation_from_value(raw, SourceKind::Config, observed_at))
        .collect()
}

/// Snapshot entries as ready-to-serve canonical records.
pub fn records() -> &'static [CanonicalRecord] {
    &RECORDS
}

//! Shared record and observation types
//!
//! `SourceObservation` is one source's immutable claim about one entity;
//! `CanonicalRecord` is the merged state with field-level provenance. Only
//! the reconciler mutates canonical records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::slug;

/// Well-known canonical field names.
pub mod fields {
    pub const INTELLIGENCE_SCORE: &str = "intelligence_score";
    pub const OUTPUT_SPEED: &str = "output_speed";
    pub const PRICE_INPUT: &str = "price_input";
    pub const PRICE_OUTPUT: &str = "price_output";
    pub const CONTEXT_WINDOW: &str = "context_window";
    pub const RANK: &str = "rank";
    pub const CATEGORY: &str = "category";
    /// Claimed provider; lifted to `CanonicalRecord::provider_id` during
    /// reconciliation rather than stored as a provenance field
    pub const PROVIDER: &str = "provider";
}

/// Where an observation came from.
///
/// Precedence for reconciliation: `manual` > `api` > `scrape` > `config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Api,
    Scrape,
    Config,
    Manual,
}

impl SourceKind {
    /// Merge precedence; higher wins regardless of recency.
    pub fn precedence(&self) -> u8 {
        match self {
            SourceKind::Manual => 3,
            SourceKind::Api => 2,
            SourceKind::Scrape => 1,
            SourceKind::Config => 0,
        }
    }

    /// Fixed per-source confidence, used unless an observation overrides it.
    pub fn default_confidence(&self) -> f64 {
        match self {
            SourceKind::Manual => 1.0,
            SourceKind::Api => 0.95,
            SourceKind::Scrape => 0.8,
            SourceKind::Config => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Api => "api",
            SourceKind::Scrape => "scrape",
            SourceKind::Config => "config",
            SourceKind::Manual => "manual",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(SourceKind::Api),
            "scrape" => Ok(SourceKind::Scrape),
            "config" => Ok(SourceKind::Config),
            "manual" => Ok(SourceKind::Manual),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown source kind: {other}"
            ))),
        }
    }
}

/// One source's view of one entity at a point in time.
///
/// Immutable once created; a newer observation supersedes it, nothing
/// mutates it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceObservation {
    /// Canonical slug; `None` until normalized
    pub entity_id: Option<String>,
    /// Name exactly as the source reported it
    pub raw_name: String,
    pub source_kind: SourceKind,
    /// Claimed field values, keyed by canonical field name
    pub fields: BTreeMap<String, Value>,
    pub observed_at: DateTime<Utc>,
    /// 0.0..=1.0, fixed per source kind unless overridden
    pub confidence: f64,
}

impl SourceObservation {
    pub fn new(
        raw_name: impl Into<String>,
        source_kind: SourceKind,
        fields: BTreeMap<String, Value>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: None,
            raw_name: raw_name.into(),
            source_kind,
            fields,
            observed_at,
            confidence: source_kind.default_confidence(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Return a copy with `entity_id` filled from the normalized raw name.
    pub fn normalized(mut self) -> Self {
        if self.entity_id.is_none() {
            let id = slug::normalize(&self.raw_name);
            if !id.is_empty() {
                self.entity_id = Some(id);
            }
        }
        self
    }

    /// Numeric view of a claimed field, when it is a JSON number.
    pub fn numeric_field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }
}

/// Per-field provenance attached to every populated canonical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: Value,
    pub source_kind: SourceKind,
    pub confidence: f64,
    /// Last time any source confirmed this value (refreshed even when an
    /// anomalous update is rejected)
    pub verified_at: DateTime<Utc>,
}

/// The merged, addressable state for one tracked entity.
///
/// Created on first successful reconciliation; never deleted, only flagged
/// inactive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Stable slug (see [`crate::slug::normalize`])
    pub entity_id: String,
    pub display_name: String,
    pub provider_id: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalRecord {
    /// Fresh record with no fields, timestamped now
    pub fn new(
        entity_id: impl Into<String>,
        display_name: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        let now = crate::time::now();
        Self {
            entity_id: entity_id.into(),
            display_name: display_name.into(),
            provider_id: provider_id.into(),
            fields: BTreeMap::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn numeric_field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(|f| f.value.as_f64())
    }
}

/// Which layer actually served a read-API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Cached,
    Fallback,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Live => "live",
            DataSource::Cached => "cached",
            DataSource::Fallback => "fallback",
        }
    }
}

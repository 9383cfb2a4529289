//! Observation reconciliation
//!
//! Merges per-source observations into canonical records with field-level
//! provenance. Source precedence is manual > api > scrape > config; within
//! the same precedence the most recently observed claim wins, and a
//! lower-precedence claim never overwrites a higher-precedence value no
//! matter how fresh it is.
//!
//! Numeric updates pass through a per-field sanity envelope before they may
//! replace a verified value. A rejected update leaves the stored value in
//! place but still refreshes its `verified_at`, and is reported for audit.
//! A second claim in the same pass that agrees with the candidate lifts the
//! rejection. Manual claims are operator intent and skip the envelope.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use modelsync_common::config::SanityRule;
use modelsync_common::records::{
    fields, CanonicalRecord, FieldValue, SourceKind, SourceObservation,
};
use modelsync_common::{slug, Error, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::db;

/// Why a claim did not replace the stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A higher-precedence source owns the field
    Precedence,
    /// Outside the absolute bounds for the field
    OutOfBounds,
    /// Too large a jump from the verified value, with no corroboration
    ExcessiveJump,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Precedence => "precedence",
            RejectReason::OutOfBounds => "out_of_bounds",
            RejectReason::ExcessiveJump => "excessive_jump",
        }
    }
}

/// Audit entry for a claim that lost
#[derive(Debug, Clone)]
pub struct RejectedClaim {
    pub field: String,
    pub value: Value,
    pub source_kind: SourceKind,
    pub reason: RejectReason,
}

/// Outcome of merging one entity's observations
#[derive(Debug)]
pub struct MergeResult {
    pub record: CanonicalRecord,
    pub created: bool,
    /// Field names whose stored value actually changed, sorted
    pub changed_fields: Vec<String>,
    pub rejected: Vec<RejectedClaim>,
}

struct Claim<'a> {
    value: &'a Value,
    source_kind: SourceKind,
    observed_at: DateTime<Utc>,
    confidence: f64,
}

enum Decision {
    Accept,
    /// Claim agrees with the stored value; refresh verification only
    Confirm,
    Reject(RejectReason),
}

/// Merge a pass of observations into the canonical record for one entity.
///
/// Pure with respect to storage. Fails with [`Error::IncompleteEntity`]
/// when the pass would create a brand-new entity without a usable name and
/// at least one core metric; existing entities are never gated.
pub fn merge(
    entity_id: &str,
    existing: Option<CanonicalRecord>,
    observations: &[SourceObservation],
    rules: &[SanityRule],
) -> Result<MergeResult> {
    let now = modelsync_common::time::now();
    let created = existing.is_none();

    // The best-ranked observation with a usable name drives the display name
    let mut best_name: Option<&SourceObservation> = None;
    for obs in observations {
        if obs.raw_name.trim().is_empty() {
            continue;
        }
        best_name = match best_name {
            Some(cur)
                if !claim_wins(obs.source_kind, obs.observed_at, cur.source_kind, cur.observed_at) =>
            {
                Some(cur)
            }
            _ => Some(obs),
        };
    }

    let mut record = match existing {
        Some(record) => record,
        None => {
            let display_name = best_name
                .map(|o| o.raw_name.trim().to_string())
                .unwrap_or_default();
            let provider = slug::infer_provider(&display_name);
            CanonicalRecord::new(entity_id, display_name, provider)
        }
    };

    let mut changed_fields: Vec<String> = Vec::new();
    let mut rejected: Vec<RejectedClaim> = Vec::new();
    let mut touched = false;

    if !created {
        if let Some(name_obs) = best_name {
            let name = name_obs.raw_name.trim();
            if record.display_name != name {
                record.display_name = name.to_string();
                changed_fields.push("display_name".to_string());
                touched = true;
            }
        }
    }

    let mut claims_by_field: BTreeMap<&str, Vec<Claim>> = BTreeMap::new();
    for obs in observations {
        for (name, value) in &obs.fields {
            claims_by_field.entry(name.as_str()).or_default().push(Claim {
                value,
                source_kind: obs.source_kind,
                observed_at: obs.observed_at,
                confidence: obs.confidence,
            });
        }
    }

    let mut provider_claim: Option<String> = None;

    for (field_name, claims) in &claims_by_field {
        let field_name: &str = field_name;

        let mut winner_idx = 0;
        for (idx, claim) in claims.iter().enumerate().skip(1) {
            let best = &claims[winner_idx];
            if claim_wins(
                claim.source_kind,
                claim.observed_at,
                best.source_kind,
                best.observed_at,
            ) {
                winner_idx = idx;
            }
        }
        let winner = &claims[winner_idx];

        // Provider is lifted onto the record, not stored as a field
        if field_name == fields::PROVIDER {
            if let Some(p) = winner.value.as_str() {
                let p = p.trim();
                if !p.is_empty() {
                    provider_claim = Some(p.to_string());
                }
            }
            continue;
        }

        let current = record.fields.get(field_name);
        match evaluate(winner, winner_idx, claims, current, rules, field_name) {
            Decision::Accept => {
                let value_changed = current.map(|c| c.value != *winner.value).unwrap_or(true);
                record.fields.insert(
                    field_name.to_string(),
                    FieldValue {
                        value: winner.value.clone(),
                        source_kind: winner.source_kind,
                        confidence: winner.confidence,
                        verified_at: now,
                    },
                );
                if value_changed {
                    changed_fields.push(field_name.to_string());
                }
                touched = true;
            }
            Decision::Confirm => {
                if let Some(cur) = record.fields.get_mut(field_name) {
                    cur.verified_at = now;
                    touched = true;
                }
            }
            Decision::Reject(reason) => {
                match reason {
                    RejectReason::Precedence => {
                        debug!(
                            "Ignored lower-precedence claim {}.{} = {} from {}",
                            entity_id, field_name, winner.value, winner.source_kind
                        );
                    }
                    RejectReason::OutOfBounds | RejectReason::ExcessiveJump => {
                        warn!(
                            "Rejected {}.{} = {} from {} ({})",
                            entity_id,
                            field_name,
                            winner.value,
                            winner.source_kind,
                            reason.as_str()
                        );
                        if let Some(cur) = record.fields.get_mut(field_name) {
                            cur.verified_at = now;
                            touched = true;
                        }
                    }
                }
                rejected.push(RejectedClaim {
                    field: field_name.to_string(),
                    value: winner.value.clone(),
                    source_kind: winner.source_kind,
                    reason,
                });
            }
        }
    }

    if let Some(provider) = provider_claim {
        if record.provider_id != provider {
            record.provider_id = provider;
            if !created {
                changed_fields.push("provider_id".to_string());
            }
            touched = true;
        }
    }

    if created {
        let has_name = !record.display_name.trim().is_empty();
        let has_metric = record.fields.contains_key(fields::INTELLIGENCE_SCORE)
            || record.fields.contains_key(fields::OUTPUT_SPEED);
        if !has_name || !has_metric {
            let missing = [has_name, has_metric].iter().filter(|ok| !**ok).count();
            return Err(Error::IncompleteEntity {
                entity_id: entity_id.to_string(),
                missing,
            });
        }
    }

    if touched {
        record.updated_at = now;
    }

    changed_fields.sort();
    changed_fields.dedup();

    Ok(MergeResult {
        record,
        created,
        changed_fields,
        rejected,
    })
}

fn claim_wins(
    kind_a: SourceKind,
    at_a: DateTime<Utc>,
    kind_b: SourceKind,
    at_b: DateTime<Utc>,
) -> bool {
    let (pa, pb) = (kind_a.precedence(), kind_b.precedence());
    pa > pb || (pa == pb && at_a > at_b)
}

fn evaluate(
    winner: &Claim,
    winner_idx: usize,
    claims: &[Claim],
    current: Option<&FieldValue>,
    rules: &[SanityRule],
    field_name: &str,
) -> Decision {
    if let Some(cur) = current {
        if winner.source_kind.precedence() < cur.source_kind.precedence() {
            // Reporting the identical value counts as confirmation; anything
            // else from a lower-precedence source is rejected and audited
            if *winner.value == cur.value {
                return Decision::Confirm;
            }
            return Decision::Reject(RejectReason::Precedence);
        }
    }

    if winner.source_kind == SourceKind::Manual {
        return Decision::Accept;
    }

    let rule = rules.iter().find(|r| r.field == field_name);
    let (rule, candidate) = match (rule, winner.value.as_f64()) {
        (Some(rule), Some(candidate)) => (rule, candidate),
        _ => return Decision::Accept,
    };

    if !rule.within_bounds(candidate) {
        if corroborated(candidate, winner_idx, claims, rule) {
            return Decision::Accept;
        }
        return Decision::Reject(RejectReason::OutOfBounds);
    }

    if let Some(existing_value) = current.and_then(|c| c.value.as_f64()) {
        if !rule.within_ratio(candidate, existing_value) {
            if corroborated(candidate, winner_idx, claims, rule) {
                return Decision::Accept;
            }
            return Decision::Reject(RejectReason::ExcessiveJump);
        }
    }

    Decision::Accept
}

fn corroborated(candidate: f64, winner_idx: usize, claims: &[Claim], rule: &SanityRule) -> bool {
    claims.iter().enumerate().any(|(idx, claim)| {
        idx != winner_idx
            && claim
                .value
                .as_f64()
                .map(|v| rule.corroborates(candidate, v))
                .unwrap_or(false)
    })
}

/// Serializes merges per entity while unrelated entities proceed in
/// parallel, and persists the outcome.
pub struct Reconciler {
    rules: RwLock<Vec<SanityRule>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Reconciler {
    pub fn new(rules: Vec<SanityRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            locks: DashMap::new(),
        }
    }

    pub async fn rules(&self) -> Vec<SanityRule> {
        self.rules.read().await.clone()
    }

    /// Replace the sanity envelope; takes effect for subsequent merges
    pub async fn set_rules(&self, rules: Vec<SanityRule>) {
        *self.rules.write().await = rules;
    }

    fn entity_lock(&self, entity_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Merge a pass of observations for one entity against the stored
    /// record and persist the result.
    pub async fn apply(
        &self,
        pool: &SqlitePool,
        entity_id: &str,
        observations: &[SourceObservation],
    ) -> Result<MergeResult> {
        let lock = self.entity_lock(entity_id);
        let _guard = lock.lock().await;

        let existing = db::records::get_record(pool, entity_id).await?;
        let rules = self.rules().await;
        let result = merge(entity_id, existing, observations, &rules)?;
        db::records::upsert_record(pool, &result.record).await?;
        Ok(result)
    }
}

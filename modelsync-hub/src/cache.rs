//! Tiered read cache with stale-while-revalidate semantics.
//!
//! Every entry carries two deadlines derived from its write time: below
//! `stale_after` it is fresh, between `stale_after` and `ttl` it is stale
//! but still servable, and at `ttl` it is expired and never served again.
//! Stale entries are handed out immediately while a single background
//! revalidation per key refreshes them; expired entries are dropped on
//! the next lookup or by the periodic cleanup task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// How current a served value is relative to its staleness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
        }
    }
}

struct CacheEntry<V> {
    value: V,
    written_at: Instant,
    ttl: Duration,
    stale_after: Duration,
    /// Set while a background revalidation for this key is in flight.
    revalidating: Arc<AtomicBool>,
}

/// Counter snapshot for the status endpoints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub invalidations: u64,
}

impl CacheStats {
    /// Share of lookups answered from cache (fresh or stale), as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.stale_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.stale_hits) as f64 / total as f64 * 100.0
        }
    }
}

/// Releases the per-key revalidation slot when dropped.
///
/// Holding the guard means this caller won the race to refresh the key.
/// If the refresh fails and the guard is dropped without a `set`, the
/// entry stays stale and the next reader may try again.
pub struct RevalidationGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RevalidationGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// In-memory keyed cache over [`DashMap`] with per-entry deadlines.
pub struct TieredCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

impl<V: Clone> TieredCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Look up a key, reporting whether the value is fresh or stale.
    ///
    /// Expired entries are removed here and reported as misses. A `Stale`
    /// result is the caller's cue to call [`try_begin_revalidation`]
    /// before deciding whether to refresh in the background.
    ///
    /// [`try_begin_revalidation`]: TieredCache::try_begin_revalidation
    pub fn get(&self, key: &str) -> Option<(V, Freshness)> {
        if let Some(entry) = self.entries.get(key) {
            let age = entry.written_at.elapsed();
            if age < entry.stale_after {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some((entry.value.clone(), Freshness::Fresh));
            }
            if age < entry.ttl {
                self.stale_hits.fetch_add(1, Ordering::Relaxed);
                return Some((entry.value.clone(), Freshness::Stale));
            }
            // Past its ttl the value must never be served again.
            drop(entry);
            self.entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace a value with its own staleness window.
    ///
    /// `stale_after` is clamped to `ttl` so an entry can never be stale
    /// and expired at different instants in the wrong order. A replaced
    /// entry gets a new revalidation slot.
    pub fn set(&self, key: &str, value: V, ttl: Duration, stale_after: Duration) {
        let entry = CacheEntry {
            value,
            written_at: Instant::now(),
            ttl,
            stale_after: stale_after.min(ttl),
            revalidating: Arc::new(AtomicBool::new(false)),
        };
        self.entries.insert(key.to_string(), entry);
    }

    /// Claim the single revalidation slot for a stale key.
    ///
    /// Returns `None` when the entry is absent, still fresh, already
    /// expired, or another revalidation is in flight. The slot is held
    /// until the returned guard drops; a successful refresh should `set`
    /// the key first, which makes it fresh and closes the window.
    pub fn try_begin_revalidation(&self, key: &str) -> Option<RevalidationGuard> {
        let entry = self.entries.get(key)?;
        let age = entry.written_at.elapsed();
        if age < entry.stale_after || age >= entry.ttl {
            return None;
        }
        entry
            .revalidating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RevalidationGuard {
                flag: entry.revalidating.clone(),
            })
    }

    /// Drop entries matching a key pattern, returning how many were removed.
    ///
    /// A trailing `*` matches by prefix (`"models:*"` clears every model
    /// key, `"*"` clears everything); without it the pattern is an exact
    /// key.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let removed = if let Some(prefix) = pattern.strip_suffix('*') {
            let keys: Vec<String> = self
                .entries
                .iter()
                .filter(|e| e.key().starts_with(prefix))
                .map(|e| e.key().clone())
                .collect();
            let mut n = 0;
            for key in &keys {
                if self.entries.remove(key).is_some() {
                    n += 1;
                }
            }
            n
        } else {
            usize::from(self.entries.remove(pattern).is_some())
        };
        if removed > 0 {
            self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Invalidated {} cache entries matching '{}'", removed, pattern);
        }
        removed
    }

    /// Remove entries past their ttl, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.written_at.elapsed() >= e.ttl)
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for key in &expired {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Cache cleanup removed {} expired entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone> Default for TieredCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

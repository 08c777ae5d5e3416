//! Write-triggered cache eviction.
//!
//! ## Flow
//!
//! ```text
//! service write ──► repository commit ──► CacheInvalidator::on_write(id)
//!                                              │
//!                                              ├─ DEL   comp:{id}
//!                                              └─ SCAN+DEL leaderboard:*{id}*   (per aggregate prefix)
//! ```
//!
//! Invalidation failures never fail the write; the entries age out by TTL.
//!
//! ## Read-after-write on one node
//!
//! A recompute that read the row *before* the write could otherwise land in
//! the cache *after* the invalidation deleted it. [`InvalidationEpochs`]
//! serializes the two: backfills write under a shared stripe guard and only
//! if the stripe's epoch is unchanged since they sampled it; invalidation
//! bumps the epoch and deletes under the exclusive guard.

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use tokio::sync::RwLock;

use crate::metrics;
use crate::store::DynCacheStore;

const DEFAULT_STRIPES: usize = 256;

/// Striped invalidation counters keyed by entity id.
///
/// Ids sharing a stripe only cost each other a skipped backfill.
#[derive(Debug)]
pub struct InvalidationEpochs {
    stripes: Vec<RwLock<u64>>,
    hasher: RandomState,
}

impl Default for InvalidationEpochs {
    fn default() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }
}

impl InvalidationEpochs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stripes(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| RwLock::new(0)).collect(),
            hasher: RandomState::new(),
        }
    }

    fn stripe(&self, id: &str) -> &RwLock<u64> {
        let index = (self.hasher.hash_one(id) % self.stripes.len() as u64) as usize;
        &self.stripes[index]
    }

    /// Current epoch of `id`'s stripe. Sample before reading the backing store.
    pub async fn snapshot(&self, id: &str) -> u64 {
        *self.stripe(id).read().await
    }

    /// Runs `write` only if no invalidation of `id` happened since `seen`.
    ///
    /// Returns `None` when the write was skipped. Invalidations of `id` wait
    /// until `write` finishes.
    pub async fn write_if_unchanged<F, Fut, T>(&self, id: &str, seen: u64, write: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.stripe(id).read().await;
        if *guard != seen {
            return None;
        }
        let out = write().await;
        drop(guard);
        Some(out)
    }

    /// Bumps `id`'s epoch and runs `evict` while holding the stripe exclusively.
    pub async fn invalidate<F, Fut, T>(&self, id: &str, evict: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut guard = self.stripe(id).write().await;
        *guard = guard.wrapping_add(1);
        evict().await
    }

    /// Bumps every stripe, discarding all in-flight backfills.
    pub async fn invalidate_everything(&self) {
        for stripe in &self.stripes {
            let mut guard = stripe.write().await;
            *guard = guard.wrapping_add(1);
        }
    }
}

/// Cache key layout of one entity type.
///
/// Per-entity entries live at `{entity_prefix}:{id}`. Aggregate/list entries
/// that embed the entity live under each aggregate prefix with the id
/// somewhere in the rest of the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    entity_prefix: String,
    aggregate_prefixes: Vec<String>,
}

impl KeySpace {
    pub fn new(entity_prefix: impl Into<String>) -> Self {
        Self {
            entity_prefix: entity_prefix.into(),
            aggregate_prefixes: Vec::new(),
        }
    }

    pub fn with_aggregate(mut self, prefix: impl Into<String>) -> Self {
        self.aggregate_prefixes.push(prefix.into());
        self
    }

    pub fn entity_prefix(&self) -> &str {
        &self.entity_prefix
    }

    pub fn aggregate_prefixes(&self) -> &[String] {
        &self.aggregate_prefixes
    }

    #[inline]
    pub fn entity_key(&self, id: &str) -> String {
        format!("{}:{id}", self.entity_prefix)
    }

    /// `{prefix}:*{id}*` with glob metacharacters in `id` escaped.
    pub fn aggregate_pattern(prefix: &str, id: &str) -> String {
        format!("{prefix}:*{}*", escape_glob(id))
    }
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// What an invalidation removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// The per-entity key existed and was removed.
    pub exact_removed: bool,
    /// Aggregate keys removed by pattern.
    pub pattern_removed: u64,
    /// Cache operations that failed (logged, not propagated).
    pub failures: u32,
}

impl InvalidationReport {
    /// `true` when every cache operation succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// Evicts an entity's cache entries after a write.
#[derive(Clone)]
pub struct CacheInvalidator {
    store: DynCacheStore,
    keyspace: KeySpace,
    epochs: std::sync::Arc<InvalidationEpochs>,
}

impl CacheInvalidator {
    pub fn new(
        store: DynCacheStore,
        keyspace: KeySpace,
        epochs: std::sync::Arc<InvalidationEpochs>,
    ) -> Self {
        Self {
            store,
            keyspace,
            epochs,
        }
    }

    pub fn keyspace(&self) -> &KeySpace {
        &self.keyspace
    }

    /// Deletes the entity key and every aggregate key embedding `entity_id`.
    ///
    /// Runs inline in the write path; failures are logged and counted in the
    /// report, never returned.
    pub async fn on_write(&self, entity_id: &str) -> InvalidationReport {
        let key = self.keyspace.entity_key(entity_id);

        let report = self
            .epochs
            .invalidate(entity_id, || async {
                let mut report = InvalidationReport::default();

                match self.store.delete(&key).await {
                    Ok(removed) => report.exact_removed = removed,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "cache invalidation failed");
                        report.failures += 1;
                    }
                }

                for prefix in &self.keyspace.aggregate_prefixes {
                    let pattern = KeySpace::aggregate_pattern(prefix, entity_id);
                    match self.store.delete_by_pattern(&pattern).await {
                        Ok(removed) => report.pattern_removed += removed,
                        Err(e) => {
                            tracing::warn!(pattern = %pattern, error = %e, "cache pattern invalidation failed");
                            report.failures += 1;
                        }
                    }
                }
                report
            })
            .await;

        metrics::record_invalidation("exact", u64::from(report.exact_removed));
        metrics::record_invalidation("pattern", report.pattern_removed);
        tracing::debug!(
            key = %key,
            exact_removed = report.exact_removed,
            pattern_removed = report.pattern_removed,
            failures = report.failures,
            "cache invalidated"
        );
        report
    }

    /// Drops every entity and aggregate entry of this key space.
    pub async fn invalidate_all(&self) -> InvalidationReport {
        self.epochs.invalidate_everything().await;

        let mut report = InvalidationReport::default();
        let patterns = std::iter::once(self.keyspace.entity_prefix.as_str())
            .chain(self.keyspace.aggregate_prefixes.iter().map(String::as_str))
            .map(|prefix| format!("{prefix}:*"));

        for pattern in patterns {
            match self.store.delete_by_pattern(&pattern).await {
                Ok(removed) => report.pattern_removed += removed,
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "cache flush failed");
                    report.failures += 1;
                }
            }
        }
        metrics::record_invalidation("pattern", report.pattern_removed);
        tracing::info!(
            prefix = %self.keyspace.entity_prefix,
            removed = report.pattern_removed,
            "cache key space flushed"
        );
        report
    }
}

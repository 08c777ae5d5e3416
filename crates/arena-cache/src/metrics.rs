//! Cache metrics recorded through the `metrics` facade.
//!
//! Nothing is exported from here; the application installs a recorder
//! (Prometheus in `arena-admin`) and these calls become no-ops without one.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "arena_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "arena_cache_misses_total";
    pub const CACHE_CORRUPT_TOTAL: &str = "arena_cache_corrupt_total";
    pub const CACHE_UNAVAILABLE_TOTAL: &str = "arena_cache_unavailable_total";
    pub const CACHE_LOCK_TIMEOUTS_TOTAL: &str = "arena_cache_lock_timeouts_total";
    pub const CACHE_REFRESH_TOTAL: &str = "arena_cache_refresh_total";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "arena_cache_invalidations_total";
}

/// Kind of cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitState {
    Fresh,
    Stale,
    Null,
}

impl HitState {
    fn as_str(self) -> &'static str {
        match self {
            HitState::Fresh => "fresh",
            HitState::Stale => "stale",
            HitState::Null => "null",
        }
    }
}

/// Outcome of a refresh submission or run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshEvent {
    Submitted,
    Rejected,
    Completed,
    Skipped,
    Failed,
}

impl RefreshEvent {
    fn as_str(self) -> &'static str {
        match self {
            RefreshEvent::Submitted => "submitted",
            RefreshEvent::Rejected => "rejected",
            RefreshEvent::Completed => "completed",
            RefreshEvent::Skipped => "skipped",
            RefreshEvent::Failed => "failed",
        }
    }
}

pub fn record_hit(namespace: &str, state: HitState) {
    counter!(
        names::CACHE_HITS_TOTAL,
        "namespace" => namespace.to_string(),
        "state" => state.as_str()
    )
    .increment(1);
}

pub fn record_miss(namespace: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "namespace" => namespace.to_string()).increment(1);
}

pub fn record_corrupt(namespace: &str) {
    counter!(names::CACHE_CORRUPT_TOTAL, "namespace" => namespace.to_string()).increment(1);
}

/// Record a failed call to the cache service (`op` is the operation name).
pub fn record_unavailable(op: &'static str) {
    counter!(names::CACHE_UNAVAILABLE_TOTAL, "op" => op).increment(1);
}

pub fn record_lock_timeout(namespace: &str) {
    counter!(names::CACHE_LOCK_TIMEOUTS_TOTAL, "namespace" => namespace.to_string()).increment(1);
}

pub fn record_refresh(event: RefreshEvent) {
    counter!(names::CACHE_REFRESH_TOTAL, "event" => event.as_str()).increment(1);
}

/// Record removed keys (`kind` is `exact` or `pattern`).
pub fn record_invalidation(kind: &'static str, removed: u64) {
    counter!(names::CACHE_INVALIDATIONS_TOTAL, "kind" => kind).increment(removed);
}

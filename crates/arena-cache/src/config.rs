//! Cache settings.
//!
//! Every field has a serde default so a partial `[cache]` table (or none at
//! all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::lock::LockBackoff;
use crate::refresh::RefreshSettings;
use crate::ttl::TtlPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Hard TTL before jitter, in seconds
    #[serde(default = "default_base_ttl_secs")]
    pub base_ttl_secs: u64,

    /// Upper bound of the random jitter added to every hard TTL
    #[serde(default = "default_ttl_jitter_max_secs")]
    pub ttl_jitter_max_secs: u64,

    /// How long a written value counts as fresh; must be below `base_ttl_secs`
    #[serde(default = "default_logical_window_secs")]
    pub logical_window_secs: u64,

    /// TTL of the "not found" marker written for absent records
    #[serde(default = "default_null_marker_ttl_secs")]
    pub null_marker_ttl_secs: u64,

    /// Total time a reader waits for the recompute lock on a miss
    #[serde(default = "default_lock_wait_timeout_secs")]
    pub lock_wait_timeout_secs: u64,

    /// Lease of the recompute lock; expires server-side if the holder dies
    #[serde(default = "default_lock_lease_secs")]
    pub lock_lease_secs: u64,

    #[serde(default = "default_lock_max_attempts")]
    pub lock_max_attempts: u32,

    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,

    /// Background refresh workers
    #[serde(default = "default_refresh_pool_size")]
    pub refresh_pool_size: usize,

    /// Pending refreshes beyond this are rejected
    #[serde(default = "default_refresh_queue_capacity")]
    pub refresh_queue_capacity: usize,

    /// Lease of the lock a refresh holds while recomputing; also the retry
    /// interval after a failed refresh. Must exceed `refresh_timeout_secs`
    #[serde(default = "default_refresh_lease_secs")]
    pub refresh_lease_secs: u64,

    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,

    /// Short fixed TTL for aggregate/list entries
    #[serde(default = "default_aggregate_ttl_secs")]
    pub aggregate_ttl_secs: u64,

    /// `COUNT` hint for each `SCAN` round of pattern deletion
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
}

fn default_base_ttl_secs() -> u64 {
    3600 // 1 hour
}
fn default_ttl_jitter_max_secs() -> u64 {
    300
}
fn default_logical_window_secs() -> u64 {
    1800
}
fn default_null_marker_ttl_secs() -> u64 {
    60
}
fn default_lock_wait_timeout_secs() -> u64 {
    2
}
fn default_lock_lease_secs() -> u64 {
    10
}
fn default_lock_max_attempts() -> u32 {
    3
}
fn default_lock_retry_interval_ms() -> u64 {
    500
}
fn default_refresh_pool_size() -> usize {
    4
}
fn default_refresh_queue_capacity() -> usize {
    256
}
fn default_refresh_lease_secs() -> u64 {
    15
}
fn default_refresh_timeout_secs() -> u64 {
    10
}
fn default_aggregate_ttl_secs() -> u64 {
    60
}
fn default_scan_batch_size() -> usize {
    500
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            base_ttl_secs: default_base_ttl_secs(),
            ttl_jitter_max_secs: default_ttl_jitter_max_secs(),
            logical_window_secs: default_logical_window_secs(),
            null_marker_ttl_secs: default_null_marker_ttl_secs(),
            lock_wait_timeout_secs: default_lock_wait_timeout_secs(),
            lock_lease_secs: default_lock_lease_secs(),
            lock_max_attempts: default_lock_max_attempts(),
            lock_retry_interval_ms: default_lock_retry_interval_ms(),
            refresh_pool_size: default_refresh_pool_size(),
            refresh_queue_capacity: default_refresh_queue_capacity(),
            refresh_lease_secs: default_refresh_lease_secs(),
            refresh_timeout_secs: default_refresh_timeout_secs(),
            aggregate_ttl_secs: default_aggregate_ttl_secs(),
            scan_batch_size: default_scan_batch_size(),
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_ttl_secs == 0 {
            return Err("cache.base_ttl_secs must be > 0".into());
        }
        // logical expiry must always land before the hard TTL
        if self.logical_window_secs >= self.base_ttl_secs {
            return Err("cache.logical_window_secs must be < cache.base_ttl_secs".into());
        }
        if self.null_marker_ttl_secs == 0 {
            return Err("cache.null_marker_ttl_secs must be > 0".into());
        }
        if self.lock_lease_secs == 0 || self.refresh_lease_secs == 0 {
            return Err("cache lock leases must be > 0".into());
        }
        // a refresh must never outlive its lock
        if self.refresh_timeout_secs == 0 || self.refresh_timeout_secs >= self.refresh_lease_secs {
            return Err(
                "cache.refresh_timeout_secs must be > 0 and < cache.refresh_lease_secs".into(),
            );
        }
        if self.lock_max_attempts == 0 {
            return Err("cache.lock_max_attempts must be > 0".into());
        }
        if self.refresh_pool_size == 0 {
            return Err("cache.refresh_pool_size must be > 0".into());
        }
        if self.refresh_queue_capacity == 0 {
            return Err("cache.refresh_queue_capacity must be > 0".into());
        }
        if self.aggregate_ttl_secs < 2 {
            return Err("cache.aggregate_ttl_secs must be >= 2".into());
        }
        if self.scan_batch_size == 0 {
            return Err("cache.scan_batch_size must be > 0".into());
        }
        Ok(())
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_wait_timeout_secs)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn lock_backoff(&self) -> LockBackoff {
        LockBackoff {
            max_attempts: self.lock_max_attempts,
            interval: Duration::from_millis(self.lock_retry_interval_ms),
        }
    }

    /// TTL policy for per-entity entries.
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            base: Duration::from_secs(self.base_ttl_secs),
            jitter_max: Duration::from_secs(self.ttl_jitter_max_secs),
            logical_window: Duration::from_secs(self.logical_window_secs),
            null_marker: Duration::from_secs(self.null_marker_ttl_secs),
        }
    }

    /// TTL policy for aggregate/list entries: short fixed TTL, a tenth of it
    /// as jitter, fresh for the first half.
    pub fn aggregate_ttl_policy(&self) -> TtlPolicy {
        let base = Duration::from_secs(self.aggregate_ttl_secs);
        TtlPolicy {
            base,
            jitter_max: base / 10,
            logical_window: base / 2,
            null_marker: Duration::from_secs(self.null_marker_ttl_secs).min(base),
        }
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            pool_size: self.refresh_pool_size,
            queue_capacity: self.refresh_queue_capacity,
            lease: Duration::from_secs(self.refresh_lease_secs),
            timeout: Duration::from_secs(self.refresh_timeout_secs),
        }
    }
}

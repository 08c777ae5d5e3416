//! Cross-process mutual exclusion keyed by string.
//!
//! The trait exposes a single non-blocking primitive, [`DistributedLock::try_acquire`],
//! plus an ownership-checked [`DistributedLock::release`]. Bounded waiting is a
//! provided method driven by a fixed [`LockBackoff`], so the coordination
//! mechanism (Redis `SET NX PX`, an in-process map, ...) stays swappable.
//!
//! Leases expire on the lock service's side: a holder that crashes or is
//! cancelled mid-recompute cannot block other callers past its lease.

mod memory;
mod redis;

pub use self::memory::MemoryLock;
pub use self::redis::RedisLock;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::CacheError;

/// Lock key guarding recompute and refresh of a cache key.
#[inline]
pub fn lock_key(cache_key: &str) -> String {
    format!("lock:{cache_key}")
}

/// Proof of holding a lock.
///
/// Only the holder of the matching `owner_token` can release the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    key: String,
    owner_token: String,
    lease_deadline: Instant,
}

impl LockHandle {
    pub(crate) fn new(key: impl Into<String>, lease: Duration) -> Self {
        Self {
            key: key.into(),
            owner_token: uuid::Uuid::new_v4().to_string(),
            lease_deadline: Instant::now() + lease,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner_token(&self) -> &str {
        &self.owner_token
    }

    pub fn lease_deadline(&self) -> Instant {
        self.lease_deadline
    }

    /// `true` once the lease has run out locally; the lock service may
    /// already have handed the lock to someone else.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.lease_deadline
    }

    /// Time left on the lease, zero once expired.
    pub fn remaining_lease(&self) -> Duration {
        self.lease_deadline.saturating_duration_since(Instant::now())
    }
}

/// Fixed-budget retry strategy for [`DistributedLock::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockBackoff {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for LockBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_millis(500),
        }
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Attempts to take `key` for `lease` without waiting.
    ///
    /// Returns `Ok(None)` if someone else holds it.
    async fn try_acquire(&self, key: &str, lease: Duration)
    -> Result<Option<LockHandle>, CacheError>;

    /// Releases the lock if `handle` still owns it.
    ///
    /// Idempotent: returns `Ok(false)` when the lock was already released,
    /// expired, or re-acquired by another holder, and never touches a lock
    /// owned by someone else.
    async fn release(&self, handle: &LockHandle) -> Result<bool, CacheError>;

    /// Retry strategy used by [`DistributedLock::acquire`].
    fn backoff(&self) -> LockBackoff;

    /// Takes `key`, retrying with the fixed backoff for at most `wait_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::LockTimeout`] once the attempts or the wait budget
    /// are exhausted, or [`CacheError::Unavailable`] if the lock service fails.
    async fn acquire(
        &self,
        key: &str,
        wait_timeout: Duration,
        lease: Duration,
    ) -> Result<LockHandle, CacheError> {
        let backoff = self.backoff();
        let max_attempts = backoff.max_attempts.max(1);
        let deadline = Instant::now() + wait_timeout;

        for attempt in 1..=max_attempts {
            if let Some(handle) = self.try_acquire(key, lease).await? {
                if attempt > 1 {
                    tracing::debug!(key = %key, attempt, "lock acquired after retry");
                }
                return Ok(handle);
            }

            let now = Instant::now();
            if attempt == max_attempts || now >= deadline {
                break;
            }
            tokio::time::sleep(backoff.interval.min(deadline - now)).await;
        }

        Err(CacheError::LockTimeout {
            key: key.to_string(),
        })
    }
}

/// Type alias for a shared lock trait object.
pub type DynLock = Arc<dyn DistributedLock>;

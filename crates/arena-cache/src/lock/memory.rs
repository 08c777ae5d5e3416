use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;
use tokio::time::Instant;

use super::{DistributedLock, LockBackoff, LockHandle};
use crate::error::CacheError;

#[derive(Debug, Clone)]
struct Held {
    owner_token: String,
    lease_deadline: Instant,
}

/// In-process lock table.
///
/// Gives the same guarantees as [`super::RedisLock`] within one process:
/// leases expire on the tokio clock and release is ownership-checked.
#[derive(Debug, Default)]
pub struct MemoryLock {
    held: DashMap<String, Held>,
    backoff: LockBackoff,
}

impl MemoryLock {
    pub fn new(backoff: LockBackoff) -> Self {
        Self {
            held: DashMap::new(),
            backoff,
        }
    }

    /// `true` if `key` is held by a live lease.
    pub fn is_locked(&self, key: &str) -> bool {
        let now = Instant::now();
        self.held
            .get(key)
            .is_some_and(|held| held.lease_deadline > now)
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn try_acquire(
        &self,
        key: &str,
        lease: Duration,
    ) -> Result<Option<LockHandle>, CacheError> {
        let now = Instant::now();
        let handle = LockHandle::new(key, lease);
        let held = Held {
            owner_token: handle.owner_token().to_string(),
            lease_deadline: handle.lease_deadline(),
        };

        match self.held.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().lease_deadline > now {
                    return Ok(None);
                }
                // previous lease ran out
                entry.insert(held);
            }
            Entry::Vacant(entry) => {
                entry.insert(held);
            }
        }
        Ok(Some(handle))
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool, CacheError> {
        let now = Instant::now();
        let removed = self
            .held
            .remove_if(handle.key(), |_, held| held.owner_token == handle.owner_token());
        Ok(removed.is_some_and(|(_, held)| held.lease_deadline > now))
    }

    fn backoff(&self) -> LockBackoff {
        self.backoff
    }
}

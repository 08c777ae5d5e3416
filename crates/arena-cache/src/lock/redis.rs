use async_trait::async_trait;
use deadpool_redis::Pool;
use deadpool_redis::redis::{self, Script};
use std::time::Duration;

use super::{DistributedLock, LockBackoff, LockHandle};
use crate::error::CacheError;
use crate::metrics;

/// Compare-and-delete: only the owner token may remove the lock.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Lock backed by Redis `SET key token NX PX lease`.
///
/// The lease is enforced by Redis key expiry. Release runs a Lua script that
/// deletes the key only if it still carries this holder's token, so a holder
/// whose lease ran out cannot release a lock re-acquired by someone else.
#[derive(Clone)]
pub struct RedisLock {
    pool: Pool,
    backoff: LockBackoff,
}

impl RedisLock {
    pub fn new(pool: Pool, backoff: LockBackoff) -> Self {
        Self { pool, backoff }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool.get().await.map_err(|e| {
            metrics::record_unavailable("lock");
            tracing::warn!(error = %e, "Failed to get Redis connection for lock");
            CacheError::from(e)
        })
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(
        &self,
        key: &str,
        lease: Duration,
    ) -> Result<Option<LockHandle>, CacheError> {
        let mut conn = self.connection().await?;
        let handle = LockHandle::new(key, lease);
        let lease_ms = (lease.as_millis() as u64).max(1);

        // "OK" when set, nil when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(handle.owner_token())
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                metrics::record_unavailable("lock");
                tracing::warn!(key = %key, error = %e, "Redis lock SET NX error");
                CacheError::from(e)
            })?;

        Ok(reply.map(|_| handle))
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let removed: i64 = Script::new(RELEASE_SCRIPT)
            .key(handle.key())
            .arg(handle.owner_token())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                metrics::record_unavailable("unlock");
                tracing::warn!(key = %handle.key(), error = %e, "Redis lock release error");
                CacheError::from(e)
            })?;

        if removed == 0 {
            tracing::debug!(key = %handle.key(), "lock already released or taken over");
        }
        Ok(removed > 0)
    }

    fn backoff(&self) -> LockBackoff {
        self.backoff
    }
}

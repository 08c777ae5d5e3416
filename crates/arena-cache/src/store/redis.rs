use async_trait::async_trait;
use deadpool_redis::Pool;
use deadpool_redis::redis::{self, AsyncCommands};
use std::time::Duration;

use super::CacheStore;
use crate::error::CacheError;
use crate::metrics;

/// Cache store backed by a Redis connection pool.
///
/// ## Commands
///
/// | Operation           | Redis                                   |
/// |---------------------|-----------------------------------------|
/// | `get`               | `GET`                                   |
/// | `set`               | `SET key value PX ttl`                  |
/// | `delete`            | `DEL`                                   |
/// | `delete_by_pattern` | `SCAN MATCH pattern COUNT n` + `DEL`    |
/// | `ttl_remaining`     | `PTTL`                                  |
///
/// Pattern deletion walks the keyspace incrementally with `SCAN`; it never
/// issues `KEYS`, which would block the server on large keyspaces.
#[derive(Clone)]
pub struct RedisCacheStore {
    pool: Pool,
    scan_batch_size: usize,
}

impl RedisCacheStore {
    pub fn new(pool: Pool, scan_batch_size: usize) -> Self {
        Self {
            pool,
            scan_batch_size: scan_batch_size.max(1),
        }
    }

    async fn connection(&self, op: &'static str) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool.get().await.map_err(|e| {
            metrics::record_unavailable(op);
            tracing::warn!(error = %e, op, "Failed to get Redis connection");
            CacheError::from(e)
        })
    }
}

fn command_failed(op: &'static str, key: &str, e: redis::RedisError) -> CacheError {
    metrics::record_unavailable(op);
    tracing::warn!(key = %key, error = %e, "Redis {op} error");
    CacheError::from(e)
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection("get").await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| command_failed("GET", key, e))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection("set").await?;
        // PX rejects 0, round sub-millisecond TTLs up
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        conn.pset_ex::<_, _, ()>(key, value, ttl_ms)
            .await
            .map_err(|e| command_failed("SET", key, e))?;
        tracing::debug!(key = %key, ttl_ms, "cache set (redis)");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection("delete").await?;
        let removed: u64 = conn
            .del(key)
            .await
            .map_err(|e| command_failed("DEL", key, e))?;
        Ok(removed > 0)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection("delete_by_pattern").await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_batch_size)
                .query_async(&mut conn)
                .await
                .map_err(|e| command_failed("SCAN", pattern, e))?;

            if !keys.is_empty() {
                let n: u64 = conn
                    .del(&keys)
                    .await
                    .map_err(|e| command_failed("DEL", pattern, e))?;
                removed += n;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(pattern = %pattern, removed, "cache pattern delete (redis)");
        Ok(removed)
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let mut conn = self.connection("ttl_remaining").await?;
        let ttl_ms: i64 = conn
            .pttl(key)
            .await
            .map_err(|e| command_failed("PTTL", key, e))?;
        // -2: no such key, -1: no expiry
        Ok(u64::try_from(ttl_ms).ok().map(Duration::from_millis))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

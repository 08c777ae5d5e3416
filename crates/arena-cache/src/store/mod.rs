//! Key-value cache service abstraction.
//!
//! ## Backends
//!
//! - **Redis**: shared across instances, the production backend
//! - **Memory**: per-process `DashMap`, used when Redis is disabled or
//!   unreachable, and in tests
//!
//! Every operation is a best-effort network call. Failures surface as
//! [`CacheError::Unavailable`]; readers treat them as a miss and the
//! invalidator logs and moves on.

mod memory;
mod redis;

pub use self::memory::MemoryCacheStore;
pub use self::redis::RedisCacheStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the raw bytes stored under `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Replaces the value under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Removes `key`. Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes every key matching a glob pattern (`*` and `?`).
    /// Returns the number of keys removed.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Remaining hard TTL of `key`, or `None` if it does not exist or never expires.
    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Short backend name for logs and stats.
    fn backend_name(&self) -> &'static str;
}

/// Type alias for a shared cache store trait object.
pub type DynCacheStore = Arc<dyn CacheStore>;

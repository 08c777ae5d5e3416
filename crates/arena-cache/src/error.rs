use arena_storage::StorageError;
use thiserror::Error;

/// Errors raised by the cache-consistency layer.
///
/// Only `LockTimeout` and `Storage` ever reach callers of
/// [`crate::CacheAsideReader::get`]; the other variants are absorbed on the
/// read path (treated as a miss) and on the invalidation path (logged).
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache service (or the lock service sharing it) could not be reached.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// The lock for a key could not be obtained within the wait budget.
    #[error("Timed out waiting for lock {key}")]
    LockTimeout { key: String },

    /// A cached payload failed structural validation.
    #[error("Corrupt cache entry at {key}")]
    CorruptEntry { key: String },

    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// The refresh queue was full; the refresh was dropped.
    #[error("Refresh queue full, dropped refresh of {key}")]
    RefreshRejected { key: String },

    /// The refresh scheduler has been shut down.
    #[error("Refresh scheduler is shut down")]
    SchedulerClosed,

    /// Failure of the authoritative store, propagated unchanged.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CacheError {
    /// Returns `true` for failures of the cache service itself.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns `true` if the error came from the backing store.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<deadpool_redis::redis::RedisError> for CacheError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        Self::Unavailable(format!("redis error: {e}"))
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Unavailable(format!("failed to get Redis connection: {e}"))
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

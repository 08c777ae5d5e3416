use arena_storage::BackingStore;
use deadpool_redis::Pool;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::config::CacheSettings;
use crate::invalidate::{CacheInvalidator, InvalidationEpochs, KeySpace};
use crate::lock::{DynLock, MemoryLock, RedisLock};
use crate::reader::{CacheAsideReader, ReaderOptions, ReaderParts};
use crate::refresh::RefreshScheduler;
use crate::store::{DynCacheStore, MemoryCacheStore, RedisCacheStore};

/// Everything readers and invalidators of one process share: the cache
/// store, the lock service, the refresh pool and the invalidation epochs.
///
/// Build one per process and derive readers/invalidators from it.
pub struct CacheContext {
    store: DynCacheStore,
    lock: DynLock,
    scheduler: Arc<RefreshScheduler>,
    epochs: Arc<InvalidationEpochs>,
    settings: CacheSettings,
}

impl CacheContext {
    /// Starts the refresh pool; must be called from within a tokio runtime.
    pub fn new(store: DynCacheStore, lock: DynLock, settings: CacheSettings) -> Self {
        let scheduler = RefreshScheduler::start(Arc::clone(&lock), settings.refresh_settings());
        Self {
            store,
            lock,
            scheduler,
            epochs: Arc::new(InvalidationEpochs::new()),
            settings,
        }
    }

    /// Single-instance context over in-process store and lock.
    pub fn in_memory(settings: CacheSettings) -> Self {
        let store: DynCacheStore = Arc::new(MemoryCacheStore::new());
        let lock: DynLock = Arc::new(MemoryLock::new(settings.lock_backoff()));
        Self::new(store, lock, settings)
    }

    /// Context sharing one Redis pool between cache store and lock.
    pub fn redis(pool: Pool, settings: CacheSettings) -> Self {
        let store: DynCacheStore = Arc::new(RedisCacheStore::new(
            pool.clone(),
            settings.scan_batch_size,
        ));
        let lock: DynLock = Arc::new(RedisLock::new(pool, settings.lock_backoff()));
        Self::new(store, lock, settings)
    }

    fn parts(&self) -> ReaderParts {
        ReaderParts {
            store: Arc::clone(&self.store),
            lock: Arc::clone(&self.lock),
            scheduler: Arc::clone(&self.scheduler),
            epochs: Arc::clone(&self.epochs),
        }
    }

    /// Reader for per-entity entries under `namespace`.
    pub fn reader<V>(
        &self,
        namespace: impl Into<String>,
        source: Arc<dyn BackingStore<V>>,
    ) -> CacheAsideReader<V>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        CacheAsideReader::new(
            namespace,
            source,
            self.parts(),
            ReaderOptions::entity(&self.settings),
        )
    }

    /// Reader for aggregate entries; uses the short aggregate TTL.
    pub fn aggregate_reader<V>(
        &self,
        namespace: impl Into<String>,
        source: Arc<dyn BackingStore<V>>,
    ) -> CacheAsideReader<V>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        CacheAsideReader::new(
            namespace,
            source,
            self.parts(),
            ReaderOptions::aggregate(&self.settings),
        )
    }

    pub fn invalidator(&self, keyspace: KeySpace) -> CacheInvalidator {
        CacheInvalidator::new(
            Arc::clone(&self.store),
            keyspace,
            Arc::clone(&self.epochs),
        )
    }

    pub fn store(&self) -> &DynCacheStore {
        &self.store
    }

    pub fn lock(&self) -> &DynLock {
        &self.lock
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Drains pending refreshes and stops the refresh workers.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

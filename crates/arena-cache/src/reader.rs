//! Cache-aside reads.
//!
//! ```text
//! get(id)
//!   │
//!   ├─ fresh value ─────────────► return it
//!   ├─ null marker ─────────────► return None
//!   ├─ stale value ─────────────► return it, schedule refresh (if lock free)
//!   └─ miss / corrupt / down ───► lock ─► re-check ─► load ─► fill ─► unlock
//! ```
//!
//! On a miss only the lock holder reads the backing store; concurrent readers
//! of the same key wait for the lock, then find the entry the holder wrote.

use arena_storage::BackingStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, trace, warn};

use crate::config::CacheSettings;
use crate::entry::{self, CacheEntry};
use crate::error::CacheError;
use crate::invalidate::InvalidationEpochs;
use crate::lock::{DynLock, lock_key};
use crate::metrics::{self, HitState};
use crate::refresh::{RefreshScheduler, RefreshTask, refresh_job};
use crate::store::DynCacheStore;
use crate::ttl::TtlPolicy;

/// Timing knobs of a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    pub ttl: TtlPolicy,
    /// Total wait for the recompute lock on a miss
    pub lock_wait: Duration,
    pub lock_lease: Duration,
    /// Lease of the lock taken when scheduling a refresh
    pub refresh_lease: Duration,
}

impl ReaderOptions {
    /// Options for per-entity entries.
    pub fn entity(settings: &CacheSettings) -> Self {
        Self {
            ttl: settings.ttl_policy(),
            lock_wait: settings.lock_wait_timeout(),
            lock_lease: settings.lock_lease(),
            refresh_lease: Duration::from_secs(settings.refresh_lease_secs),
        }
    }

    /// Options for aggregate entries (short TTL).
    pub fn aggregate(settings: &CacheSettings) -> Self {
        Self {
            ttl: settings.aggregate_ttl_policy(),
            ..Self::entity(settings)
        }
    }
}

/// Shared handles a reader works with.
#[derive(Clone)]
pub struct ReaderParts {
    pub store: DynCacheStore,
    pub lock: DynLock,
    pub scheduler: Arc<RefreshScheduler>,
    pub epochs: Arc<InvalidationEpochs>,
}

enum Lookup<V> {
    Fresh(V),
    Stale(V),
    Null,
    Miss,
}

struct ReaderInner<V> {
    namespace: String,
    source: Arc<dyn BackingStore<V>>,
    parts: ReaderParts,
    options: ReaderOptions,
}

/// Reads records of one namespace through the cache.
///
/// Keys are `{namespace}:{id}`; the backing store is queried by `id`.
pub struct CacheAsideReader<V> {
    inner: Arc<ReaderInner<V>>,
}

impl<V> Clone for CacheAsideReader<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> CacheAsideReader<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        namespace: impl Into<String>,
        source: Arc<dyn BackingStore<V>>,
        parts: ReaderParts,
        options: ReaderOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                namespace: namespace.into(),
                source,
                parts,
                options,
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn key_for(&self, id: &str) -> String {
        self.inner.key_for(id)
    }

    /// Reads `id`, consulting the backing store only on a miss.
    ///
    /// Returns `Ok(None)` when the record does not exist. Cache-service
    /// failures and corrupt entries degrade to a direct read.
    ///
    /// # Errors
    ///
    /// [`CacheError::LockTimeout`] when another caller held the recompute
    /// lock for the whole wait budget and still nothing was cached, and
    /// [`CacheError::Storage`] when the backing store fails. A storage
    /// failure is never cached.
    pub async fn get(&self, id: &str) -> Result<Option<V>, CacheError> {
        let inner = &self.inner;
        let key = inner.key_for(id);

        match inner.lookup(&key).await {
            Lookup::Fresh(value) => {
                metrics::record_hit(&inner.namespace, HitState::Fresh);
                return Ok(Some(value));
            }
            Lookup::Null => {
                metrics::record_hit(&inner.namespace, HitState::Null);
                return Ok(None);
            }
            Lookup::Stale(value) => {
                metrics::record_hit(&inner.namespace, HitState::Stale);
                self.schedule_refresh(id, &key).await;
                return Ok(Some(value));
            }
            Lookup::Miss => {}
        }

        metrics::record_miss(&inner.namespace);
        inner.recompute(id, &key).await
    }

    /// Takes the refresh lock without waiting and queues a recompute.
    ///
    /// Lock contention, lock-service failures and a full queue all leave the
    /// stale entry in place.
    async fn schedule_refresh(&self, id: &str, key: &str) {
        let parts = &self.inner.parts;
        let handle = match parts
            .lock
            .try_acquire(&lock_key(key), self.inner.options.refresh_lease)
            .await
        {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                trace!(key = %key, "refresh in flight or recently failed");
                return;
            }
            Err(e) => {
                debug!(key = %key, error = %e, "refresh not scheduled, lock service unavailable");
                return;
            }
        };

        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        let job = refresh_job(move || async move { inner.refresh(&id).await });

        if let Err(e) = parts
            .scheduler
            .submit(RefreshTask::new(key, job).with_lock(handle))
        {
            debug!(key = %key, error = %e, "refresh not scheduled");
        }
    }
}

impl<V> ReaderInner<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn key_for(&self, id: &str) -> String {
        format!("{}:{id}", self.namespace)
    }

    async fn lookup(&self, key: &str) -> Lookup<V> {
        let bytes = match self.parts.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Lookup::Miss,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, falling back to backing store");
                return Lookup::Miss;
            }
        };

        match entry::decode::<V>(key, &bytes) {
            Ok(entry) => {
                let fresh = entry.is_fresh_at(OffsetDateTime::now_utc());
                match entry {
                    CacheEntry::Value { value, .. } if fresh => Lookup::Fresh(value),
                    CacheEntry::Value { value, .. } => Lookup::Stale(value),
                    CacheEntry::NullMarker => Lookup::Null,
                }
            }
            Err(_) => {
                metrics::record_corrupt(&self.namespace);
                warn!(key = %key, "corrupt cache entry, treating as miss");
                Lookup::Miss
            }
        }
    }

    /// Miss path: single-flight recompute under the key's lock.
    async fn recompute(&self, id: &str, key: &str) -> Result<Option<V>, CacheError> {
        let lock_key = lock_key(key);
        let lock = &self.parts.lock;

        match lock
            .acquire(&lock_key, self.options.lock_wait, self.options.lock_lease)
            .await
        {
            Ok(handle) => {
                let result = self.fill_under_lock(id, key).await;
                if let Err(e) = lock.release(&handle).await {
                    warn!(key = %lock_key, error = %e, "failed to release recompute lock");
                }
                result
            }
            Err(CacheError::LockTimeout { key: lock_key }) => {
                // the holder may have filled the entry just as we gave up
                match self.lookup(key).await {
                    Lookup::Fresh(value) | Lookup::Stale(value) => Ok(Some(value)),
                    Lookup::Null => Ok(None),
                    Lookup::Miss => {
                        metrics::record_lock_timeout(&self.namespace);
                        warn!(key = %key, "timed out waiting for recompute lock");
                        Err(CacheError::LockTimeout { key: lock_key })
                    }
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "lock service unavailable, loading without lock");
                self.load_and_fill(id, key).await
            }
        }
    }

    async fn fill_under_lock(&self, id: &str, key: &str) -> Result<Option<V>, CacheError> {
        match self.lookup(key).await {
            Lookup::Fresh(value) | Lookup::Stale(value) => {
                trace!(key = %key, "filled by previous lock holder");
                Ok(Some(value))
            }
            Lookup::Null => Ok(None),
            Lookup::Miss => self.load_and_fill(id, key).await,
        }
    }

    /// Background refresh body; runs with the refresh lock held.
    async fn refresh(&self, id: &str) -> Result<(), CacheError> {
        let key = self.key_for(id);
        if let Lookup::Fresh(_) | Lookup::Null = self.lookup(&key).await {
            debug!(key = %key, "entry already refreshed");
            return Ok(());
        }
        self.load_and_fill(id, &key).await.map(|_| ())
    }

    /// Reads the backing store and writes the result (or a null marker).
    ///
    /// Storage errors propagate and nothing is written. Cache write failures
    /// are logged; the caller still gets the loaded record.
    async fn load_and_fill(&self, id: &str, key: &str) -> Result<Option<V>, CacheError> {
        let epochs = &self.parts.epochs;
        let seen = epochs.snapshot(id).await;
        let found = self.source.find(id).await?;

        let ttl = &self.options.ttl;
        let encoded = match &found {
            Some(value) => entry::encode_value(value, ttl.logical_expiry(OffsetDateTime::now_utc()))
                .map(|bytes| (bytes, ttl.hard_ttl())),
            None => entry::encode_null_marker().map(|bytes| (bytes, ttl.null_marker_ttl())),
        };
        let (bytes, hard_ttl) = match encoded {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to encode cache entry");
                return Ok(found);
            }
        };

        let store = &self.parts.store;
        match epochs
            .write_if_unchanged(id, seen, || store.set(key, bytes, hard_ttl))
            .await
        {
            Some(Ok(())) => debug!(
                key = %key,
                ttl_secs = hard_ttl.as_secs(),
                null_marker = found.is_none(),
                "cache filled"
            ),
            Some(Err(e)) => warn!(key = %key, error = %e, "cache fill failed"),
            None => debug!(key = %key, "invalidated during load, skipping cache fill"),
        }
        Ok(found)
    }
}

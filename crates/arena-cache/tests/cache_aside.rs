//! Integration tests for the cache-aside read path.
//!
//! These tests run against the in-process store and lock. Most pause tokio's
//! clock, so TTLs, lock leases and backoff sleeps advance deterministically.
//! Logical expiry follows the wall clock, so tests that let an entry go stale
//! by itself run in real time with a one-second freshness window.

use arena_cache::entry::encode_value;
use arena_cache::{
    CacheContext, CacheError, CacheSettings, CacheStore, DistributedLock, DynCacheStore, DynLock,
    KeySpace, LockBackoff, LockHandle, MemoryCacheStore, MemoryLock,
};
use arena_storage::{BackingStore, Competition, CompetitionRepository, InMemoryCompetitionStore, StorageError};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;

/// Backing store that counts lookups and answers after a delay.
///
/// The record is read before the delay, like a query whose result is in
/// flight while a concurrent write commits.
struct SlowStore {
    inner: Arc<InMemoryCompetitionStore>,
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowStore {
    fn new(inner: Arc<InMemoryCompetitionStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackingStore<Competition> for SlowStore {
    async fn find(&self, key: &str) -> Result<Option<Competition>, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let found = BackingStore::<Competition>::find(self.inner.as_ref(), key).await;
        tokio::time::sleep(self.delay).await;
        found
    }
}

/// Lock service that is always down.
struct DownLock;

#[async_trait]
impl DistributedLock for DownLock {
    async fn try_acquire(
        &self,
        _key: &str,
        _lease: Duration,
    ) -> Result<Option<LockHandle>, CacheError> {
        Err(CacheError::Unavailable("lock service down".into()))
    }

    async fn release(&self, _handle: &LockHandle) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("lock service down".into()))
    }

    fn backoff(&self) -> LockBackoff {
        LockBackoff::default()
    }
}

struct Harness {
    repo: Arc<InMemoryCompetitionStore>,
    source: Arc<SlowStore>,
    store: Arc<MemoryCacheStore>,
    lock: Arc<MemoryLock>,
    cache: CacheContext,
}

impl Harness {
    fn new(delay: Duration) -> Self {
        Self::with_settings(delay, CacheSettings::default())
    }

    fn with_settings(delay: Duration, settings: CacheSettings) -> Self {
        let repo = Arc::new(InMemoryCompetitionStore::new());
        let source = Arc::new(SlowStore::new(repo.clone(), delay));
        let store = Arc::new(MemoryCacheStore::new());
        let lock = Arc::new(MemoryLock::new(settings.lock_backoff()));
        let cache = CacheContext::new(
            store.clone() as DynCacheStore,
            lock.clone() as DynLock,
            settings,
        );
        Self {
            repo,
            source,
            store,
            lock,
            cache,
        }
    }

    fn reader(&self) -> arena_cache::CacheAsideReader<Competition> {
        self.cache.reader::<Competition>("comp", self.source.clone())
    }

    async fn seed(&self, id: &str, name: &str) -> Competition {
        self.repo
            .save_competition(Competition::new(id, name, "climbing", OffsetDateTime::UNIX_EPOCH))
            .await
            .unwrap()
    }

    /// Caches `name` for `id` with its logical expiry already passed.
    async fn cache_stale(&self, id: &str, name: &str) {
        let stale = Competition::new(id, name, "climbing", OffsetDateTime::UNIX_EPOCH);
        let expired = OffsetDateTime::now_utc() - time::Duration::hours(1);
        self.store
            .set(
                &format!("comp:{id}"),
                encode_value(&stale, expired).unwrap(),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_absent_record_is_null_cached_until_marker_expires() {
    let h = Harness::new(Duration::ZERO);
    let reader = h.reader();

    assert!(reader.get("999").await.unwrap().is_none());
    assert_eq!(h.source.calls(), 1);

    let ttl = h.store.ttl_remaining("comp:999").await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(60));
    assert!(ttl > Duration::from_secs(59));

    tokio::time::advance(Duration::from_secs(30)).await;
    for _ in 0..10 {
        assert!(reader.get("999").await.unwrap().is_none());
    }
    assert_eq!(h.source.calls(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(reader.get("999").await.unwrap().is_none());
    assert_eq!(h.source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_filled_entry_gets_jittered_ttl_and_one_query() {
    let h = Harness::new(Duration::from_millis(200));
    h.seed("42", "Spring Open").await;
    let reader = h.reader();

    let first = tokio::spawn({
        let reader = reader.clone();
        async move { reader.get("42").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = tokio::spawn({
        let reader = reader.clone();
        async move { reader.get("42").await }
    });

    let a = first.await.unwrap().unwrap().unwrap();
    let b = second.await.unwrap().unwrap().unwrap();
    assert_eq!(a.name, "Spring Open");
    assert_eq!(a.id, b.id);
    assert_eq!(a.name, b.name);
    assert_eq!(h.source.calls(), 1);

    let ttl = h.store.ttl_remaining("comp:42").await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(3900));
    // the second reader slept up to 500ms before finding the entry
    assert!(ttl >= Duration::from_secs(3599));
    assert!(!h.lock.is_locked("lock:comp:42"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_query_backing_store_once() {
    let h = Harness::new(Duration::from_millis(300));
    h.seed("42", "Spring Open").await;
    let reader = h.reader();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let reader = reader.clone();
            tokio::spawn(async move { reader.get("42").await })
        })
        .collect();

    for task in tasks {
        let found = task.await.unwrap().unwrap();
        assert_eq!(found.map(|c| c.name).as_deref(), Some("Spring Open"));
    }
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_entry_is_served_and_refreshed_once() {
    let h = Harness::new(Duration::from_millis(50));
    let mut stale = h.seed("42", "Spring Open").await;
    stale.name = "Old Name".to_string();

    let expired = OffsetDateTime::now_utc() - time::Duration::hours(1);
    h.store
        .set(
            "comp:42",
            encode_value(&stale, expired).unwrap(),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

    let reader = h.reader();
    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let reader = reader.clone();
            tokio::spawn(async move { reader.get("42").await })
        })
        .collect();
    for task in tasks {
        let served = task.await.unwrap().unwrap().unwrap();
        assert_eq!(served.name, "Old Name");
    }

    h.cache.shutdown().await;
    assert_eq!(h.source.calls(), 1);
    assert!(!h.lock.is_locked("lock:comp:42"));

    let refreshed = reader.get("42").await.unwrap().unwrap();
    assert_eq!(refreshed.name, "Spring Open");
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_is_not_retried_within_lease() {
    let h = Harness::new(Duration::ZERO);
    h.seed("42", "Spring Open").await;
    h.cache_stale("42", "Old Name").await;
    h.repo.set_fail_reads(true);

    let reader = h.reader();
    for _ in 0..5 {
        assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Old Name");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(h.source.calls(), 1);
    assert!(h.lock.is_locked("lock:comp:42"));

    // once the lease lapses the next stale read retries
    h.repo.set_fail_reads(false);
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Old Name");
    h.cache.shutdown().await;
    assert_eq!(h.source.calls(), 2);
    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");
}

#[tokio::test(start_paused = true)]
async fn test_slow_refresh_is_not_duplicated() {
    let h = Harness::new(Duration::from_secs(7));
    h.seed("42", "Spring Open").await;
    h.cache_stale("42", "Old Name").await;
    let reader = h.reader();

    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Old Name");
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Old Name");

    h.cache.shutdown().await;
    assert_eq!(h.source.calls(), 1);
    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");
}

#[tokio::test]
async fn test_own_entry_goes_stale_after_logical_window() {
    let settings = CacheSettings {
        base_ttl_secs: 60,
        ttl_jitter_max_secs: 0,
        logical_window_secs: 1,
        ..Default::default()
    };
    let h = Harness::with_settings(Duration::ZERO, settings);
    let mut competition = h.seed("42", "Spring Open").await;
    let reader = h.reader();

    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");

    // committed without invalidation, so only a refresh can pick it up
    competition.name = "Summer Open".to_string();
    h.repo.save_competition(competition).await.unwrap();
    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");
    assert_eq!(h.source.calls(), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");

    h.cache.shutdown().await;
    assert_eq!(h.source.calls(), 2);
    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Summer Open");
}

#[tokio::test(start_paused = true)]
async fn test_read_after_write_sees_new_value() {
    let h = Harness::new(Duration::ZERO);
    let mut competition = h.seed("42", "Spring Open").await;
    let reader = h.reader();
    let invalidator = h.cache.invalidator(KeySpace::new("comp"));

    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");

    competition.name = "Summer Open".to_string();
    h.repo.save_competition(competition).await.unwrap();
    let report = invalidator.on_write("42").await;
    assert!(report.exact_removed);

    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Summer Open");
}

#[tokio::test(start_paused = true)]
async fn test_load_racing_a_write_does_not_repopulate_old_value() {
    let h = Harness::new(Duration::from_millis(200));
    let mut competition = h.seed("42", "Spring Open").await;
    let reader = h.reader();
    let invalidator = h.cache.invalidator(KeySpace::new("comp"));

    let in_flight = tokio::spawn({
        let reader = reader.clone();
        async move { reader.get("42").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    competition.name = "Summer Open".to_string();
    h.repo.save_competition(competition).await.unwrap();
    invalidator.on_write("42").await;

    // the in-flight read may return what it loaded, but must not cache it
    let loaded = in_flight.await.unwrap().unwrap().unwrap();
    assert_eq!(loaded.name, "Spring Open");
    assert!(h.store.get("comp:42").await.unwrap().is_none());

    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Summer Open");
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_entry_is_treated_as_miss() {
    let h = Harness::new(Duration::ZERO);
    h.seed("42", "Spring Open").await;
    h.store
        .set("comp:42", b"\xc1not msgpack".to_vec(), Duration::from_secs(60))
        .await
        .unwrap();

    let reader = h.reader();
    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");
    assert_eq!(h.source.calls(), 1);

    // the corrupt payload was overwritten with a valid entry
    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_storage_error_propagates_and_is_not_cached() {
    let h = Harness::new(Duration::ZERO);
    h.seed("42", "Spring Open").await;
    let reader = h.reader();

    h.repo.set_fail_reads(true);
    let err = reader.get("42").await.unwrap_err();
    assert!(err.is_storage());
    assert!(h.store.get("comp:42").await.unwrap().is_none());
    assert!(!h.lock.is_locked("lock:comp:42"));

    h.repo.set_fail_reads(false);
    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_cache_falls_back_to_backing_store() {
    let h = Harness::new(Duration::ZERO);
    h.seed("42", "Spring Open").await;
    let reader = h.reader();
    h.store.set_unavailable(true);

    for _ in 0..3 {
        assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");
    }
    assert_eq!(h.source.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_lock_service_fails_open() {
    let repo = Arc::new(InMemoryCompetitionStore::new());
    repo.save_competition(Competition::new(
        "42",
        "Spring Open",
        "climbing",
        OffsetDateTime::UNIX_EPOCH,
    ))
    .await
    .unwrap();
    let store = Arc::new(MemoryCacheStore::new());
    let cache = CacheContext::new(
        store.clone() as DynCacheStore,
        Arc::new(DownLock) as DynLock,
        CacheSettings::default(),
    );
    let reader = cache.reader::<Competition>("comp", repo.clone());

    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");
    assert!(store.get("comp:42").await.unwrap().is_some());
    assert_eq!(reader.get("42").await.unwrap().unwrap().name, "Spring Open");
    assert_eq!(repo.lookup_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lock_timeout_when_holder_never_fills() {
    let h = Harness::new(Duration::ZERO);
    h.seed("42", "Spring Open").await;
    let _holder = h
        .lock
        .try_acquire("lock:comp:42", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let started = tokio::time::Instant::now();
    let err = h.reader().get("42").await.unwrap_err();

    assert!(matches!(err, CacheError::LockTimeout { .. }));
    assert!(started.elapsed() <= Duration::from_secs(2));
    assert_eq!(h.source.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_crashed_holder_lease_expires() {
    let settings = CacheSettings {
        lock_wait_timeout_secs: 2,
        lock_max_attempts: 5,
        ..Default::default()
    };
    let h = Harness::with_settings(Duration::ZERO, settings);
    h.seed("42", "Spring Open").await;

    // holder crashed with 500ms of its lease left
    let _dead = h
        .lock
        .try_acquire("lock:comp:42", Duration::from_millis(500))
        .await
        .unwrap()
        .unwrap();

    let found = h.reader().get("42").await.unwrap();
    assert_eq!(found.unwrap().name, "Spring Open");
    assert_eq!(h.source.calls(), 1);
}

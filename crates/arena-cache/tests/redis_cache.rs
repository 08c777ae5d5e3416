//! Integration tests for the Redis cache store and lock.
//!
//! Tests use testcontainers to spin up a real Redis instance.

use arena_cache::{
    CacheContext, CacheSettings, CacheStore, DistributedLock, KeySpace, LockBackoff,
    RedisCacheStore, RedisLock,
};
use arena_storage::{Competition, CompetitionRepository, InMemoryCompetitionStore};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use time::OffsetDateTime;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn pool() -> deadpool_redis::Pool {
    let url = get_redis_url().await;
    deadpool_redis::Config::from_url(url)
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("create redis pool")
}

#[tokio::test]
async fn test_redis_store_get_set_ttl() {
    let store = RedisCacheStore::new(pool().await, 100);

    store
        .set("it:store:1", b"value".to_vec(), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(store.get("it:store:1").await.unwrap(), Some(b"value".to_vec()));

    let ttl = store.ttl_remaining("it:store:1").await.unwrap().unwrap();
    assert!(ttl <= Duration::from_secs(60));
    assert!(ttl > Duration::from_secs(55));

    assert!(store.delete("it:store:1").await.unwrap());
    assert!(!store.delete("it:store:1").await.unwrap());
    assert_eq!(store.ttl_remaining("it:store:1").await.unwrap(), None);
}

#[tokio::test]
async fn test_redis_store_expiration() {
    let store = RedisCacheStore::new(pool().await, 100);

    store
        .set("it:expiring", b"value".to_vec(), Duration::from_millis(100))
        .await
        .unwrap();
    assert!(store.get("it:expiring").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(store.get("it:expiring").await.unwrap().is_none());
}

#[tokio::test]
async fn test_redis_pattern_delete_walks_all_batches() {
    // small batches force several SCAN rounds
    let store = RedisCacheStore::new(pool().await, 3);
    let ttl = Duration::from_secs(60);

    for i in 0..25 {
        store
            .set(&format!("it:lb:{i}:77"), b"x".to_vec(), ttl)
            .await
            .unwrap();
    }
    store.set("it:lb:5:78", b"x".to_vec(), ttl).await.unwrap();

    let removed = store.delete_by_pattern("it:lb:*77*").await.unwrap();
    assert_eq!(removed, 25);
    assert!(store.get("it:lb:5:78").await.unwrap().is_some());
}

#[tokio::test]
async fn test_redis_lock_mutual_exclusion_and_owner_checked_release() {
    let lock = RedisLock::new(pool().await, LockBackoff::default());

    let first = lock
        .try_acquire("it:lock:a", Duration::from_secs(10))
        .await
        .unwrap()
        .expect("lock should be free");
    assert!(
        lock.try_acquire("it:lock:a", Duration::from_secs(10))
            .await
            .unwrap()
            .is_none()
    );

    assert!(lock.release(&first).await.unwrap());
    assert!(!lock.release(&first).await.unwrap());
}

#[tokio::test]
async fn test_redis_lock_lease_expires() {
    let lock = RedisLock::new(pool().await, LockBackoff::default());

    let stale = lock
        .try_acquire("it:lock:lease", Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let fresh = lock
        .try_acquire("it:lock:lease", Duration::from_secs(10))
        .await
        .unwrap()
        .expect("expired lease should free the lock");

    // the old holder cannot release the new holder's lock
    assert!(!lock.release(&stale).await.unwrap());
    assert!(lock.release(&fresh).await.unwrap());
}

#[tokio::test]
async fn test_redis_cache_aside_round_trip() {
    let repo = Arc::new(InMemoryCompetitionStore::new());
    let mut competition = repo
        .save_competition(Competition::new(
            "it-42",
            "Spring Open",
            "climbing",
            OffsetDateTime::UNIX_EPOCH,
        ))
        .await
        .unwrap();

    let cache = CacheContext::redis(pool().await, CacheSettings::default());
    let reader = cache.reader::<Competition>("it-comp", repo.clone());
    let invalidator = cache.invalidator(KeySpace::new("it-comp"));

    assert_eq!(reader.get("it-42").await.unwrap().unwrap().name, "Spring Open");
    assert_eq!(reader.get("it-42").await.unwrap().unwrap().name, "Spring Open");
    assert_eq!(repo.lookup_count(), 1);

    let ttl = cache
        .store()
        .ttl_remaining("it-comp:it-42")
        .await
        .unwrap()
        .unwrap();
    assert!(ttl >= Duration::from_secs(3590));
    assert!(ttl <= Duration::from_secs(3900));

    competition.name = "Summer Open".to_string();
    repo.save_competition(competition).await.unwrap();
    invalidator.on_write("it-42").await;

    assert_eq!(reader.get("it-42").await.unwrap().unwrap().name, "Summer Open");
    assert!(reader.get("it-missing").await.unwrap().is_none());

    cache.shutdown().await;
}

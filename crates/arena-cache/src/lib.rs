//! # arena-cache
//!
//! Cache-aside layer in front of the competition store.
//!
//! ## Guarantees
//!
//! - **Null caching**: absent records are cached as a short-lived marker, so
//!   repeated lookups of a missing id do not reach the backing store.
//! - **TTL jitter**: every value gets `base + random(0..=jitter)` as hard TTL,
//!   so entries populated together expire apart.
//! - **Single-flight recompute**: on a miss only the holder of
//!   `lock:{key}` reads the backing store; other readers wait and re-check.
//! - **Stale-while-revalidate**: past its logical expiry an entry is still
//!   served while one background refresh recomputes it.
//! - **Write invalidation**: writes delete the entity key and every
//!   aggregate key that embeds the entity id.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use arena_cache::{CacheContext, CacheSettings, KeySpace};
//! use arena_storage::{Competition, InMemoryCompetitionStore};
//!
//! let repo = Arc::new(InMemoryCompetitionStore::new());
//! let cache = CacheContext::in_memory(CacheSettings::default());
//!
//! let competitions = cache.reader::<Competition>("comp", repo.clone());
//! let invalidator = cache.invalidator(KeySpace::new("comp").with_aggregate("leaderboard"));
//!
//! let found = competitions.get("42").await?;
//! invalidator.on_write("42").await;
//! ```

pub mod config;
mod context;
pub mod entry;
mod error;
pub mod invalidate;
pub mod lock;
pub mod metrics;
pub mod reader;
pub mod refresh;
pub mod store;
pub mod ttl;

pub use config::CacheSettings;
pub use context::CacheContext;
pub use entry::CacheEntry;
pub use error::CacheError;
pub use invalidate::{CacheInvalidator, InvalidationEpochs, InvalidationReport, KeySpace};
pub use lock::{DistributedLock, DynLock, LockBackoff, LockHandle, MemoryLock, RedisLock, lock_key};
pub use reader::{CacheAsideReader, ReaderOptions, ReaderParts};
pub use refresh::{RefreshJob, RefreshScheduler, RefreshSettings, RefreshTask, refresh_job};
pub use store::{CacheStore, DynCacheStore, MemoryCacheStore, RedisCacheStore};
pub use ttl::TtlPolicy;

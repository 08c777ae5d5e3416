use arena_cache::{CacheContext, CacheSettings};
use std::time::Duration;

use crate::config::{AppConfig, RedisConfig};

/// Builds the cache store, lock and refresh pool from configuration.
///
/// Falls back to the in-process store and lock (single-node mode) when Redis
/// is disabled, the pool cannot be created, or the first connection fails.
pub async fn build_cache_stack(config: &AppConfig) -> CacheContext {
    let settings = config.cache.clone();
    if !config.redis.enabled {
        tracing::info!("Redis disabled, using in-process cache and lock");
        return CacheContext::in_memory(settings);
    }

    match connect_redis(&config.redis).await {
        Some(pool) => {
            let cache = CacheContext::redis(pool, settings);
            tracing::info!(
                backend = cache.backend_name(),
                refresh_pool_size = config.cache.refresh_pool_size,
                "Cache stack ready"
            );
            cache
        }
        None => local_fallback(settings),
    }
}

async fn connect_redis(config: &RedisConfig) -> Option<deadpool_redis::Pool> {
    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create Redis pool");
            return None;
        }
    };

    // Test connection
    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            Some(pool)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to connect to Redis");
            None
        }
    }
}

fn local_fallback(settings: CacheSettings) -> CacheContext {
    tracing::warn!("Falling back to in-process cache; entries are not shared between instances");
    CacheContext::in_memory(settings)
}

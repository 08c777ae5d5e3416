//! # arena-admin
//!
//! Application wiring for the Arena competition administration backend:
//! configuration, logging, metrics, the cache stack and the
//! [`CompetitionService`] methods that read through it.
//!
//! ```ignore
//! let arena = arena_admin::Arena::start(None, Arc::new(InMemoryCompetitionStore::new())).await?;
//! let competition = arena.service().get_competition("42").await?;
//! arena.shutdown().await;
//! ```

pub mod bootstrap;
pub mod config;
pub mod metrics;
pub mod observability;
pub mod service;

pub use bootstrap::build_cache_stack;
pub use config::{AppConfig, LoggingConfig, RedisConfig, ServiceConfig};
pub use service::{CompetitionService, ServiceError, ServiceResult};

use anyhow::Context;
use arena_cache::CacheContext;
use arena_storage::CompetitionRepository;
use std::sync::Arc;

/// A running instance: configuration, cache stack and service.
pub struct Arena {
    config: AppConfig,
    cache: CacheContext,
    service: CompetitionService,
}

impl Arena {
    /// Loads `.env` and the configuration, initializes logging and metrics,
    /// and builds the cache stack in front of `repository`.
    pub async fn start<R>(config_path: Option<&str>, repository: Arc<R>) -> anyhow::Result<Self>
    where
        R: CompetitionRepository + 'static,
    {
        // Load .env file if present; a missing file is fine
        if let Err(e) = dotenvy::dotenv() {
            if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
            {
                eprintln!("Warning: Failed to load .env file: {e}");
            }
        }

        let config = config::loader::load_config(config_path)
            .map_err(anyhow::Error::msg)
            .context("loading configuration")?;

        observability::init_tracing_with_level(&config.logging.level);
        metrics::init_metrics();

        let cache = build_cache_stack(&config).await;
        let service = CompetitionService::new(repository, &cache);

        tracing::info!(
            backend = cache.backend_name(),
            base_ttl_secs = config.cache.base_ttl_secs,
            lock_wait_timeout_secs = config.cache.lock_wait_timeout_secs,
            "Arena started"
        );

        Ok(Self {
            config,
            cache,
            service,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheContext {
        &self.cache
    }

    pub fn service(&self) -> &CompetitionService {
        &self.service
    }

    /// Drains pending background refreshes.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
        tracing::info!("Arena stopped");
    }
}

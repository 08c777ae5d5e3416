//! Process-wide logging.
//!
//! One `tracing` subscriber per process: an `EnvFilter` behind a reload
//! layer, so the level from `[logging]` can be changed after startup, and a
//! plain `fmt` layer on stdout. `RUST_LOG`, when set and parseable, wins
//! over the configured level at startup.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER: OnceLock<FilterHandle> = OnceLock::new();

fn startup_filter(level: &str) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        Err(_) => EnvFilter::new(level),
    }
}

pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Installs the subscriber at `level`. Later calls only change the level.
pub fn init_tracing_with_level(level: &str) {
    let (filter, handle) = reload::Layer::new(startup_filter(level));
    if FILTER.set(handle).is_err() {
        apply_logging_level(level);
        return;
    }

    // another subscriber (e.g. a test harness) may already be global
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Swaps the active filter; a no-op before [`init_tracing_with_level`].
pub fn apply_logging_level(level: &str) {
    let Some(handle) = FILTER.get() else {
        return;
    };
    if let Err(e) = handle.reload(EnvFilter::new(level)) {
        tracing::warn!(level, error = %e, "failed to apply logging level");
    }
}

//! Prometheus exporter for the cache metrics.
//!
//! `arena-cache` records counters through the `metrics` facade; this module
//! installs the recorder that collects them and renders the text format.

use arena_cache::metrics::names;
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics exporter.
///
/// This should be called once at startup.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: the embedding service exposes render_metrics() itself
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            describe_cache_metrics();
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

fn describe_cache_metrics() {
    describe_counter!(names::CACHE_HITS_TOTAL, "Cache hits by state (fresh, stale, null)");
    describe_counter!(names::CACHE_MISSES_TOTAL, "Cache misses");
    describe_counter!(names::CACHE_CORRUPT_TOTAL, "Cache entries that failed to decode");
    describe_counter!(
        names::CACHE_UNAVAILABLE_TOTAL,
        "Failed calls to the cache or lock service"
    );
    describe_counter!(
        names::CACHE_LOCK_TIMEOUTS_TOTAL,
        "Reads that gave up waiting for the recompute lock"
    );
    describe_counter!(names::CACHE_REFRESH_TOTAL, "Background refresh events");
    describe_counter!(
        names::CACHE_INVALIDATIONS_TOTAL,
        "Cache keys removed by write invalidation"
    );
}

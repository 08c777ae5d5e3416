//! Expiry policy: jittered hard TTLs and logical (soft) expiry.

use rand::Rng;
use std::time::Duration;
use time::OffsetDateTime;

/// How long entries live in the cache and how long they count as fresh.
///
/// The hard TTL is owned by the cache service. The logical expiry is an
/// absolute timestamp stored inside the payload; past it, readers serve the
/// entry as stale and schedule a background refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub base: Duration,
    pub jitter_max: Duration,
    pub logical_window: Duration,
    pub null_marker: Duration,
}

impl TtlPolicy {
    /// Hard TTL for a value entry: `base + random(0..=jitter_max)`.
    ///
    /// Drawn per write so that entries populated together do not expire
    /// together.
    pub fn hard_ttl(&self) -> Duration {
        let jitter_ms = self.jitter_max.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        self.base + Duration::from_millis(jitter)
    }

    /// Logical expiry for a value written at `now`.
    pub fn logical_expiry(&self, now: OffsetDateTime) -> OffsetDateTime {
        now + self.logical_window
    }

    /// Fixed TTL of null markers.
    pub fn null_marker_ttl(&self) -> Duration {
        self.null_marker
    }
}

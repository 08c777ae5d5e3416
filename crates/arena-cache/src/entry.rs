//! Cache entry envelope.
//!
//! Values are stored as MessagePack with named fields:
//!
//! ```text
//! value entry:  { logical_expiry_ms: <unix ms>, value: <V> }
//! null marker:  { }
//! ```
//!
//! Anything else (one field without the other, undecodable bytes, a `V`
//! missing required fields) is a corrupt entry.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::CacheError;

#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "V: Serialize", deserialize = "V: Deserialize<'de>"))]
struct Envelope<V> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    logical_expiry_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<V>,
}

/// A decoded cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry<V> {
    /// A cached record with its logical (soft) expiry.
    Value {
        value: V,
        logical_expiry: OffsetDateTime,
    },
    /// The record is known to be absent from the backing store.
    NullMarker,
}

impl<V> CacheEntry<V> {
    /// `true` while `now <= logical_expiry`. Null markers are always fresh;
    /// they only ever leave the cache by hard TTL or invalidation.
    pub fn is_fresh_at(&self, now: OffsetDateTime) -> bool {
        match self {
            CacheEntry::Value { logical_expiry, .. } => now <= *logical_expiry,
            CacheEntry::NullMarker => true,
        }
    }
}

/// Encodes a value entry.
pub fn encode_value<V: Serialize>(
    value: &V,
    logical_expiry: OffsetDateTime,
) -> Result<Vec<u8>, CacheError> {
    let millis = (logical_expiry.unix_timestamp_nanos() / 1_000_000) as i64;
    let envelope = Envelope {
        logical_expiry_ms: Some(millis),
        value: Some(value),
    };
    Ok(rmp_serde::to_vec_named(&envelope)?)
}

/// Encodes a null marker.
pub fn encode_null_marker() -> Result<Vec<u8>, CacheError> {
    let envelope: Envelope<()> = Envelope {
        logical_expiry_ms: None,
        value: None,
    };
    Ok(rmp_serde::to_vec_named(&envelope)?)
}

/// Decodes and validates a cached payload.
///
/// The error carries the key only, never the payload.
pub fn decode<V: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<CacheEntry<V>, CacheError> {
    let corrupt = || CacheError::CorruptEntry {
        key: key.to_string(),
    };
    let envelope: Envelope<V> = rmp_serde::from_slice(bytes).map_err(|_| corrupt())?;

    match (envelope.logical_expiry_ms, envelope.value) {
        (Some(millis), Some(value)) => {
            let logical_expiry =
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
                    .map_err(|_| corrupt())?;
            Ok(CacheEntry::Value {
                value,
                logical_expiry,
            })
        }
        (None, None) => Ok(CacheEntry::NullMarker),
        _ => Err(corrupt()),
    }
}

//! Storage traits for the backing store contract.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{Competition, Leaderboard, Registration};

/// Read contract the cache layer requires from the authoritative store.
///
/// `key` is the record identifier without any cache prefix. Implementations
/// must be thread-safe (`Send + Sync`); they are shared behind `Arc` by
/// cache readers and background refresh workers.
///
/// # Example
///
/// ```ignore
/// use arena_storage::{BackingStore, Competition};
///
/// async fn exists(store: &dyn BackingStore<Competition>, id: &str) -> bool {
///     matches!(store.find(id).await, Ok(Some(_)))
/// }
/// ```
#[async_trait]
pub trait BackingStore<R: Send>: Send + Sync {
    /// Looks a record up by key.
    ///
    /// Returns `None` if the record does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing records.
    async fn find(&self, key: &str) -> Result<Option<R>, StorageError>;
}

/// Write-side operations used by the competition service.
///
/// Every successful write is followed by cache invalidation at the service
/// layer; the repository itself knows nothing about caching.
#[async_trait]
pub trait CompetitionRepository: BackingStore<Competition> + BackingStore<Leaderboard> {
    /// Inserts or replaces a competition.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidRecord` if the competition is malformed.
    async fn save_competition(&self, competition: Competition)
    -> Result<Competition, StorageError>;

    /// Deletes a competition and its registrations.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the competition does not exist.
    async fn delete_competition(&self, id: &str) -> Result<(), StorageError>;

    /// Adds a registration to an existing competition.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the competition does not exist.
    async fn add_registration(
        &self,
        registration: Registration,
    ) -> Result<Registration, StorageError>;

    /// Records the score of a registration.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the registration does not exist or
    /// belongs to another competition.
    async fn record_score(
        &self,
        competition_id: &str,
        registration_id: &str,
        score: f64,
    ) -> Result<Registration, StorageError>;
}

//! Competition service methods.
//!
//! Reads go through the cache; every write commits to the repository first
//! and then invalidates the competition's entries, so the next read reloads
//! what was just written.

use arena_cache::{CacheAsideReader, CacheContext, CacheError, CacheInvalidator, KeySpace};
use arena_storage::{
    Competition, CompetitionRepository, DynRepository, ErrorCategory, Leaderboard, Registration,
    StorageError,
};
use std::sync::Arc;

/// Cache namespace of competition records.
pub const COMPETITION_NAMESPACE: &str = "comp";
/// Cache namespace of leaderboards.
pub const LEADERBOARD_NAMESPACE: &str = "leaderboard";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Service busy, retry later: {0}")]
    Busy(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Cache error: {0}")]
    Cache(CacheError),
}

impl ServiceError {
    /// `true` if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Busy(_) => true,
            ServiceError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e.category() {
            ErrorCategory::Validation => ServiceError::Invalid(e.to_string()),
            _ => ServiceError::Storage(e),
        }
    }
}

impl From<CacheError> for ServiceError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Storage(e) => e.into(),
            CacheError::LockTimeout { .. } => ServiceError::Busy(e.to_string()),
            other => ServiceError::Cache(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Clone)]
pub struct CompetitionService {
    repository: DynRepository,
    competitions: CacheAsideReader<Competition>,
    leaderboards: CacheAsideReader<Leaderboard>,
    invalidator: CacheInvalidator,
}

impl CompetitionService {
    pub fn new<R>(repository: Arc<R>, cache: &CacheContext) -> Self
    where
        R: CompetitionRepository + 'static,
    {
        let competitions = cache.reader::<Competition>(COMPETITION_NAMESPACE, repository.clone());
        let leaderboards =
            cache.aggregate_reader::<Leaderboard>(LEADERBOARD_NAMESPACE, repository.clone());
        let invalidator = cache.invalidator(
            KeySpace::new(COMPETITION_NAMESPACE).with_aggregate(LEADERBOARD_NAMESPACE),
        );
        Self {
            repository,
            competitions,
            leaderboards,
            invalidator,
        }
    }

    pub async fn get_competition(&self, id: &str) -> ServiceResult<Option<Competition>> {
        Ok(self.competitions.get(id).await?)
    }

    pub async fn leaderboard(&self, competition_id: &str) -> ServiceResult<Option<Leaderboard>> {
        Ok(self.leaderboards.get(competition_id).await?)
    }

    pub async fn save_competition(&self, competition: Competition) -> ServiceResult<Competition> {
        let saved = self.repository.save_competition(competition).await?;
        self.invalidate(&saved.id).await;
        Ok(saved)
    }

    pub async fn delete_competition(&self, id: &str) -> ServiceResult<()> {
        match self.repository.delete_competition(id).await {
            Ok(()) => {}
            Err(StorageError::NotFound { .. }) => {
                return Err(ServiceError::NotFound {
                    kind: "competition",
                    id: id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        self.invalidate(id).await;
        Ok(())
    }

    pub async fn register(&self, registration: Registration) -> ServiceResult<Registration> {
        let saved = self.repository.add_registration(registration).await?;
        self.invalidate(&saved.competition_id).await;
        Ok(saved)
    }

    pub async fn record_score(
        &self,
        competition_id: &str,
        registration_id: &str,
        score: f64,
    ) -> ServiceResult<Registration> {
        let scored = self
            .repository
            .record_score(competition_id, registration_id, score)
            .await?;
        self.invalidate(competition_id).await;
        Ok(scored)
    }

    async fn invalidate(&self, competition_id: &str) {
        let report = self.invalidator.on_write(competition_id).await;
        if !report.is_clean() {
            tracing::warn!(
                competition_id = %competition_id,
                failures = report.failures,
                "stale cache entries may be served until they expire"
            );
        }
    }
}

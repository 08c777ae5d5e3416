use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::traits::{BackingStore, CompetitionRepository};
use crate::types::{Competition, Leaderboard, Registration};

/// In-memory competition store backed by `DashMap`.
///
/// Stands in for the relational store in single-node setups and tests. Every
/// `find` is counted so callers can assert how often the cache let a lookup
/// through, and reads can be switched into a failing mode to exercise error
/// propagation.
#[derive(Debug, Default)]
pub struct InMemoryCompetitionStore {
    competitions: DashMap<String, Competition>,
    registrations: DashMap<String, Registration>,
    lookups: AtomicU64,
    fail_reads: AtomicBool,
}

impl InMemoryCompetitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `find` calls served so far, across all record kinds.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Makes every subsequent `find` fail with a connection error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn begin_lookup(&self) -> Result<(), StorageError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::connection_error("store unavailable"));
        }
        Ok(())
    }

    fn registrations_of(&self, competition_id: &str) -> Vec<Registration> {
        self.registrations
            .iter()
            .filter(|r| r.competition_id == competition_id)
            .map(|r| r.value().clone())
            .collect()
    }
}

#[async_trait]
impl BackingStore<Competition> for InMemoryCompetitionStore {
    async fn find(&self, key: &str) -> Result<Option<Competition>, StorageError> {
        self.begin_lookup()?;
        Ok(self.competitions.get(key).map(|c| c.value().clone()))
    }
}

#[async_trait]
impl BackingStore<Leaderboard> for InMemoryCompetitionStore {
    async fn find(&self, key: &str) -> Result<Option<Leaderboard>, StorageError> {
        self.begin_lookup()?;
        if !self.competitions.contains_key(key) {
            return Ok(None);
        }
        Ok(Some(Leaderboard::from_registrations(
            key,
            self.registrations_of(key),
        )))
    }
}

#[async_trait]
impl CompetitionRepository for InMemoryCompetitionStore {
    async fn save_competition(
        &self,
        mut competition: Competition,
    ) -> Result<Competition, StorageError> {
        if competition.id.trim().is_empty() {
            return Err(StorageError::invalid_record("competition id must not be empty"));
        }
        if competition.name.trim().is_empty() {
            return Err(StorageError::invalid_record("competition name must not be empty"));
        }

        competition.registration_count = self.registrations_of(&competition.id).len() as u32;
        competition.updated_at = OffsetDateTime::now_utc();
        self.competitions
            .insert(competition.id.clone(), competition.clone());
        tracing::debug!(competition_id = %competition.id, "competition saved");
        Ok(competition)
    }

    async fn delete_competition(&self, id: &str) -> Result<(), StorageError> {
        if self.competitions.remove(id).is_none() {
            return Err(StorageError::not_found("competition", id));
        }
        self.registrations.retain(|_, r| r.competition_id != id);
        tracing::debug!(competition_id = %id, "competition deleted");
        Ok(())
    }

    async fn add_registration(
        &self,
        registration: Registration,
    ) -> Result<Registration, StorageError> {
        let Some(mut competition) = self.competitions.get_mut(&registration.competition_id) else {
            return Err(StorageError::not_found(
                "competition",
                &registration.competition_id,
            ));
        };
        if self.registrations.contains_key(&registration.id) {
            return Err(StorageError::invalid_record(format!(
                "registration {} already exists",
                registration.id
            )));
        }

        competition.registration_count += 1;
        competition.updated_at = OffsetDateTime::now_utc();
        self.registrations
            .insert(registration.id.clone(), registration.clone());
        Ok(registration)
    }

    async fn record_score(
        &self,
        competition_id: &str,
        registration_id: &str,
        score: f64,
    ) -> Result<Registration, StorageError> {
        if !score.is_finite() {
            return Err(StorageError::invalid_record("score must be a finite number"));
        }
        match self.registrations.get_mut(registration_id) {
            Some(mut registration) if registration.competition_id == competition_id => {
                registration.score = Some(score);
                Ok(registration.clone())
            }
            _ => Err(StorageError::not_found("registration", registration_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn competition(id: &str) -> Competition {
        Competition::new(id, "Spring Open", "climbing", OffsetDateTime::UNIX_EPOCH)
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let store = InMemoryCompetitionStore::new();
        store.save_competition(competition("42")).await.unwrap();

        let found: Option<Competition> = store.find("42").await.unwrap();
        assert_eq!(found.map(|c| c.name), Some("Spring Open".to_string()));

        let missing: Option<Competition> = store.find("43").await.unwrap();
        assert!(missing.is_none());
        assert_eq!(store.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_save_rejects_blank_name() {
        let store = InMemoryCompetitionStore::new();
        let mut c = competition("42");
        c.name = "  ".to_string();

        let err = store.save_competition(c).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn test_registration_and_leaderboard() {
        let store = InMemoryCompetitionStore::new();
        store.save_competition(competition("42")).await.unwrap();
        store
            .add_registration(Registration::new("r1", "42", "ada"))
            .await
            .unwrap();
        store
            .add_registration(Registration::new("r2", "42", "grace"))
            .await
            .unwrap();
        store.record_score("42", "r2", 9.5).await.unwrap();

        let board: Option<Leaderboard> = store.find("42").await.unwrap();
        let board = board.unwrap();
        assert_eq!(board.entries.len(), 2);
        assert_eq!(board.leader().map(|r| r.participant.as_str()), Some("grace"));

        let c: Option<Competition> = store.find("42").await.unwrap();
        assert_eq!(c.unwrap().registration_count, 2);
    }

    #[tokio::test]
    async fn test_registration_requires_competition() {
        let store = InMemoryCompetitionStore::new();
        let err = store
            .add_registration(Registration::new("r1", "missing", "ada"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_record_score_checks_competition() {
        let store = InMemoryCompetitionStore::new();
        store.save_competition(competition("42")).await.unwrap();
        store
            .add_registration(Registration::new("r1", "42", "ada"))
            .await
            .unwrap();

        let err = store.record_score("7", "r1", 1.0).await.unwrap_err();
        assert!(err.is_not_found());

        let err = store.record_score("42", "r1", f64::NAN).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_registrations() {
        let store = InMemoryCompetitionStore::new();
        store.save_competition(competition("42")).await.unwrap();
        store
            .add_registration(Registration::new("r1", "42", "ada"))
            .await
            .unwrap();

        store.delete_competition("42").await.unwrap();
        let board: Option<Leaderboard> = store.find("42").await.unwrap();
        assert!(board.is_none());
        assert!(store.delete_competition("42").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_failing_reads() {
        let store = InMemoryCompetitionStore::new();
        store.set_fail_reads(true);

        let result: Result<Option<Competition>, _> = store.find("42").await;
        assert!(result.unwrap_err().is_transient());
    }
}

//! Record types held by the backing store.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle state of a competition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionStatus {
    Draft,
    Open,
    Closed,
    Finished,
}

impl std::fmt::Display for CompetitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompetitionStatus::Draft => write!(f, "draft"),
            CompetitionStatus::Open => write!(f, "open"),
            CompetitionStatus::Closed => write!(f, "closed"),
            CompetitionStatus::Finished => write!(f, "finished"),
        }
    }
}

/// A competition as stored in the authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competition {
    pub id: String,
    pub name: String,
    pub discipline: String,
    pub status: CompetitionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    pub registration_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Competition {
    /// Creates a draft competition starting at `starts_at`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        discipline: impl Into<String>,
        starts_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            discipline: discipline.into(),
            status: CompetitionStatus::Draft,
            starts_at,
            registration_count: 0,
            updated_at: OffsetDateTime::now_utc(),
        }
    }
}

/// A participant's registration in a competition, with its score once judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: String,
    pub competition_id: String,
    pub participant: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
}

impl Registration {
    pub fn new(
        id: impl Into<String>,
        competition_id: impl Into<String>,
        participant: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            competition_id: competition_id.into(),
            participant: participant.into(),
            score: None,
            registered_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Scored registrations of one competition, best score first.
///
/// Unscored registrations are listed after every scored one, in
/// registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub competition_id: String,
    pub entries: Vec<Registration>,
}

impl Leaderboard {
    /// Builds a leaderboard from unordered registrations.
    pub fn from_registrations(
        competition_id: impl Into<String>,
        mut registrations: Vec<Registration>,
    ) -> Self {
        registrations.sort_by(|a, b| match (a.score, b.score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.registered_at.cmp(&b.registered_at),
        });
        Self {
            competition_id: competition_id.into(),
            entries: registrations,
        }
    }

    /// Returns the current leader, if any registration has been scored.
    pub fn leader(&self) -> Option<&Registration> {
        self.entries.first().filter(|r| r.score.is_some())
    }
}

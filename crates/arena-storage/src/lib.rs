//! # arena-storage
//!
//! Backing store contract for the Arena competition administration backend.
//!
//! The cache layer only ever needs one thing from the authoritative store:
//! look a record up by key. That contract is [`BackingStore`]. Write-side
//! operations live on [`CompetitionRepository`], which service methods use
//! before invalidating the cache.
//!
//! ## Example
//!
//! ```ignore
//! use arena_storage::{BackingStore, Competition, StorageError};
//!
//! async fn load(store: &dyn BackingStore<Competition>, id: &str) -> Result<Competition, StorageError> {
//!     store
//!         .find(id)
//!         .await?
//!         .ok_or_else(|| StorageError::not_found("competition", id))
//! }
//! ```
//!
//! [`InMemoryCompetitionStore`] is a complete in-process implementation used
//! for single-node setups and tests.

mod error;
mod memory;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use memory::InMemoryCompetitionStore;
pub use traits::{BackingStore, CompetitionRepository};
pub use types::{Competition, CompetitionStatus, Leaderboard, Registration};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared repository trait object.
pub type DynRepository = std::sync::Arc<dyn CompetitionRepository>;

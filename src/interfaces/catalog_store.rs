//! Catalog storage interface.

use async_trait::async_trait;

use crate::model::{NewEvent, PackageKey, PackageVersion};

/// Result type for catalog store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during catalog store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Package version not found: {0}")]
    NotFound(PackageKey),

    #[error("Sequence conflict on {key}: expected {expected}, got {actual}")]
    SequenceConflict {
        key: PackageKey,
        expected: u64,
        actual: u64,
    },

    #[error("Catalog store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt catalog record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Errors worth retrying after a backoff. Sequence conflicts are handled
    /// separately by reloading.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            #[cfg(feature = "sqlite")]
            StoreError::Database(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db) => {
                    let msg = db.message();
                    msg.contains("locked") || msg.contains("busy")
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Outcome of [`CatalogStore::insert_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(PackageVersion),
    /// A record already existed; it is returned unchanged.
    Existing(PackageVersion),
}

impl InsertOutcome {
    pub fn version(&self) -> &PackageVersion {
        match self {
            InsertOutcome::Created(v) | InsertOutcome::Existing(v) => v,
        }
    }
}

/// Interface for package version persistence.
///
/// Records are created once and then only extended by appending history
/// events. Appends are compare-and-swap on the version's sequence number.
///
/// Implementations:
/// - `MemoryCatalogStore`: in-process, for tests and dry runs
/// - `SqliteCatalogStore`: SQLite file
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get(&self, key: &PackageKey) -> Result<Option<PackageVersion>>;

    /// Create `version` unless a record for its key exists.
    async fn insert_if_absent(&self, version: PackageVersion) -> Result<InsertOutcome>;

    /// Append one event if the record's sequence equals `expected_sequence`.
    ///
    /// Returns the updated record, or `SequenceConflict` if another writer
    /// got there first.
    async fn append(
        &self,
        key: &PackageKey,
        expected_sequence: u64,
        event: NewEvent,
    ) -> Result<PackageVersion>;

    async fn list(&self) -> Result<Vec<PackageVersion>>;

    async fn list_by_name(&self, name: &str) -> Result<Vec<PackageVersion>>;
}

//! Import deduplication.
//!
//! Decides whether a successful recipe run produced a new package version.
//! A (name, version) pair maps to exactly one checksum for good: the same
//! checksum again is a no-op, a different one is a conflict that leaves the
//! existing record alone.
//!
//! This is the only place package versions are created. Creation goes
//! through `insert_if_absent`, so concurrent imports of one key yield one
//! record and the losers fall back to the checksum comparison.

use std::sync::Arc;

use backon::Retryable;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::interfaces::{
    CatalogStore, ImportMetadata, InsertOutcome, PackageRepository, RepositoryError, StoreError,
};
use crate::model::{PackageKey, PackageVersion, ProducedArtifact, RecipeId, RecipeRun};
use crate::utils::{Clock, RetrySettings};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Import conflict for {key}: catalog holds checksum {existing}, run produced {produced}")]
    Conflict {
        key: PackageKey,
        existing: String,
        produced: String,
    },

    #[error("Repository error: {0}")]
    Repository(RepositoryError),

    #[error("Catalog store error: {0}")]
    Store(#[from] StoreError),
}

impl ImportError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ImportError::Conflict { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// First time this version was seen.
    Created(PackageVersion),
    /// Already recorded with the same checksum.
    Unchanged(PackageVersion),
}

impl ImportOutcome {
    pub fn version(&self) -> &PackageVersion {
        match self {
            ImportOutcome::Created(v) | ImportOutcome::Unchanged(v) => v,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ImportOutcome::Created(_))
    }
}

/// Result of importing one run's artifact.
#[derive(Debug)]
pub struct ImportResult {
    pub recipe: RecipeId,
    pub key: PackageKey,
    pub outcome: Result<ImportOutcome, ImportError>,
}

pub struct Deduplicator {
    store: Arc<dyn CatalogStore>,
    repository: Arc<dyn PackageRepository>,
    clock: Arc<dyn Clock>,
    actor: String,
    store_retry: RetrySettings,
}

impl Deduplicator {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        repository: Arc<dyn PackageRepository>,
        clock: Arc<dyn Clock>,
        actor: impl Into<String>,
        store_retry: RetrySettings,
    ) -> Self {
        Self {
            store,
            repository,
            clock,
            actor: actor.into(),
            store_retry,
        }
    }

    /// Import the artifacts of every successful run, concurrently.
    ///
    /// Failed and blocked runs are skipped. One bad import never affects
    /// its siblings.
    pub async fn import_all(&self, runs: &[RecipeRun]) -> Vec<ImportResult> {
        let imports = runs.iter().filter_map(|run| {
            run.artifact().map(|artifact| async move {
                ImportResult {
                    recipe: run.recipe.clone(),
                    key: PackageKey::new(&artifact.name, &artifact.version),
                    outcome: self.import(&run.recipe, artifact).await,
                }
            })
        });
        join_all(imports).await
    }

    /// Import one artifact.
    pub async fn import(
        &self,
        recipe: &RecipeId,
        artifact: &ProducedArtifact,
    ) -> Result<ImportOutcome, ImportError> {
        let key = PackageKey::new(&artifact.name, &artifact.version);

        if let Some(existing) = self.load(&key).await? {
            return Self::compare(existing, &artifact.checksum);
        }

        let metadata = ImportMetadata {
            key: key.clone(),
            checksum: artifact.checksum.clone(),
            source_recipe: recipe.clone(),
            artifact: artifact.artifact.clone(),
            outputs: artifact.outputs.clone(),
        };
        let stored = match self.repository.import(&metadata).await {
            Ok(stored) => stored,
            Err(RepositoryError::Conflict { key, existing }) => {
                warn!(package = %key, existing = %existing, "Repository holds a different build");
                return Err(ImportError::Conflict {
                    key,
                    existing,
                    produced: artifact.checksum.clone(),
                });
            }
            Err(e) => return Err(ImportError::Repository(e)),
        };

        let version = PackageVersion::imported(
            key.clone(),
            artifact.checksum.clone(),
            recipe.clone(),
            stored.location,
            self.clock.now(),
            self.actor.clone(),
        );

        let inserted = (|| {
            let version = version.clone();
            async move { self.store.insert_if_absent(version).await }
        })
        .retry(self.store_retry.backoff())
        .when(StoreError::is_transient)
        .notify(|err: &StoreError, dur| {
            warn!(package = %key, error = %err, delay = ?dur, "Catalog store unavailable, retrying");
        })
        .await?;

        match inserted {
            InsertOutcome::Created(version) => {
                info!(
                    package = %version.key,
                    checksum = %version.checksum,
                    recipe = %recipe,
                    "New package version"
                );
                Ok(ImportOutcome::Created(version))
            }
            // Lost a race with a concurrent import of the same key.
            InsertOutcome::Existing(existing) => Self::compare(existing, &artifact.checksum),
        }
    }

    async fn load(&self, key: &PackageKey) -> Result<Option<PackageVersion>, StoreError> {
        (|| async { self.store.get(key).await })
            .retry(self.store_retry.backoff())
            .when(StoreError::is_transient)
            .notify(|err: &StoreError, dur| {
                warn!(package = %key, error = %err, delay = ?dur, "Catalog store unavailable, retrying");
            })
            .await
    }

    fn compare(existing: PackageVersion, produced: &str) -> Result<ImportOutcome, ImportError> {
        if existing.checksum == produced {
            debug!(package = %existing.key, "Version already imported");
            Ok(ImportOutcome::Unchanged(existing))
        } else {
            warn!(
                package = %existing.key,
                existing = %existing.checksum,
                produced = %produced,
                "Checksum conflict; keeping existing record"
            );
            Err(ImportError::Conflict {
                key: existing.key.clone(),
                existing: existing.checksum,
                produced: produced.to_string(),
            })
        }
    }
}

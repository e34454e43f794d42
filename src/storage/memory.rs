//! In-memory CatalogStore implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interfaces::catalog_store::{CatalogStore, InsertOutcome, Result, StoreError};
use crate::model::{NewEvent, PackageKey, PackageVersion};

/// Catalog store that keeps every record in memory.
///
/// Used for tests and dry runs. Failure toggles let tests exercise the
/// retry paths of callers.
#[derive(Default)]
pub struct MemoryCatalogStore {
    versions: RwLock<BTreeMap<PackageKey, PackageVersion>>,
    unavailable: RwLock<bool>,
    injected_conflicts: RwLock<usize>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    /// Reject the next `count` appends with a sequence conflict, as if another
    /// writer had won the race.
    pub async fn inject_conflicts(&self, count: usize) {
        *self.injected_conflicts.write().await = count;
    }

    async fn check_available(&self) -> Result<()> {
        if *self.unavailable.read().await {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn get(&self, key: &PackageKey) -> Result<Option<PackageVersion>> {
        self.check_available().await?;
        Ok(self.versions.read().await.get(key).cloned())
    }

    async fn insert_if_absent(&self, version: PackageVersion) -> Result<InsertOutcome> {
        self.check_available().await?;
        let mut versions = self.versions.write().await;
        if let Some(existing) = versions.get(&version.key) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        versions.insert(version.key.clone(), version.clone());
        Ok(InsertOutcome::Created(version))
    }

    async fn append(
        &self,
        key: &PackageKey,
        expected_sequence: u64,
        event: NewEvent,
    ) -> Result<PackageVersion> {
        self.check_available().await?;
        let mut versions = self.versions.write().await;
        let version = versions
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        let mut injected = self.injected_conflicts.write().await;
        if *injected > 0 {
            *injected -= 1;
            return Err(StoreError::SequenceConflict {
                key: key.clone(),
                expected: expected_sequence,
                actual: version.sequence(),
            });
        }

        let actual = version.sequence();
        if actual != expected_sequence {
            return Err(StoreError::SequenceConflict {
                key: key.clone(),
                expected: expected_sequence,
                actual,
            });
        }

        version.history.push(event.into_event(actual));
        Ok(version.clone())
    }

    async fn list(&self) -> Result<Vec<PackageVersion>> {
        self.check_available().await?;
        Ok(self.versions.read().await.values().cloned().collect())
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<PackageVersion>> {
        self.check_available().await?;
        Ok(self
            .versions
            .read()
            .await
            .values()
            .filter(|v| v.key.name == name)
            .cloned()
            .collect())
    }
}

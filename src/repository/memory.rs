//! In-memory package repository.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interfaces::{ImportMetadata, PackageRepository, RepositoryError, StoredPackage};
use crate::model::PackageKey;

/// Records imports without touching disk.
#[derive(Default)]
pub struct MemoryPackageRepository {
    imported: RwLock<HashMap<PackageKey, ImportMetadata>>,
    fail_on_import: RwLock<bool>,
}

impl MemoryPackageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_import(&self, fail: bool) {
        *self.fail_on_import.write().await = fail;
    }

    pub async fn import_count(&self) -> usize {
        self.imported.read().await.len()
    }

    pub async fn contains(&self, key: &PackageKey) -> bool {
        self.imported.read().await.contains_key(key)
    }

    fn location(key: &PackageKey) -> String {
        format!("memory://{}/{}", key.name, key.version)
    }
}

#[async_trait]
impl PackageRepository for MemoryPackageRepository {
    async fn import(&self, metadata: &ImportMetadata) -> Result<StoredPackage, RepositoryError> {
        if *self.fail_on_import.read().await {
            return Err(RepositoryError::Io(std::io::Error::other("mock import failure")));
        }

        let mut imported = self.imported.write().await;
        if let Some(existing) = imported.get(&metadata.key) {
            if existing.checksum != metadata.checksum {
                return Err(RepositoryError::Conflict {
                    key: metadata.key.clone(),
                    existing: existing.checksum.clone(),
                });
            }
        } else {
            imported.insert(metadata.key.clone(), metadata.clone());
        }

        Ok(StoredPackage {
            location: Self::location(&metadata.key),
        })
    }
}

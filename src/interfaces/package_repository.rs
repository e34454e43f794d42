//! Package repository interface.

use async_trait::async_trait;
use serde::Serialize;

use crate::model::{PackageKey, RecipeId, Variables};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Repository already holds {key} with checksum {existing}")]
    Conflict { key: PackageKey, existing: String },

    #[error("Artifact not found: {0}")]
    MissingArtifact(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What the repository needs to file an artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportMetadata {
    pub key: PackageKey,
    pub checksum: String,
    pub source_recipe: RecipeId,
    /// Where the recipe left the built artifact.
    pub artifact: String,
    /// Recipe outputs recorded alongside the package.
    pub outputs: Variables,
}

/// Where the repository put a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPackage {
    pub location: String,
}

/// Managed package repository.
///
/// Implementations:
/// - `MemoryPackageRepository`: records imports in memory
/// - `FilesystemPackageRepository`: `pkgs/` and `pkgsinfo/` tree on disk
#[async_trait]
pub trait PackageRepository: Send + Sync {
    /// Store the artifact. Importing the same key and checksum again is a
    /// no-op returning the existing location.
    async fn import(&self, metadata: &ImportMetadata) -> Result<StoredPackage, RepositoryError>;
}

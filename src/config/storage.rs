//! Storage configuration types.

use serde::Deserialize;

/// Catalog store type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    #[default]
    Sqlite,
}

/// Catalog store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// SQLite database file.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Sqlite,
            path: "ringrelay.db".to_string(),
        }
    }
}

/// Package repository type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    Memory,
    #[default]
    Filesystem,
}

/// Package repository configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    #[serde(rename = "type")]
    pub repository_type: RepositoryType,
    /// Repository root holding `pkgs/` and `pkgsinfo/`.
    pub path: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            repository_type: RepositoryType::Filesystem,
            path: "repo".to_string(),
        }
    }
}

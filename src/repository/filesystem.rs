//! Filesystem package repository.
//!
//! Lays packages out the way munki-style repositories do:
//! ```text
//! {root}/
//!   pkgs/{name}/{version}/{artifact file name}
//!   pkgsinfo/{name}/{name}-{version}.json
//! ```
//!
//! The pkginfo file records the checksum. Re-importing the same version with
//! the same checksum is a no-op; a different checksum is a conflict.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::interfaces::{ImportMetadata, PackageRepository, RepositoryError, StoredPackage};
use crate::model::{PackageKey, Variables};

/// Metadata file written next to each package.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PkgInfo {
    name: String,
    version: String,
    checksum: String,
    source_recipe: String,
    installer_item_location: String,
    imported_at: DateTime<Utc>,
    #[serde(default)]
    recipe_outputs: Variables,
}

pub struct FilesystemPackageRepository {
    root: PathBuf,
}

/// Keep names from escaping their directory.
fn path_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect::<String>()
        .replace("..", "_")
}

impl FilesystemPackageRepository {
    /// Create the repository, creating `pkgs/` and `pkgsinfo/` if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("pkgs")).await?;
        fs::create_dir_all(root.join("pkgsinfo")).await?;
        Ok(Self { root })
    }

    fn pkginfo_path(&self, key: &PackageKey) -> PathBuf {
        let name = path_component(&key.name);
        self.root
            .join("pkgsinfo")
            .join(&name)
            .join(format!("{}-{}.json", name, path_component(&key.version)))
    }

    async fn read_pkginfo(&self, key: &PackageKey) -> Result<Option<PkgInfo>, RepositoryError> {
        match fs::read(self.pkginfo_path(key)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PackageRepository for FilesystemPackageRepository {
    async fn import(&self, metadata: &ImportMetadata) -> Result<StoredPackage, RepositoryError> {
        if let Some(existing) = self.read_pkginfo(&metadata.key).await? {
            if existing.checksum != metadata.checksum {
                return Err(RepositoryError::Conflict {
                    key: metadata.key.clone(),
                    existing: existing.checksum,
                });
            }
            debug!(package = %metadata.key, "Already in repository");
            return Ok(StoredPackage {
                location: existing.installer_item_location,
            });
        }

        let source = Path::new(&metadata.artifact);
        if !fs::try_exists(source).await? {
            return Err(RepositoryError::MissingArtifact(metadata.artifact.clone()));
        }
        let file_name = source
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .ok_or_else(|| RepositoryError::MissingArtifact(metadata.artifact.clone()))?;

        let relative = Path::new("pkgs")
            .join(path_component(&metadata.key.name))
            .join(path_component(&metadata.key.version))
            .join(&file_name);
        let destination = self.root.join(&relative);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(source, &destination).await?;

        let location = relative.to_string_lossy().into_owned();
        let pkginfo = PkgInfo {
            name: metadata.key.name.clone(),
            version: metadata.key.version.clone(),
            checksum: metadata.checksum.clone(),
            source_recipe: metadata.source_recipe.to_string(),
            installer_item_location: location.clone(),
            imported_at: Utc::now(),
            recipe_outputs: metadata.outputs.clone(),
        };
        let pkginfo_path = self.pkginfo_path(&metadata.key);
        if let Some(parent) = pkginfo_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Pkginfo last: its presence marks the import complete.
        fs::write(&pkginfo_path, serde_json::to_vec_pretty(&pkginfo)?).await?;

        info!(package = %metadata.key, location = %location, "Imported into repository");
        Ok(StoredPackage { location })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::model::RecipeId;

    fn metadata(artifact: &Path, checksum: &str) -> ImportMetadata {
        ImportMetadata {
            key: PackageKey::new("Firefox", "132.0"),
            checksum: checksum.to_string(),
            source_recipe: RecipeId::from("munki.Firefox"),
            artifact: artifact.to_string_lossy().into_owned(),
            outputs: Variables::new(),
        }
    }

    async fn setup() -> (TempDir, FilesystemPackageRepository, PathBuf) {
        let dir = TempDir::new().unwrap();
        let repo = FilesystemPackageRepository::new(dir.path().join("repo")).await.unwrap();
        let artifact = dir.path().join("Firefox-132.0.dmg");
        fs::write(&artifact, b"installer bytes").await.unwrap();
        (dir, repo, artifact)
    }

    #[tokio::test]
    async fn test_import_lays_out_pkgs_and_pkgsinfo() {
        let (dir, repo, artifact) = setup().await;

        let stored = repo.import(&metadata(&artifact, "abc123")).await.unwrap();

        assert_eq!(stored.location, "pkgs/Firefox/132.0/Firefox-132.0.dmg");
        let root = dir.path().join("repo");
        assert!(root.join(&stored.location).exists());
        assert!(root.join("pkgsinfo/Firefox/Firefox-132.0.json").exists());
    }

    #[tokio::test]
    async fn test_reimport_same_checksum_is_idempotent() {
        let (_dir, repo, artifact) = setup().await;
        let first = repo.import(&metadata(&artifact, "abc123")).await.unwrap();
        let second = repo.import(&metadata(&artifact, "abc123")).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reimport_different_checksum_conflicts() {
        let (_dir, repo, artifact) = setup().await;
        repo.import(&metadata(&artifact, "abc123")).await.unwrap();

        match repo.import(&metadata(&artifact, "def456")).await {
            Err(RepositoryError::Conflict { existing, .. }) => assert_eq!(existing, "abc123"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let (dir, repo, _artifact) = setup().await;
        let result = repo
            .import(&metadata(&dir.path().join("nope.dmg"), "abc123"))
            .await;
        assert!(matches!(result, Err(RepositoryError::MissingArtifact(_))));
    }

    #[test]
    fn test_path_component_blocks_traversal() {
        assert_eq!(path_component("../etc"), "__etc");
        assert_eq!(path_component("a/b"), "a_b");
    }
}

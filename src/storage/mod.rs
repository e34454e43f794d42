//! Catalog store implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageConfig, StorageType};
use crate::interfaces::CatalogStore;

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryCatalogStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCatalogStore;

/// Initialize the catalog store based on configuration.
pub async fn init_catalog(
    config: &StorageConfig,
) -> Result<Arc<dyn CatalogStore>, Box<dyn std::error::Error>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Catalog store: memory");
            Ok(Arc::new(MemoryCatalogStore::new()))
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!("Catalog store: sqlite at {}", config.path);
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;

            let store = SqliteCatalogStore::new(pool);
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite catalog requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_memory_catalog() {
        let config = StorageConfig {
            storage_type: StorageType::Memory,
            ..StorageConfig::default()
        };
        let store = init_catalog(&config).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_init_sqlite_catalog_creates_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/catalog.db");
        let config = StorageConfig {
            storage_type: StorageType::Sqlite,
            path: path.to_string_lossy().into_owned(),
        };

        let store = init_catalog(&config).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(path.exists());
    }
}

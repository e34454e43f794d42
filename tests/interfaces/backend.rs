//! Backend factory for interface tests.

use std::env;
use std::sync::Arc;

#[cfg(feature = "sqlite")]
use ringrelay::storage::SqliteCatalogStore;

use ringrelay::interfaces::CatalogStore;
use ringrelay::storage::MemoryCatalogStore;

/// Catalog backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogBackend {
    Memory,
    Sqlite,
}

impl CatalogBackend {
    pub fn from_env() -> Self {
        match env::var("CATALOG_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => CatalogBackend::Sqlite,
            _ => CatalogBackend::Memory,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CatalogBackend::Memory => "memory",
            CatalogBackend::Sqlite => "sqlite",
        }
    }
}

/// Holds the store under test.
pub struct StorageContext {
    pub catalog: Arc<dyn CatalogStore>,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("catalog", &"<dyn CatalogStore>")
            .finish()
    }
}

impl StorageContext {
    /// Create a fresh, empty store for the configured backend.
    pub async fn new(backend: CatalogBackend) -> Self {
        match backend {
            CatalogBackend::Memory => StorageContext {
                catalog: Arc::new(MemoryCatalogStore::new()),
            },
            CatalogBackend::Sqlite => Self::create_sqlite().await,
        }
    }

    #[cfg(feature = "sqlite")]
    async fn create_sqlite() -> Self {
        use sqlx::sqlite::SqlitePoolOptions;

        // One connection: every connection to `sqlite::memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create SQLite pool");

        let store = SqliteCatalogStore::new(pool);
        store.init().await.expect("Failed to create catalog schema");

        StorageContext {
            catalog: Arc::new(store),
        }
    }

    #[cfg(not(feature = "sqlite"))]
    async fn create_sqlite() -> Self {
        panic!("SQLite feature not enabled. Build with --features sqlite");
    }
}

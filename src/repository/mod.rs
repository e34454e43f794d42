//! Package repository implementations.

use std::sync::Arc;

use tracing::info;

use crate::config::{RepositoryConfig, RepositoryType};
use crate::interfaces::PackageRepository;

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemPackageRepository;
pub use memory::MemoryPackageRepository;

/// Initialize the package repository based on configuration.
pub async fn init_repository(
    config: &RepositoryConfig,
) -> Result<Arc<dyn PackageRepository>, Box<dyn std::error::Error>> {
    match config.repository_type {
        RepositoryType::Memory => {
            info!("Package repository: memory");
            Ok(Arc::new(MemoryPackageRepository::new()))
        }
        RepositoryType::Filesystem => {
            info!("Package repository: filesystem at {}", config.path);
            Ok(Arc::new(FilesystemPackageRepository::new(&config.path).await?))
        }
    }
}

//! Abstract interfaces for ringrelay collaborators.
//!
//! These traits define the contracts for:
//! - Processor chains (running recipe steps)
//! - Catalog storage (package versions and their history)
//! - Validation hooks (external pass/fail signals)
//! - Package repositories (where imported artifacts live)

pub mod catalog_store;
pub mod package_repository;
pub mod processor_chain;
pub mod validation_hook;

pub use catalog_store::{CatalogStore, InsertOutcome, StoreError};
pub use package_repository::{ImportMetadata, PackageRepository, RepositoryError, StoredPackage};
pub use processor_chain::{ProcessorChain, ProcessorError, ProcessorErrorKind};
pub use validation_hook::{HookError, ValidationHook, ValidationSignal};

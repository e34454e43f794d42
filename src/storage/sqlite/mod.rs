//! SQLite implementations of storage interfaces.

mod catalog_store;

pub use catalog_store::SqliteCatalogStore;

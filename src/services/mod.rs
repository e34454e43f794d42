//! Operator-facing services.

pub mod query;

pub use query::{CatalogQueryService, PendingEntry, VersionHistory};

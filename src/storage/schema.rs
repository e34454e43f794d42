//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Package versions table schema. One row per (name, version).
#[derive(Iden)]
pub enum PackageVersions {
    Table,
    #[iden = "name"]
    Name,
    #[iden = "version"]
    Version,
    #[iden = "checksum"]
    Checksum,
    #[iden = "source_recipe"]
    SourceRecipe,
    #[iden = "artifact"]
    Artifact,
    #[iden = "imported_at"]
    ImportedAt,
}

/// History table schema. Append-only; one row per event.
#[derive(Iden)]
pub enum History {
    Table,
    #[iden = "name"]
    Name,
    #[iden = "version"]
    Version,
    #[iden = "sequence"]
    Sequence,
    #[iden = "recorded_at"]
    RecordedAt,
    #[iden = "actor"]
    Actor,
    #[iden = "event_data"]
    EventData,
}

/// SQL for creating the package versions table.
pub const CREATE_PACKAGE_VERSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS package_versions (
    name TEXT NOT NULL,
    version TEXT NOT NULL,
    checksum TEXT NOT NULL,
    source_recipe TEXT NOT NULL,
    artifact TEXT NOT NULL,
    imported_at TEXT NOT NULL,
    PRIMARY KEY (name, version)
);
"#;

/// SQL for creating the history table.
///
/// The primary key on sequence makes a lost compare-and-swap race fail at
/// insert time even if two writers read the same sequence.
pub const CREATE_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS history (
    name TEXT NOT NULL,
    version TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    actor TEXT NOT NULL,
    event_data TEXT NOT NULL,
    PRIMARY KEY (name, version, sequence)
);
"#;

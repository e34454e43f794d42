//! Core data model shared by every pipeline stage.

pub mod package;
pub mod recipe;
pub mod ring;
pub mod run;

pub use package::{Hold, HistoryEvent, HistoryKind, NewEvent, PackageKey, PackageVersion, RingMembership};
pub use recipe::{ProcessorStep, RecipeDefinition, RecipeId, RecipeSet, TrustInfo, Variables};
pub use ring::{CatalogRing, PromotionDecision, RetirementPolicy, RingSequence};
pub use run::{ProducedArtifact, RecipeRun, RunResult};

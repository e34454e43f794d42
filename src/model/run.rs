//! Outcome of executing one recipe.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::recipe::{RecipeId, Variables};

/// Artifact captured from a successful recipe run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProducedArtifact {
    pub name: String,
    pub version: String,
    pub checksum: String,
    /// Reference to the built installer, usually a path.
    pub artifact: String,
    /// Every output variable, for downstream recipes.
    #[serde(skip)]
    pub outputs: Variables,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunResult {
    Succeeded(ProducedArtifact),
    Failed { reason: String },
    Blocked { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeRun {
    pub recipe: RecipeId,
    pub finished_at: DateTime<Utc>,
    pub attempts: u32,
    #[serde(flatten)]
    pub result: RunResult,
}

impl RecipeRun {
    pub fn succeeded(recipe: RecipeId, attempts: u32, artifact: ProducedArtifact) -> Self {
        Self {
            recipe,
            finished_at: Utc::now(),
            attempts,
            result: RunResult::Succeeded(artifact),
        }
    }

    pub fn failed(recipe: RecipeId, attempts: u32, reason: impl Into<String>) -> Self {
        Self {
            recipe,
            finished_at: Utc::now(),
            attempts,
            result: RunResult::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn blocked(recipe: RecipeId, reason: impl Into<String>) -> Self {
        Self {
            recipe,
            finished_at: Utc::now(),
            attempts: 0,
            result: RunResult::Blocked {
                reason: reason.into(),
            },
        }
    }

    pub fn artifact(&self) -> Option<&ProducedArtifact> {
        match &self.result {
            RunResult::Succeeded(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, RunResult::Succeeded(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.result {
            RunResult::Succeeded(_) => None,
            RunResult::Failed { reason } | RunResult::Blocked { reason } => Some(reason),
        }
    }
}

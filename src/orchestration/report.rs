//! Summary of one orchestrated run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::dedup::{ImportError, ImportOutcome, ImportResult};
use crate::model::{PackageKey, RecipeId, RecipeRun, RunResult};
use crate::promotion::{Evaluation, PromotionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Created,
    Unchanged,
    Conflict,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportEntry {
    pub recipe: RecipeId,
    pub package: PackageKey,
    pub status: ImportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<ImportResult> for ImportEntry {
    fn from(result: ImportResult) -> Self {
        let (status, detail) = match result.outcome {
            Ok(ImportOutcome::Created(_)) => (ImportStatus::Created, None),
            Ok(ImportOutcome::Unchanged(_)) => (ImportStatus::Unchanged, None),
            Err(e @ ImportError::Conflict { .. }) => (ImportStatus::Conflict, Some(e.to_string())),
            Err(e) => (ImportStatus::Error, Some(e.to_string())),
        };
        Self {
            recipe: result.recipe,
            package: result.key,
            status,
            detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionEntry {
    pub package: PackageKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PromotionEntry {
    pub fn new(package: PackageKey, outcome: Result<Evaluation, PromotionError>) -> Self {
        match outcome {
            Ok(evaluation) => Self {
                package,
                evaluation: Some(evaluation),
                error: None,
            },
            Err(e) => Self {
                package,
                evaluation: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub recipes: Vec<RecipeRun>,
    pub imports: Vec<ImportEntry>,
    pub promotions: Vec<PromotionEntry>,
    /// Set when the catalog could not be scanned for promotion candidates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion_error: Option<String>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at,
            finished_at: started_at,
            recipes: Vec::new(),
            imports: Vec::new(),
            promotions: Vec::new(),
            promotion_error: None,
        }
    }

    /// No failed or blocked recipe, no import problem, no evaluation error.
    pub fn is_success(&self) -> bool {
        self.promotion_error.is_none()
            && self.recipes.iter().all(RecipeRun::is_success)
            && self
                .imports
                .iter()
                .all(|i| matches!(i.status, ImportStatus::Created | ImportStatus::Unchanged))
            && self.promotions.iter().all(|p| p.error.is_none())
    }

    pub fn promoted(&self) -> impl Iterator<Item = &PromotionEntry> {
        self.promotions
            .iter()
            .filter(|p| p.evaluation.as_ref().is_some_and(Evaluation::is_promoted))
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_id)?;

        writeln!(f, "Recipes:")?;
        for run in &self.recipes {
            match &run.result {
                RunResult::Succeeded(artifact) => writeln!(
                    f,
                    "  {:<40} succeeded  {} {}",
                    run.recipe.as_str(), artifact.name, artifact.version
                )?,
                RunResult::Failed { reason } => {
                    writeln!(f, "  {:<40} failed     {reason}", run.recipe.as_str())?
                }
                RunResult::Blocked { reason } => {
                    writeln!(f, "  {:<40} blocked    {reason}", run.recipe.as_str())?
                }
            }
        }

        if !self.imports.is_empty() {
            writeln!(f, "Imports:")?;
            for import in &self.imports {
                write!(f, "  {:<40} {:?}", import.package.to_string(), import.status)?;
                match &import.detail {
                    Some(detail) => writeln!(f, "  {detail}")?,
                    None => writeln!(f)?,
                }
            }
        }

        if !self.promotions.is_empty() {
            writeln!(f, "Promotions:")?;
            for entry in &self.promotions {
                let line = match (&entry.evaluation, &entry.error) {
                    (Some(Evaluation::Promoted { ring }), _) => format!("promoted to {ring}"),
                    (Some(Evaluation::Pending { ring, reason }), _) => {
                        format!("pending {ring}: {reason}")
                    }
                    (Some(Evaluation::RolledBack { from_ring, reason }), _) => {
                        format!("rolled back from {from_ring}: {reason}")
                    }
                    (Some(Evaluation::Held { ring, reason }), _) => {
                        format!("held before {ring}: {reason}")
                    }
                    (Some(Evaluation::Stopped { reason }), _) => format!("stopped: {reason}"),
                    (Some(Evaluation::Final { ring }), _) => format!("final ring {ring}"),
                    (None, Some(error)) => format!("error: {error}"),
                    (None, None) => String::new(),
                };
                writeln!(f, "  {:<40} {line}", entry.package.to_string())?;
            }
        }
        if let Some(error) = &self.promotion_error {
            writeln!(f, "Promotion scan failed: {error}")?;
        }
        Ok(())
    }
}

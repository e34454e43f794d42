//! One end-to-end run: resolve, execute, import, promote.
//!
//! ```text
//! requested ids ──► resolver ──► executor ──► deduplicator ──► promotion engine
//!                      │             │              │                 │
//!                   fatal         per recipe    per version       per version
//! ```
//!
//! Only resolver errors end the run early. Everything else, including a
//! catalog store that cannot be scanned for candidates, is recorded in the
//! [`RunReport`] and the run carries on.

pub mod report;

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::dedup::Deduplicator;
use crate::executor::Executor;
use crate::model::{PackageKey, RecipeId, RecipeSet};
use crate::promotion::PromotionEngine;
use crate::resolver::{self, ExecutionPlan, ResolveError};
use crate::utils::Clock;

pub use report::{ImportEntry, ImportStatus, PromotionEntry, RunReport};

/// Everything succeeded.
pub const EXIT_SUCCESS: i32 = 0;
/// The run finished but something in it failed.
pub const EXIT_PARTIAL: i32 = 1;
/// The run could not start or could not finish.
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_PARTIAL
        }
    }
}

/// Resolve `requested` without running anything, as for a dry run.
pub fn plan(requested: &[RecipeId], recipes: &RecipeSet) -> Result<ExecutionPlan, ResolveError> {
    let plan = resolver::resolve(requested, recipes).inspect_err(|e| {
        error!(error = %e, "Resolution failed; nothing executed");
    })?;
    for (position, id) in plan.order.iter().enumerate() {
        info!(position = position + 1, recipe = %id, "Planned");
    }
    Ok(plan)
}

pub struct Orchestrator {
    executor: Executor,
    dedup: Deduplicator,
    engine: Arc<PromotionEngine>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        executor: Executor,
        dedup: Deduplicator,
        engine: Arc<PromotionEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            dedup,
            engine,
            clock,
        }
    }

    /// Stop launching recipes once one fails.
    pub fn with_fail_fast(mut self) -> Self {
        self.executor = self.executor.with_fail_fast();
        self
    }

    /// Run `requested` recipes and push the results through the catalog.
    pub async fn run(
        &self,
        requested: &[RecipeId],
        recipes: &RecipeSet,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport, OrchestrationError> {
        let mut report = RunReport::new(self.clock.now());
        info!(run_id = %report.run_id, requested = requested.len(), "Run started");

        let plan = plan(requested, recipes)?;

        report.recipes = self.executor.execute(&plan, recipes, cancel).await;

        let imports = self.dedup.import_all(&report.recipes).await;
        let mut keys: BTreeSet<PackageKey> = imports
            .iter()
            .filter(|i| i.outcome.as_ref().is_ok_and(|o| o.is_created()))
            .map(|i| i.key.clone())
            .collect();
        report.imports = imports.into_iter().map(ImportEntry::from).collect();

        self.promote(&mut report, keys).await;

        report.finished_at = self.clock.now();
        info!(
            run_id = %report.run_id,
            recipes = report.recipes.len(),
            succeeded = report.recipes.iter().filter(|r| r.is_success()).count(),
            imported = report.imports.iter().filter(|i| i.status == ImportStatus::Created).count(),
            promoted = report.promoted().count(),
            success = report.is_success(),
            "Run finished"
        );
        Ok(report)
    }

    /// Evaluate every eligible catalog version without running recipes.
    pub async fn promote_only(&self) -> RunReport {
        let mut report = RunReport::new(self.clock.now());
        self.promote(&mut report, BTreeSet::new()).await;
        report.finished_at = self.clock.now();
        report
    }

    /// Evaluate `keys` plus every catalog candidate. A failed candidate scan
    /// is recorded on the report and `keys` are still evaluated.
    async fn promote(&self, report: &mut RunReport, mut keys: BTreeSet<PackageKey>) {
        match self.engine.candidates().await {
            Ok(candidates) => keys.extend(candidates),
            Err(e) => {
                error!(run_id = %report.run_id, error = %e, "Listing promotion candidates failed");
                report.promotion_error = Some(e.to_string());
            }
        }
        let keys: Vec<PackageKey> = keys.into_iter().collect();
        report.promotions = self
            .engine
            .evaluate_batch(&keys)
            .await
            .into_iter()
            .map(|(key, outcome)| PromotionEntry::new(key, outcome))
            .collect();
    }
}

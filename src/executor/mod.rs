//! Recipe execution.
//!
//! Runs an [`ExecutionPlan`] against a [`ProcessorChain`] on a bounded pool of
//! workers. A node launches once every dependency is terminal. If any
//! dependency did not succeed, the node is reported Blocked without running,
//! so a failure only takes down its own branch.
//!
//! Before launch each node passes two local checks: trust verification of its
//! parent chain, and schema validation of its steps. Processor invocations are
//! bounded by a timeout and retried on transient errors.

pub mod schema;
pub mod trust;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::interfaces::{ProcessorChain, ProcessorError, ProcessorErrorKind};
use crate::model::{ProducedArtifact, RecipeId, RecipeRun, RecipeSet, RunResult, Variables};
use crate::resolver::{ExecutionPlan, PlanNode};
use crate::utils::RetrySettings;

pub use schema::{ProcessorSchema, SchemaError, SchemaRegistry};
pub use trust::TrustError;

/// Output keys a recipe must produce.
pub const OUTPUT_VERSION: &str = "version";
pub const OUTPUT_CHECKSUM: &str = "checksum";
pub const OUTPUT_ARTIFACT: &str = "artifact";
/// Package name output; falls back to the `NAME` input.
pub const OUTPUT_NAME: &str = "name";
pub const INPUT_NAME: &str = "NAME";

pub const CANCELLED: &str = "cancelled";

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub workers: usize,
    pub timeout: Duration,
    pub retry: RetrySettings,
    pub require_trust: bool,
    /// Stop launching recipes after the first failure.
    pub fail_fast: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout: Duration::from_secs(600),
            retry: RetrySettings::default(),
            require_trust: true,
            fail_fast: false,
        }
    }
}

/// Runs recipes in plan order with bounded parallelism.
pub struct Executor {
    chain: Arc<dyn ProcessorChain>,
    schemas: Arc<SchemaRegistry>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(chain: Arc<dyn ProcessorChain>, schemas: SchemaRegistry, settings: ExecutorSettings) -> Self {
        Self {
            chain,
            schemas: Arc::new(schemas),
            settings,
        }
    }

    pub fn with_fail_fast(mut self) -> Self {
        self.settings.fail_fast = true;
        self
    }

    /// Run every node in `plan`. Returns one [`RecipeRun`] per node, in plan
    /// order.
    ///
    /// Flipping `cancel` to `true` stops new launches; nodes already running
    /// finish and everything else is reported Blocked as cancelled. With
    /// `fail_fast` the first failed recipe has the same effect.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        recipes: &RecipeSet,
        mut cancel: watch::Receiver<bool>,
    ) -> Vec<RecipeRun> {
        let workers = self.settings.workers.max(1);
        let mut results: BTreeMap<RecipeId, RecipeRun> = BTreeMap::new();
        let mut waiting: Vec<&PlanNode> = plan.order.iter().filter_map(|id| plan.node(id)).collect();
        let mut tasks: JoinSet<RecipeRun> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, RecipeId> = HashMap::new();
        let mut watching = true;
        let mut halted = false;

        info!(recipes = waiting.len(), workers, fail_fast = self.settings.fail_fast, "Executing recipes");

        loop {
            if halted || *cancel.borrow() {
                for node in waiting.drain(..) {
                    warn!(recipe = %node.id, "Not started: run cancelled");
                    results.insert(node.id.clone(), RecipeRun::blocked(node.id.clone(), CANCELLED));
                }
            }

            // Settle blocked nodes and launch ready ones until nothing changes.
            let mut progressed = true;
            while progressed && !halted {
                progressed = false;
                let mut i = 0;
                while i < waiting.len() && !halted {
                    let node = waiting[i];
                    if !node.depends_on.iter().all(|d| results.contains_key(d)) {
                        i += 1;
                        continue;
                    }

                    if let Some(reason) = blocked_reason(node, &results) {
                        warn!(recipe = %node.id, reason = %reason, "Recipe blocked");
                        results.insert(node.id.clone(), RecipeRun::blocked(node.id.clone(), reason));
                        waiting.remove(i);
                        progressed = true;
                        continue;
                    }

                    if running.len() >= workers {
                        i += 1;
                        continue;
                    }

                    waiting.remove(i);
                    progressed = true;
                    match self.prepare(node, recipes, &results) {
                        Ok(job) => {
                            let handle = tasks.spawn(job.run());
                            running.insert(handle.id(), node.id.clone());
                        }
                        Err(run) => {
                            halted = self.halts_on(&run);
                            results.insert(node.id.clone(), run);
                        }
                    }
                }
            }
            if halted && !waiting.is_empty() {
                continue;
            }

            if tasks.is_empty() {
                if !waiting.is_empty() {
                    // Unreachable for a valid plan; report rather than hang.
                    for node in waiting.drain(..) {
                        error!(recipe = %node.id, "Dependencies never settled");
                        results.insert(
                            node.id.clone(),
                            RecipeRun::blocked(node.id.clone(), "unsatisfiable dependencies"),
                        );
                    }
                }
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => {
                    match joined {
                        Some(Ok(run)) => {
                            running.retain(|_, id| id != &run.recipe);
                            log_run(&run);
                            halted |= self.halts_on(&run);
                            results.insert(run.recipe.clone(), run);
                        }
                        Some(Err(e)) => {
                            if let Some(id) = running.remove(&e.id()) {
                                error!(recipe = %id, error = %e, "Recipe task panicked");
                                results.insert(id.clone(), RecipeRun::failed(id, 0, format!("task failed: {e}")));
                            }
                        }
                        None => {}
                    }
                }
                changed = cancel.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                    }
                }
            }
        }

        plan.order
            .iter()
            .filter_map(|id| results.remove(id))
            .collect()
    }

    fn halts_on(&self, run: &RecipeRun) -> bool {
        let halt = self.settings.fail_fast && matches!(run.result, RunResult::Failed { .. });
        if halt {
            warn!(recipe = %run.recipe, "Recipe failed; fail-fast stops further launches");
        }
        halt
    }

    /// Local checks and input assembly. Errors come back as finished runs.
    fn prepare(
        &self,
        node: &PlanNode,
        recipes: &RecipeSet,
        results: &BTreeMap<RecipeId, RecipeRun>,
    ) -> Result<Job, RecipeRun> {
        let recipe = recipes
            .get(&node.id)
            .ok_or_else(|| RecipeRun::failed(node.id.clone(), 0, "recipe definition missing"))?;

        match trust::verify(recipe, recipes, self.settings.require_trust) {
            Ok(true) => debug!(recipe = %node.id, "Trust verified"),
            Ok(false) => warn!(recipe = %node.id, "No trust info recorded; continuing"),
            Err(e) => {
                warn!(recipe = %node.id, error = %e, "Trust verification failed");
                return Err(RecipeRun::blocked(node.id.clone(), e.to_string()));
            }
        }

        // Inputs first, parent outputs on top.
        let mut inputs = node.inputs.clone();
        for dep in &node.depends_on {
            if let Some(artifact) = results.get(dep).and_then(RecipeRun::artifact) {
                inputs.extend(artifact.outputs.clone());
            }
        }

        if let Err(e) = self.schemas.validate(&node.steps, inputs.keys().cloned()) {
            warn!(recipe = %node.id, error = %e, "Schema validation failed");
            return Err(RecipeRun::failed(node.id.clone(), 0, e.to_string()));
        }

        Ok(Job {
            node: node.clone(),
            inputs,
            chain: self.chain.clone(),
            timeout: self.settings.timeout,
            retry: self.settings.retry.clone(),
        })
    }
}

fn blocked_reason(node: &PlanNode, results: &BTreeMap<RecipeId, RecipeRun>) -> Option<String> {
    node.depends_on.iter().find_map(|dep| match results.get(dep) {
        Some(run) if run.is_success() => None,
        Some(run) if run.reason() == Some(CANCELLED) => Some(CANCELLED.to_string()),
        Some(_) => Some(format!("dependency '{dep}' did not succeed")),
        None => None,
    })
}

fn log_run(run: &RecipeRun) {
    match run.artifact() {
        Some(a) => info!(
            recipe = %run.recipe,
            name = %a.name,
            version = %a.version,
            attempts = run.attempts,
            "Recipe succeeded"
        ),
        None => warn!(
            recipe = %run.recipe,
            attempts = run.attempts,
            reason = run.reason().unwrap_or_default(),
            "Recipe did not succeed"
        ),
    }
}

/// Everything a worker needs to invoke one recipe.
struct Job {
    node: PlanNode,
    inputs: Variables,
    chain: Arc<dyn ProcessorChain>,
    timeout: Duration,
    retry: RetrySettings,
}

impl Job {
    async fn run(self) -> RecipeRun {
        let attempts = AtomicU32::new(0);
        let id = self.node.id.clone();

        let outcome = {
            let attempts = &attempts;
            let job = &self;
            (|| async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                match tokio::time::timeout(
                    job.timeout,
                    job.chain.invoke(&job.node.id, &job.node.steps, &job.inputs),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProcessorError::new(
                        ProcessorErrorKind::Timeout,
                        format!("no response within {:?}", job.timeout),
                    )),
                }
            })
            .retry(self.retry.backoff())
            .when(ProcessorError::is_transient)
            .notify(|err: &ProcessorError, dur: Duration| {
                warn!(recipe = %id, error = %err, delay = ?dur, "Transient processor error, retrying");
            })
            .await
        };

        let attempts = attempts.load(Ordering::SeqCst);
        match outcome {
            Ok(outputs) => match extract_artifact(outputs, &self.inputs) {
                Ok(artifact) => RecipeRun::succeeded(id, attempts, artifact),
                Err(reason) => RecipeRun::failed(id, attempts, reason),
            },
            Err(e) => RecipeRun::failed(id, attempts, e.to_string()),
        }
    }
}

fn string_value(vars: &Variables, key: &str) -> Option<String> {
    match vars.get(key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pull the package identity out of a recipe's outputs.
fn extract_artifact(mut outputs: Variables, inputs: &Variables) -> Result<ProducedArtifact, String> {
    let required = |vars: &Variables, key: &str| {
        string_value(vars, key).ok_or_else(|| format!("missing required output '{key}'"))
    };

    let version = required(&outputs, OUTPUT_VERSION)?;
    let checksum = required(&outputs, OUTPUT_CHECKSUM)?;
    let artifact = required(&outputs, OUTPUT_ARTIFACT)?;
    let name = string_value(&outputs, OUTPUT_NAME)
        .or_else(|| string_value(inputs, INPUT_NAME))
        .ok_or_else(|| format!("missing required output '{OUTPUT_NAME}'"))?;

    // Downstream recipes see the identity under the output keys.
    outputs.insert(OUTPUT_NAME.to_string(), name.clone().into());

    Ok(ProducedArtifact {
        name,
        version,
        checksum,
        artifact,
        outputs,
    })
}

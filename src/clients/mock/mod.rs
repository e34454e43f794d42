//! Mock collaborators for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interfaces::{HookError, ProcessorChain, ProcessorError, ValidationHook, ValidationSignal};
use crate::model::{CatalogRing, PackageKey, PackageVersion, ProcessorStep, RecipeId, Variables};

/// One recorded call to [`MockProcessorChain::invoke`].
#[derive(Debug, Clone)]
pub struct Invocation {
    pub recipe: RecipeId,
    pub steps: Vec<ProcessorStep>,
    pub inputs: Variables,
}

/// Processor chain with scripted results.
///
/// Echoes the inputs back as outputs, with any configured outputs for the
/// recipe layered on top. Failures can be queued per recipe or made
/// permanent.
#[derive(Default)]
pub struct MockProcessorChain {
    outputs: RwLock<HashMap<RecipeId, Variables>>,
    queued_failures: RwLock<HashMap<RecipeId, VecDeque<ProcessorError>>>,
    permanent_failures: RwLock<HashMap<RecipeId, ProcessorError>>,
    invocations: RwLock<Vec<Invocation>>,
    delay: RwLock<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_outputs(&self, recipe: impl Into<RecipeId>, outputs: Variables) {
        self.outputs.write().await.insert(recipe.into(), outputs);
    }

    /// Convenience for the four package identity outputs.
    pub async fn set_package(&self, recipe: impl Into<RecipeId>, name: &str, version: &str, checksum: &str) {
        let mut outputs = Variables::new();
        outputs.insert("name".into(), name.into());
        outputs.insert("version".into(), version.into());
        outputs.insert("checksum".into(), checksum.into());
        outputs.insert(
            "artifact".into(),
            format!("/tmp/build/{name}-{version}.pkg").into(),
        );
        self.set_outputs(recipe, outputs).await;
    }

    /// Fail the next `times` invocations of `recipe` with `error`.
    pub async fn fail_next(&self, recipe: impl Into<RecipeId>, error: ProcessorError, times: usize) {
        let mut queued = self.queued_failures.write().await;
        let queue = queued.entry(recipe.into()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    pub async fn fail_always(&self, recipe: impl Into<RecipeId>, error: ProcessorError) {
        self.permanent_failures.write().await.insert(recipe.into(), error);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    pub async fn invocations(&self) -> Vec<Invocation> {
        self.invocations.read().await.clone()
    }

    pub async fn invocation_count(&self, recipe: &str) -> usize {
        self.invocations
            .read()
            .await
            .iter()
            .filter(|i| i.recipe.as_str() == recipe)
            .count()
    }

    /// Highest number of invocations observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessorChain for MockProcessorChain {
    async fn invoke(
        &self,
        recipe: &RecipeId,
        steps: &[ProcessorStep],
        inputs: &Variables,
    ) -> Result<Variables, ProcessorError> {
        self.invocations.write().await.push(Invocation {
            recipe: recipe.clone(),
            steps: steps.to_vec(),
            inputs: inputs.clone(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = self.respond(recipe, inputs).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl MockProcessorChain {
    async fn respond(&self, recipe: &RecipeId, inputs: &Variables) -> Result<Variables, ProcessorError> {
        if let Some(error) = self.permanent_failures.read().await.get(recipe) {
            return Err(error.clone());
        }
        if let Some(error) = self
            .queued_failures
            .write()
            .await
            .get_mut(recipe)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let mut outputs = inputs.clone();
        if let Some(configured) = self.outputs.read().await.get(recipe) {
            outputs.extend(configured.clone());
        }
        Ok(outputs)
    }
}

/// Validation hook with per-version scripted signals and errors.
#[derive(Default)]
pub struct MockValidationHook {
    signals: RwLock<HashMap<PackageKey, ValidationSignal>>,
    default_signal: RwLock<Option<ValidationSignal>>,
    queued_errors: RwLock<VecDeque<HookError>>,
    calls: AtomicUsize,
}

impl MockValidationHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_signal(&self, key: PackageKey, signal: ValidationSignal) {
        self.signals.write().await.insert(key, signal);
    }

    pub async fn set_default(&self, signal: ValidationSignal) {
        *self.default_signal.write().await = Some(signal);
    }

    pub async fn fail_next(&self, error: HookError) {
        self.queued_errors.write().await.push_back(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValidationHook for MockValidationHook {
    async fn check(&self, version: &PackageVersion, _ring: &CatalogRing) -> Result<ValidationSignal, HookError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.queued_errors.write().await.pop_front() {
            return Err(error);
        }
        if let Some(signal) = self.signals.read().await.get(&version.key) {
            return Ok(*signal);
        }
        Ok(self
            .default_signal
            .read()
            .await
            .unwrap_or(ValidationSignal::NoSignal))
    }
}

//! Shared utilities for integration tests.
//!
//! Builds a [`Runtime`] over in-memory storage with a manual clock and a
//! scripted processor chain, so whole runs execute without subprocesses.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use ringrelay::clients::mock::MockProcessorChain;
use ringrelay::config::{Config, RingConfig};
use ringrelay::executor::ProcessorSchema;
use ringrelay::interfaces::CatalogStore;
use ringrelay::model::{ProcessorStep, RecipeDefinition, RecipeId, RecipeSet};
use ringrelay::orchestration::RunReport;
use ringrelay::utils::{ManualClock, RetrySettings};
use ringrelay::Runtime;

pub const DOWNLOAD: &str = "com.example.download.Firefox";
pub const MUNKI: &str = "com.example.munki.Firefox";

/// Processors every test recipe may use.
pub const PROCESSORS: &[&str] = &["URLDownloader", "CodeSignatureVerifier", "MunkiImporter"];

/// Test config: `testing` then `production`, no trust records required,
/// retries that never sleep.
pub fn test_config(rings: Vec<RingConfig>) -> Config {
    let mut config = Config::for_test();
    config.rings = rings;
    config.runner.require_trust = false;
    config.runner.retry = RetrySettings::immediate(2);
    config.promotion.store_retry = RetrySettings::immediate(10);
    config.promotion.hook_retry = RetrySettings::immediate(2);
    for processor in PROCESSORS {
        config
            .processors
            .insert(processor.to_string(), ProcessorSchema::default());
    }
    config
}

pub fn default_rings() -> Vec<RingConfig> {
    vec![RingConfig::named("testing"), RingConfig::named("production")]
}

/// Everything a test needs to drive runs.
pub struct Harness {
    pub runtime: Runtime,
    pub clock: Arc<ManualClock>,
    pub chain: Arc<MockProcessorChain>,
}

impl Harness {
    pub async fn new(config: Config) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let runtime = Runtime::with_clock(config, clock.clone())
            .await
            .expect("runtime from test config");
        Self {
            runtime,
            clock,
            chain: Arc::new(MockProcessorChain::new()),
        }
    }

    /// Harness over a caller-supplied catalog store.
    pub fn with_store(config: Config, store: Arc<dyn CatalogStore>) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let runtime =
            Runtime::with_store(config, clock.clone(), store).expect("runtime from test config");
        Self {
            runtime,
            clock,
            chain: Arc::new(MockProcessorChain::new()),
        }
    }

    /// Run `requested` against `recipes` to completion.
    pub async fn run(&self, requested: &[&str], recipes: &RecipeSet) -> RunReport {
        self.try_run(requested, recipes)
            .await
            .expect("run should not fail fatally")
    }

    pub async fn try_run(
        &self,
        requested: &[&str],
        recipes: &RecipeSet,
    ) -> Result<RunReport, ringrelay::orchestration::OrchestrationError> {
        let orchestrator = self
            .runtime
            .orchestrator_with(self.chain.clone())
            .await
            .expect("orchestrator");
        let requested: Vec<RecipeId> = requested.iter().map(|id| RecipeId::from(*id)).collect();
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        orchestrator.run(&requested, recipes, cancel_rx).await
    }
}

/// Download recipe plus a munki child that imports its output.
pub fn firefox_recipes() -> RecipeSet {
    recipe_set(vec![
        RecipeDefinition::new(DOWNLOAD)
            .with_input("NAME", "Firefox")
            .with_step(ProcessorStep::new("URLDownloader"))
            .with_step(ProcessorStep::new("CodeSignatureVerifier")),
        RecipeDefinition::new(MUNKI)
            .with_parent(DOWNLOAD)
            .with_step(ProcessorStep::new("MunkiImporter")),
    ])
}

pub fn recipe_set(recipes: Vec<RecipeDefinition>) -> RecipeSet {
    recipes
        .into_iter()
        .map(|r| (r.identifier.clone(), r))
        .collect()
}

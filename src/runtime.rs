//! Wires configured components together.
//!
//! The catalog store and promotion engine are built eagerly since every
//! command needs them. The processor chain and package repository are only
//! built for commands that run recipes.

use std::sync::Arc;

use tracing::info;

use crate::clients::{init_hooks, init_processor_chain};
use crate::config::{load_recipe_list, load_recipes, Config, ConfigError};
use crate::dedup::Deduplicator;
use crate::executor::{trust, Executor, SchemaRegistry, TrustError};
use crate::interfaces::{CatalogStore, ProcessorChain};
use crate::model::{RecipeId, RecipeSet, TrustInfo};
use crate::orchestration::Orchestrator;
use crate::promotion::PromotionEngine;
use crate::repository::init_repository;
use crate::services::CatalogQueryService;
use crate::storage::init_catalog;
use crate::utils::{Clock, SystemClock};

pub struct Runtime {
    config: Config,
    clock: Arc<dyn Clock>,
    store: Arc<dyn CatalogStore>,
    engine: Arc<PromotionEngine>,
}

impl Runtime {
    pub async fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let store = init_catalog(&config.storage).await?;
        Self::with_store(config, clock, store)
    }

    /// Runtime over an already built catalog store.
    pub fn with_store(
        config: Config,
        clock: Arc<dyn Clock>,
        store: Arc<dyn CatalogStore>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let hooks = init_hooks(&config.hooks, config.promotion.hook_timeout())?;
        let rings = config.ring_sequence();
        info!(
            rings = %rings.iter().map(|r| r.name.as_str()).collect::<Vec<_>>().join(" -> "),
            "Ring sequence"
        );

        let engine = PromotionEngine::new(
            store.clone(),
            rings,
            clock.clone(),
            config.promotion.engine_settings(),
        )
        .with_hooks(hooks);

        Ok(Self {
            config,
            clock,
            store,
            engine: Arc::new(engine),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    pub fn engine(&self) -> Arc<PromotionEngine> {
        self.engine.clone()
    }

    pub fn query(&self) -> CatalogQueryService {
        CatalogQueryService::new(self.store.clone(), self.engine.clone())
    }

    pub fn recipes(&self) -> Result<RecipeSet, ConfigError> {
        load_recipes(&self.config.runner.recipe_dirs)
    }

    /// Recipes to run: `ids` if given, else the configured recipe list,
    /// else every loaded recipe.
    pub fn requested(
        &self,
        ids: &[String],
        recipes: &RecipeSet,
    ) -> Result<Vec<RecipeId>, ConfigError> {
        if !ids.is_empty() {
            return Ok(ids.iter().map(|id| RecipeId::from(id.as_str())).collect());
        }
        match &self.config.runner.recipe_list {
            Some(path) => load_recipe_list(path),
            None => Ok(recipes.keys().cloned().collect()),
        }
    }

    /// Fresh trust info for `id`, for an operator to paste into the recipe.
    pub fn update_trust(&self, id: &RecipeId, recipes: &RecipeSet) -> Result<TrustInfo, TrustError> {
        let recipe = recipes
            .get(id)
            .ok_or_else(|| TrustError::UnknownRecipe(id.clone()))?;
        trust::compute(recipe, recipes)
    }

    /// Orchestrator using the configured processor command.
    pub async fn orchestrator(&self) -> Result<Orchestrator, Box<dyn std::error::Error>> {
        let chain = init_processor_chain(&self.config.runner)?;
        self.orchestrator_with(chain).await
    }

    pub async fn orchestrator_with(
        &self,
        chain: Arc<dyn ProcessorChain>,
    ) -> Result<Orchestrator, Box<dyn std::error::Error>> {
        let repository = init_repository(&self.config.repository).await?;
        let executor = Executor::new(
            chain,
            SchemaRegistry::new(self.config.processors.clone()),
            self.config.runner.executor_settings(),
        );
        let dedup = Deduplicator::new(
            self.store.clone(),
            repository,
            self.clock.clone(),
            self.config.promotion.actor.clone(),
            self.config.promotion.store_retry.clone(),
        );
        Ok(Orchestrator::new(
            executor,
            dedup,
            self.engine.clone(),
            self.clock.clone(),
        ))
    }
}

//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod recipes;
mod rings;
mod runner;
mod storage;

pub use recipes::{load_recipe_list, load_recipes};
pub use rings::{HookConfig, PromotionConfig, RingConfig};
pub use runner::{CommandConfig, RunnerConfig};
pub use storage::{RepositoryConfig, RepositoryType, StorageConfig, StorageType};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::Deserialize;

use crate::executor::ProcessorSchema;
use crate::model::{RecipeId, RingSequence};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "ringrelay.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "RINGRELAY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "RINGRELAY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration load failed: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse recipe {path}: {source}")]
    RecipeParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Failed to parse recipe list {path}: {source}")]
    RecipeList {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Recipe '{id}' defined twice: {first} and {second}")]
    DuplicateRecipe {
        id: RecipeId,
        first: PathBuf,
        second: PathBuf,
    },
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Recipe execution settings.
    pub runner: RunnerConfig,
    /// Declared processor schemas, keyed by processor name.
    pub processors: HashMap<String, ProcessorSchema>,
    /// Ordered deployment rings, first to last.
    pub rings: Vec<RingConfig>,
    /// Promotion engine settings.
    pub promotion: PromotionConfig,
    /// Validation hooks, referenced by name from rings.
    pub hooks: HashMap<String, HookConfig>,
    /// Catalog store.
    pub storage: StorageConfig,
    /// Package repository.
    pub repository: RepositoryConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `ringrelay.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rings.is_empty() {
            return Err(ConfigError::Invalid("at least one ring is required".into()));
        }
        if self.runner.workers == 0 {
            return Err(ConfigError::Invalid("runner.workers must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for ring in &self.rings {
            if !seen.insert(ring.name.as_str()) {
                return Err(ConfigError::Invalid(format!("ring '{}' listed twice", ring.name)));
            }
            if let Some(hook) = &ring.validation_hook {
                if self.hook(hook).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "ring '{}' references unknown hook '{hook}'",
                        ring.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a hook by name, ignoring case.
    pub fn hook(&self, name: &str) -> Option<&HookConfig> {
        self.hooks
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn ring_sequence(&self) -> RingSequence {
        RingSequence::new(self.rings.iter().map(RingConfig::to_ring).collect())
    }

    /// Create config for testing: two rings, in-memory storage.
    pub fn for_test() -> Self {
        Self {
            rings: vec![RingConfig::named("testing"), RingConfig::named("production")],
            storage: StorageConfig {
                storage_type: StorageType::Memory,
                ..StorageConfig::default()
            },
            repository: RepositoryConfig {
                repository_type: RepositoryType::Memory,
                ..RepositoryConfig::default()
            },
            ..Self::default()
        }
    }
}

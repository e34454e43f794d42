//! Recipe runner configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::executor::ExecutorSettings;
use crate::utils::RetrySettings;

/// External command that runs a recipe's steps.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Recipes executing at once.
    pub workers: usize,
    /// Upper bound on one processor chain invocation.
    pub processor_timeout_secs: u64,
    /// Retry policy for transient processor errors.
    pub retry: RetrySettings,
    /// Block recipes with no recorded trust info.
    pub require_trust: bool,
    /// Stop launching recipes after the first failure.
    pub fail_fast: bool,
    /// Directories scanned for recipe files.
    pub recipe_dirs: Vec<String>,
    /// JSON list of recipe ids run when none are given on the command line.
    pub recipe_list: Option<String>,
    pub processor_command: Option<CommandConfig>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            processor_timeout_secs: 600,
            retry: RetrySettings::default(),
            require_trust: true,
            fail_fast: false,
            recipe_dirs: vec!["recipes".to_string()],
            recipe_list: None,
            processor_command: None,
        }
    }
}

impl RunnerConfig {
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            workers: self.workers,
            timeout: Duration::from_secs(self.processor_timeout_secs),
            retry: self.retry.clone(),
            require_trust: self.require_trust,
            fail_fast: self.fail_fast,
        }
    }
}

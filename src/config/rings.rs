//! Ring, promotion, and validation hook configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::interfaces::ValidationSignal;
use crate::model::{CatalogRing, RetirementPolicy};
use crate::promotion::PromotionSettings;
use crate::utils::RetrySettings;

/// One ring entry in the `rings` list. Order in the list is ring order.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RingConfig {
    pub name: String,
    /// Minimum time since entering the previous ring.
    pub soak_secs: u64,
    pub approval_required: bool,
    pub validation_hook: Option<String>,
    pub auto_rollback: bool,
    pub retirement: RetirementPolicy,
    pub allow_override: bool,
}

impl RingConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn to_ring(&self) -> CatalogRing {
        CatalogRing {
            index: 0,
            name: self.name.clone(),
            soak: chrono::Duration::seconds(self.soak_secs.min(i64::MAX as u64) as i64),
            approval_required: self.approval_required,
            validation_hook: self.validation_hook.clone(),
            auto_rollback: self.auto_rollback,
            retirement: self.retirement,
            allow_override: self.allow_override,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Actor recorded on events the engine appends on its own.
    pub actor: String,
    /// Upper bound on one validation hook call.
    pub hook_timeout_secs: u64,
    pub hook_retry: RetrySettings,
    /// Backoff between compare-and-swap retries and store outages.
    pub store_retry: RetrySettings,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            actor: "ringrelay".to_string(),
            hook_timeout_secs: 30,
            hook_retry: RetrySettings::default(),
            store_retry: RetrySettings::for_store_conflicts(),
        }
    }
}

impl PromotionConfig {
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    pub fn engine_settings(&self) -> PromotionSettings {
        PromotionSettings {
            actor: self.actor.clone(),
            hook_timeout: self.hook_timeout(),
            hook_retry: self.hook_retry.clone(),
            store_retry: self.store_retry.clone(),
        }
    }
}

/// A validation hook definition.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HookConfig {
    /// Fixed signals, keyed by `name-version` or `name`.
    Static {
        #[serde(default = "no_signal")]
        default: ValidationSignal,
        #[serde(default)]
        overrides: HashMap<String, ValidationSignal>,
    },
    /// GET `url` with `name`, `version`, `ring` query parameters.
    Http { url: String },
}

fn no_signal() -> ValidationSignal {
    ValidationSignal::NoSignal
}

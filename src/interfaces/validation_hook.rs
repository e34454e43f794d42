//! Validation hook interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{CatalogRing, PackageVersion};

/// External verdict on a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSignal {
    Pass,
    Fail,
    /// Nothing reported yet.
    #[serde(alias = "none")]
    NoSignal,
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Validation hook timed out")]
    Timeout,

    #[error("Validation hook transport error: {0}")]
    Transport(String),

    #[error("Validation hook returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Validation hook '{0}' is not configured")]
    Unknown(String),
}

impl HookError {
    pub fn is_transient(&self) -> bool {
        matches!(self, HookError::Timeout | HookError::Transport(_))
    }
}

/// Source of pass/fail signals for a version headed into a ring.
///
/// Implementations:
/// - `StaticValidationHook`: fixed signals from configuration
/// - `HttpValidationHook`: queries an HTTP endpoint
#[async_trait]
pub trait ValidationHook: Send + Sync {
    async fn check(
        &self,
        version: &PackageVersion,
        ring: &CatalogRing,
    ) -> Result<ValidationSignal, HookError>;
}

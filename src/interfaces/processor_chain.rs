//! Processor chain interface.
//!
//! The chain is the only thing that actually runs recipe steps. The executor
//! hands it a recipe's full step list and merged inputs and gets back the
//! output variables.

use async_trait::async_trait;

use crate::model::{ProcessorStep, RecipeId, Variables};

/// Classifies processor failures for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorErrorKind {
    Timeout,
    Network,
    RateLimited,
    Unavailable,
    InvalidArguments,
    InvalidOutput,
    Failed,
}

impl ProcessorErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network | Self::RateLimited | Self::Unavailable
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ProcessorError {
    pub kind: ProcessorErrorKind,
    pub message: String,
}

impl ProcessorError {
    pub fn new(kind: ProcessorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Runs the steps of a recipe.
///
/// Implementations:
/// - `CommandProcessorChain`: external command, JSON over stdio
/// - `MockProcessorChain`: scripted responses for tests
#[async_trait]
pub trait ProcessorChain: Send + Sync {
    async fn invoke(
        &self,
        recipe: &RecipeId,
        steps: &[ProcessorStep],
        inputs: &Variables,
    ) -> Result<Variables, ProcessorError>;
}

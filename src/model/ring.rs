//! Deployment rings and promotion decisions.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// What happens to older versions when a newer one enters a ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetirementPolicy {
    /// Versions of the same name share the ring.
    #[default]
    Coexist,
    /// Entering the ring retires every older-imported version active there.
    SingularLatest,
}

/// One ordered stage with its promotion policy.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRing {
    pub index: usize,
    pub name: String,
    /// Minimum time since entering the previous ring (or import, for ring 0).
    pub soak: Duration,
    pub approval_required: bool,
    /// Name of a configured validation hook.
    pub validation_hook: Option<String>,
    pub auto_rollback: bool,
    pub retirement: RetirementPolicy,
    pub allow_override: bool,
}

impl CatalogRing {
    /// A ring with no gates. The index is assigned by [`RingSequence::new`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            index: 0,
            name: name.into(),
            soak: Duration::zero(),
            approval_required: false,
            validation_hook: None,
            auto_rollback: false,
            retirement: RetirementPolicy::Coexist,
            allow_override: false,
        }
    }

    pub fn with_soak(mut self, soak: Duration) -> Self {
        self.soak = soak;
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.approval_required = true;
        self
    }

    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.validation_hook = Some(hook.into());
        self
    }

    pub fn with_auto_rollback(mut self) -> Self {
        self.auto_rollback = true;
        self
    }

    pub fn with_retirement(mut self, retirement: RetirementPolicy) -> Self {
        self.retirement = retirement;
        self
    }

    pub fn with_override(mut self) -> Self {
        self.allow_override = true;
        self
    }
}

/// The ordered ring list for a deployment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RingSequence {
    rings: Vec<CatalogRing>,
}

impl RingSequence {
    /// Build the sequence, numbering rings by position.
    pub fn new(mut rings: Vec<CatalogRing>) -> Self {
        for (index, ring) in rings.iter_mut().enumerate() {
            ring.index = index;
        }
        Self { rings }
    }

    pub fn len(&self) -> usize {
        self.rings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogRing> {
        self.rings.iter()
    }

    pub fn get(&self, name: &str) -> Option<&CatalogRing> {
        self.rings.iter().find(|r| r.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.get(name).map(|r| r.index)
    }

    /// The ring after `current`, or the first ring when `current` is `None`.
    pub fn next_after(&self, current: Option<&str>) -> Option<&CatalogRing> {
        match current {
            None => self.rings.first(),
            Some(name) => self.index_of(name).and_then(|i| self.rings.get(i + 1)),
        }
    }

    pub fn is_final(&self, name: &str) -> bool {
        self.rings.last().is_some_and(|r| r.name == name)
    }
}

/// Result of checking a version against the next ring's policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum PromotionDecision {
    Allow,
    Pending(String),
    Deny(String),
}

impl PromotionDecision {
    pub fn pending(reason: impl Into<String>) -> Self {
        Self::Pending(reason.into())
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny(reason.into())
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

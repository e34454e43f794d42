//! Package versions and their append-only history log.
//!
//! A [`PackageVersion`] is created once on import and afterwards only gains
//! [`HistoryEvent`]s. Ring membership, holds and approvals are never stored
//! directly; they are derived by folding the log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::recipe::RecipeId;
use super::ring::RingSequence;

/// Catalog identity of a package version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageKey {
    pub name: String,
    pub version: String,
}

impl PackageKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// What happened to a package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryKind {
    Imported,
    Approved {
        ring: String,
    },
    Promoted {
        ring: String,
        #[serde(default)]
        overridden: bool,
    },
    /// Removes `from_ring` and every ring above it.
    RolledBack {
        from_ring: String,
        reason: String,
    },
    Held {
        ring: String,
        reason: String,
    },
    Released,
    Retired {
        ring: String,
        superseded_by: String,
    },
}

impl HistoryKind {
    pub fn label(&self) -> &'static str {
        match self {
            HistoryKind::Imported => "imported",
            HistoryKind::Approved { .. } => "approved",
            HistoryKind::Promoted { .. } => "promoted",
            HistoryKind::RolledBack { .. } => "rolled_back",
            HistoryKind::Held { .. } => "held",
            HistoryKind::Released => "released",
            HistoryKind::Retired { .. } => "retired",
        }
    }
}

/// An event waiting to be appended. The store assigns the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub kind: HistoryKind,
}

impl NewEvent {
    pub fn new(at: DateTime<Utc>, actor: impl Into<String>, kind: HistoryKind) -> Self {
        Self {
            at,
            actor: actor.into(),
            kind,
        }
    }

    pub fn into_event(self, sequence: u64) -> HistoryEvent {
        HistoryEvent {
            sequence,
            at: self.at,
            actor: self.actor,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub actor: String,
    #[serde(flatten)]
    pub kind: HistoryKind,
}

/// A ring the version has entered, derived from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingMembership {
    pub ring: String,
    pub entered_at: DateTime<Utc>,
    pub overridden: bool,
    pub retired: bool,
}

/// Why a version is not advancing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hold {
    pub ring: String,
    pub reason: String,
    pub rolled_back: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub key: PackageKey,
    pub checksum: String,
    pub source_recipe: RecipeId,
    /// Location of the stored artifact in the package repository.
    pub artifact: String,
    pub imported_at: DateTime<Utc>,
    pub history: Vec<HistoryEvent>,
}

impl PackageVersion {
    /// A freshly imported version with its `Imported` event.
    pub fn imported(
        key: PackageKey,
        checksum: impl Into<String>,
        source_recipe: RecipeId,
        artifact: impl Into<String>,
        at: DateTime<Utc>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            key,
            checksum: checksum.into(),
            source_recipe,
            artifact: artifact.into(),
            imported_at: at,
            history: vec![NewEvent::new(at, actor, HistoryKind::Imported).into_event(0)],
        }
    }

    /// Sequence number the next appended event must carry.
    pub fn sequence(&self) -> u64 {
        self.history.len() as u64
    }

    /// Ring memberships in entry order.
    pub fn memberships(&self) -> Vec<RingMembership> {
        let mut memberships: Vec<RingMembership> = Vec::new();
        for event in &self.history {
            match &event.kind {
                HistoryKind::Promoted { ring, overridden } => memberships.push(RingMembership {
                    ring: ring.clone(),
                    entered_at: event.at,
                    overridden: *overridden,
                    retired: false,
                }),
                HistoryKind::RolledBack { from_ring, .. } => {
                    if let Some(pos) = memberships.iter().position(|m| &m.ring == from_ring) {
                        memberships.truncate(pos);
                    }
                }
                HistoryKind::Retired { ring, .. } => {
                    if let Some(m) = memberships.iter_mut().find(|m| &m.ring == ring) {
                        m.retired = true;
                    }
                }
                _ => {}
            }
        }
        memberships
    }

    pub fn current_membership(&self) -> Option<RingMembership> {
        self.memberships().pop()
    }

    pub fn current_ring(&self) -> Option<String> {
        self.current_membership().map(|m| m.ring)
    }

    /// When the version entered its current ring, or its import time.
    pub fn entered_current_at(&self) -> DateTime<Utc> {
        self.current_membership()
            .map(|m| m.entered_at)
            .unwrap_or(self.imported_at)
    }

    /// Whether the version was retired from its current ring.
    pub fn is_retired(&self) -> bool {
        self.current_membership().is_some_and(|m| m.retired)
    }

    pub fn is_member_of(&self, ring: &str) -> bool {
        self.memberships().iter().any(|m| m.ring == ring)
    }

    /// The latest hold or rollback not yet released.
    pub fn hold(&self) -> Option<Hold> {
        let mut hold = None;
        for event in &self.history {
            match &event.kind {
                HistoryKind::Held { ring, reason } => {
                    hold = Some(Hold {
                        ring: ring.clone(),
                        reason: reason.clone(),
                        rolled_back: false,
                    })
                }
                HistoryKind::RolledBack { from_ring, reason } => {
                    hold = Some(Hold {
                        ring: from_ring.clone(),
                        reason: reason.clone(),
                        rolled_back: true,
                    })
                }
                HistoryKind::Released => hold = None,
                _ => {}
            }
        }
        hold
    }

    /// Whether an approval for `ring` is on record since the last rollback.
    pub fn approved_for(&self, ring: &str) -> bool {
        let since = self
            .history
            .iter()
            .rposition(|e| matches!(e.kind, HistoryKind::RolledBack { .. }))
            .map(|i| i + 1)
            .unwrap_or(0);
        self.history[since..]
            .iter()
            .any(|e| matches!(&e.kind, HistoryKind::Approved { ring: r } if r == ring))
    }

    /// Membership forms a prefix of `rings` from index 0, allowing gaps only
    /// where a ring was entered through an override.
    pub fn is_contiguous_prefix(&self, rings: &RingSequence) -> bool {
        let mut expected = 0usize;
        for membership in self.memberships() {
            let Some(index) = rings.index_of(&membership.ring) else {
                return false;
            };
            if index < expected {
                return false;
            }
            if index > expected && !membership.overridden {
                return false;
            }
            expected = index + 1;
        }
        true
    }

    /// Count of `Promoted` events for `ring` across the whole log.
    pub fn promotions_into(&self, ring: &str) -> usize {
        self.history
            .iter()
            .filter(|e| matches!(&e.kind, HistoryKind::Promoted { ring: r, .. } if r == ring))
            .count()
    }
}

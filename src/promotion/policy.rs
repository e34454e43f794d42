//! Pure promotion gates.
//!
//! Nothing here touches the store or a hook. The engine gathers the facts
//! (version log, target ring, hook signal, current time) and asks these
//! functions what they mean.

use chrono::{DateTime, Utc};

use crate::interfaces::ValidationSignal;
use crate::model::{CatalogRing, PackageVersion, PromotionDecision, RingSequence};

pub const REASON_VALIDATION_FAILED: &str = "validation failed";
pub const REASON_SOAK_UNMET: &str = "soak unmet";
pub const REASON_APPROVAL_REQUIRED: &str = "approval required";
pub const REASON_VALIDATION_PENDING: &str = "validation pending";
pub const REASON_SUPERSEDED: &str = "superseded";

/// Why a version has no next ring to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Standstill {
    /// Held or rolled back; carries the recorded reason.
    Held { ring: String, reason: String },
    /// Retired from its current ring by a newer version.
    Retired { ring: String },
    /// Already in the last ring.
    Final { ring: String },
}

/// The ring a version would enter next, or why it cannot move.
pub fn next_ring<'a>(
    version: &PackageVersion,
    rings: &'a RingSequence,
) -> Result<&'a CatalogRing, Standstill> {
    if let Some(hold) = version.hold() {
        return Err(Standstill::Held {
            ring: hold.ring,
            reason: hold.reason,
        });
    }

    let current = version.current_membership();
    if let Some(membership) = &current {
        if membership.retired {
            return Err(Standstill::Retired {
                ring: membership.ring.clone(),
            });
        }
    }

    let current_ring = current.map(|m| m.ring);
    match rings.next_after(current_ring.as_deref()) {
        Some(ring) => Ok(ring),
        None => Err(Standstill::Final {
            ring: current_ring.unwrap_or_default(),
        }),
    }
}

/// Check `version` against `target`'s gates.
///
/// Order matters: a failed hook wins over everything, then soak, then
/// approval, and a hook with nothing to say comes last. `signal` is `None`
/// when the ring has no hook.
pub fn assess(
    version: &PackageVersion,
    target: &CatalogRing,
    signal: Option<ValidationSignal>,
    now: DateTime<Utc>,
) -> PromotionDecision {
    if signal == Some(ValidationSignal::Fail) {
        return PromotionDecision::deny(REASON_VALIDATION_FAILED);
    }

    let elapsed = now - version.entered_current_at();
    if elapsed < target.soak {
        return PromotionDecision::pending(REASON_SOAK_UNMET);
    }

    if target.approval_required && !version.approved_for(&target.name) {
        return PromotionDecision::pending(REASON_APPROVAL_REQUIRED);
    }

    if signal == Some(ValidationSignal::NoSignal) {
        return PromotionDecision::pending(REASON_VALIDATION_PENDING);
    }

    PromotionDecision::Allow
}

/// Versions to retire when `entering` joins `ring` under singular-latest.
///
/// Only versions imported earlier whose current ring is `ring` and that are
/// still active there.
pub fn to_retire<'a>(
    entering: &PackageVersion,
    ring: &str,
    siblings: &'a [PackageVersion],
) -> Vec<&'a PackageVersion> {
    siblings
        .iter()
        .filter(|v| v.key != entering.key)
        .filter(|v| (v.imported_at, &v.key.version) < (entering.imported_at, &entering.key.version))
        .filter(|v| {
            v.current_membership()
                .is_some_and(|m| m.ring == ring && !m.retired)
        })
        .collect()
}

/// A newer sibling already active in `ring`, which keeps `entering` out of a
/// singular-latest ring.
pub fn newer_active<'a>(
    entering: &PackageVersion,
    ring: &str,
    siblings: &'a [PackageVersion],
) -> Option<&'a PackageVersion> {
    siblings
        .iter()
        .filter(|v| v.key != entering.key)
        .filter(|v| (v.imported_at, &v.key.version) > (entering.imported_at, &entering.key.version))
        .find(|v| {
            v.current_membership()
                .is_some_and(|m| m.ring == ring && !m.retired)
        })
}

//! Catalog promotion engine.
//!
//! Moves package versions through the ring sequence one ring at a time.
//! Every change is a single history append guarded by compare-and-swap on
//! the version's sequence number; on conflict the engine reloads and decides
//! again. Changes to versions of one name are additionally serialized by a
//! per-name lock so same-name candidates are handled oldest first.
//!
//! Validation hooks are consulted before the name lock is taken.

pub mod policy;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, Retryable};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::interfaces::{CatalogStore, HookError, StoreError, ValidationHook, ValidationSignal};
use crate::model::{
    CatalogRing, HistoryKind, NewEvent, PackageKey, PackageVersion, PromotionDecision,
    RetirementPolicy, RingSequence,
};
use crate::utils::{Clock, RetrySettings};

pub use policy::Standstill;

#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
    #[error("Package version not found: {0}")]
    NotFound(PackageKey),

    #[error("Unknown ring: {0}")]
    UnknownRing(String),

    #[error("Ring '{0}' does not allow overrides")]
    OverrideNotAllowed(String),

    #[error("{key} is already in or beyond ring '{ring}'")]
    AlreadyInRing { key: PackageKey, ring: String },

    #[error("{0} is not held")]
    NotHeld(PackageKey),

    #[error("{key} is held: {reason}")]
    Held { key: PackageKey, reason: String },

    #[error("{0} is not in any ring")]
    NotInRing(PackageKey),

    #[error("{key} is older than version {newer} already in ring '{ring}'")]
    Superseded {
        key: PackageKey,
        ring: String,
        newer: String,
    },

    #[error("Validation hook failed for {key}: {source}")]
    Hook {
        key: PackageKey,
        #[source]
        source: HookError,
    },

    #[error("Gave up on {key} after {attempts} sequence conflicts")]
    Contention { key: PackageKey, attempts: u32 },

    #[error("Catalog store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, PromotionError>;

/// What one evaluation did to a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Evaluation {
    Promoted { ring: String },
    Pending { ring: String, reason: String },
    /// A failed hook removed the version from `from_ring` and everything above.
    RolledBack { from_ring: String, reason: String },
    /// A failed hook stopped the version short of `ring`.
    Held { ring: String, reason: String },
    /// Stopped by an earlier hold, rollback or retirement.
    Stopped { reason: String },
    Final { ring: String },
}

impl Evaluation {
    /// The decision this evaluation reflects.
    pub fn decision(&self) -> PromotionDecision {
        match self {
            Evaluation::Promoted { .. } => PromotionDecision::Allow,
            Evaluation::Pending { reason, .. } => PromotionDecision::pending(reason),
            Evaluation::RolledBack { reason, .. }
            | Evaluation::Held { reason, .. }
            | Evaluation::Stopped { reason } => PromotionDecision::deny(reason),
            Evaluation::Final { .. } => PromotionDecision::pending("final ring"),
        }
    }

    pub fn is_promoted(&self) -> bool {
        matches!(self, Evaluation::Promoted { .. })
    }
}

impl From<Standstill> for Evaluation {
    fn from(standstill: Standstill) -> Self {
        match standstill {
            Standstill::Held { reason, .. } => Evaluation::Stopped { reason },
            Standstill::Retired { .. } => Evaluation::Stopped {
                reason: policy::REASON_SUPERSEDED.to_string(),
            },
            Standstill::Final { ring } => Evaluation::Final { ring },
        }
    }
}

/// Read-only view of where a version stands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outlook {
    pub key: PackageKey,
    pub current_ring: Option<String>,
    pub target_ring: Option<String>,
    pub decision: PromotionDecision,
}

#[derive(Debug, Clone)]
pub struct PromotionSettings {
    /// Actor recorded on events the engine appends on its own.
    pub actor: String,
    pub hook_timeout: Duration,
    pub hook_retry: RetrySettings,
    pub store_retry: RetrySettings,
}

impl Default for PromotionSettings {
    fn default() -> Self {
        Self {
            actor: "ringrelay".to_string(),
            hook_timeout: Duration::from_secs(30),
            hook_retry: RetrySettings::default(),
            store_retry: RetrySettings::for_store_conflicts(),
        }
    }
}

/// What the engine decided before taking the name lock.
enum Plan {
    Stand(Evaluation),
    Enter {
        seen: u64,
        target: CatalogRing,
        decision: PromotionDecision,
    },
}

pub struct PromotionEngine {
    store: Arc<dyn CatalogStore>,
    rings: RingSequence,
    /// Keyed by lowercased hook name.
    hooks: HashMap<String, Arc<dyn ValidationHook>>,
    clock: Arc<dyn Clock>,
    settings: PromotionSettings,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PromotionEngine {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        rings: RingSequence,
        clock: Arc<dyn Clock>,
        settings: PromotionSettings,
    ) -> Self {
        Self {
            store,
            rings,
            hooks: HashMap::new(),
            clock,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_hook(mut self, name: &str, hook: Arc<dyn ValidationHook>) -> Self {
        self.hooks.insert(name.to_lowercase(), hook);
        self
    }

    pub fn with_hooks(mut self, hooks: HashMap<String, Arc<dyn ValidationHook>>) -> Self {
        for (name, hook) in hooks {
            self.hooks.insert(name.to_lowercase(), hook);
        }
        self
    }

    pub fn rings(&self) -> &RingSequence {
        &self.rings
    }

    /// Try to move `key` into its next ring.
    pub async fn evaluate(&self, key: &PackageKey) -> Result<Evaluation> {
        let mut delays = self.settings.store_retry.backoff().build();
        let mut attempt = 0u32;

        loop {
            let version = self.require(key).await?;
            let (seen, target, decision) = match self.plan(&version).await? {
                Plan::Stand(evaluation) => return Ok(evaluation),
                Plan::Enter {
                    seen,
                    target,
                    decision,
                } => (seen, target, decision),
            };

            let lock = self.name_lock(&key.name).await;
            let _guard = lock.lock().await;

            let outcome = match decision {
                PromotionDecision::Pending(reason) => {
                    debug!(package = %key, ring = %target.name, %reason, "Promotion pending");
                    return Ok(Evaluation::Pending {
                        ring: target.name,
                        reason,
                    });
                }
                PromotionDecision::Allow => {
                    if let Some(newer) = self.newer_active(&version, &target).await? {
                        info!(package = %key, ring = %target.name, %newer, "Newer version already active, not promoting");
                        return Ok(Evaluation::Stopped {
                            reason: policy::REASON_SUPERSEDED.to_string(),
                        });
                    }
                    let event = HistoryKind::Promoted {
                        ring: target.name.clone(),
                        overridden: false,
                    };
                    self.append(key, seen, event).await
                }
                PromotionDecision::Deny(reason) => {
                    let event = match version.current_ring() {
                        Some(from_ring) if target.auto_rollback => HistoryKind::RolledBack {
                            from_ring,
                            reason,
                        },
                        _ => HistoryKind::Held {
                            ring: target.name.clone(),
                            reason,
                        },
                    };
                    self.append(key, seen, event).await
                }
            };

            match outcome {
                Ok(updated) => return self.settle(updated, &target).await,
                Err(StoreError::SequenceConflict { .. }) => match delays.next() {
                    Some(delay) => {
                        attempt += 1;
                        warn!(package = %key, attempt, "Sequence conflict, re-evaluating");
                        drop(_guard);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    None => {
                        return Err(PromotionError::Contention {
                            key: key.clone(),
                            attempts: attempt + 1,
                        })
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Evaluate many versions at once.
    ///
    /// Versions of one name go oldest import first, one at a time; names
    /// proceed concurrently. Results come back grouped by name in that order.
    pub async fn evaluate_batch(
        &self,
        keys: &[PackageKey],
    ) -> Vec<(PackageKey, Result<Evaluation>)> {
        let mut failed = Vec::new();
        let mut by_name: BTreeMap<String, Vec<PackageVersion>> = BTreeMap::new();
        for key in keys {
            match self.require(key).await {
                Ok(version) => by_name.entry(key.name.clone()).or_default().push(version),
                Err(e) => failed.push((key.clone(), Err(e))),
            }
        }

        let groups = by_name.into_values().map(|mut versions| async move {
            versions.sort_by(|a, b| {
                (a.imported_at, &a.key.version).cmp(&(b.imported_at, &b.key.version))
            });
            versions.dedup_by(|a, b| a.key == b.key);
            let mut results = Vec::with_capacity(versions.len());
            for version in versions {
                let outcome = self.evaluate(&version.key).await;
                results.push((version.key, outcome));
            }
            results
        });

        let mut results: Vec<_> = join_all(groups).await.into_iter().flatten().collect();
        results.extend(failed);
        results
    }

    /// Versions that could still advance: not held, not retired, not final.
    pub async fn candidates(&self) -> Result<Vec<PackageKey>> {
        let all = self.with_store_retry(|| self.store.list()).await?;
        Ok(all
            .into_iter()
            .filter(|v| policy::next_ring(v, &self.rings).is_ok())
            .map(|v| v.key)
            .collect())
    }

    /// Where `key` stands right now, without changing anything.
    pub async fn outlook(&self, key: &PackageKey) -> Result<Outlook> {
        let version = self.require(key).await?;
        let current_ring = version.current_ring();
        let (target_ring, decision) = match self.plan(&version).await? {
            Plan::Stand(evaluation) => (None, evaluation.decision()),
            Plan::Enter {
                target, decision, ..
            } => (Some(target.name), decision),
        };
        Ok(Outlook {
            key: key.clone(),
            current_ring,
            target_ring,
            decision,
        })
    }

    /// Record an operator approval for `ring`.
    pub async fn record_approval(
        &self,
        key: &PackageKey,
        ring: &str,
        actor: &str,
    ) -> Result<PackageVersion> {
        let ring = self.ring(ring)?.name.clone();
        self.locked_append(key, actor, |version| {
            if version.approved_for(&ring) {
                return Ok(None);
            }
            Ok(Some(HistoryKind::Approved { ring: ring.clone() }))
        })
        .await
    }

    /// Clear a hold or rollback so the version can advance again.
    pub async fn release(&self, key: &PackageKey, actor: &str) -> Result<PackageVersion> {
        self.locked_append(key, actor, |version| match version.hold() {
            Some(_) => Ok(Some(HistoryKind::Released)),
            None => Err(PromotionError::NotHeld(version.key.clone())),
        })
        .await
    }

    /// Roll `key` back out of its current ring.
    pub async fn rollback(
        &self,
        key: &PackageKey,
        actor: &str,
        reason: &str,
    ) -> Result<PackageVersion> {
        self.locked_append(key, actor, |version| match version.current_ring() {
            Some(from_ring) => Ok(Some(HistoryKind::RolledBack {
                from_ring,
                reason: reason.to_string(),
            })),
            None => Err(PromotionError::NotInRing(version.key.clone())),
        })
        .await
    }

    /// Put `key` into `ring` without checking gates.
    ///
    /// Only rings with `allow_override` accept this, and only moving forward.
    /// A singular-latest ring never takes a version older than its active one.
    pub async fn force_promote(
        &self,
        key: &PackageKey,
        ring: &str,
        actor: &str,
    ) -> Result<PackageVersion> {
        let target = self.ring(ring)?.clone();
        if !target.allow_override {
            return Err(PromotionError::OverrideNotAllowed(target.name));
        }

        let lock = self.name_lock(&key.name).await;
        let _guard = lock.lock().await;
        let version = self.require(key).await?;
        if let Some(newer) = self.newer_active(&version, &target).await? {
            return Err(PromotionError::Superseded {
                key: key.clone(),
                ring: target.name,
                newer,
            });
        }

        let updated = self
            .append_with(key, actor, |version| {
                if let Some(hold) = version.hold() {
                    return Err(PromotionError::Held {
                        key: version.key.clone(),
                        reason: hold.reason,
                    });
                }
                let current = version
                    .current_ring()
                    .and_then(|r| self.rings.index_of(&r));
                if current.is_some_and(|i| i >= target.index) {
                    return Err(PromotionError::AlreadyInRing {
                        key: version.key.clone(),
                        ring: target.name.clone(),
                    });
                }
                Ok(Some(HistoryKind::Promoted {
                    ring: target.name.clone(),
                    overridden: true,
                }))
            })
            .await?;

        warn!(package = %key, ring = %target.name, actor, "Promotion forced past policy");
        self.retire_older(&updated, &target).await?;
        Ok(updated)
    }

    fn ring(&self, name: &str) -> Result<&CatalogRing> {
        self.rings
            .get(name)
            .ok_or_else(|| PromotionError::UnknownRing(name.to_string()))
    }

    async fn plan(&self, version: &PackageVersion) -> Result<Plan> {
        let target = match policy::next_ring(version, &self.rings) {
            Ok(target) => target.clone(),
            Err(standstill) => return Ok(Plan::Stand(standstill.into())),
        };
        let signal = self.signal(version, &target).await?;
        let decision = policy::assess(version, &target, signal, self.clock.now());
        Ok(Plan::Enter {
            seen: version.sequence(),
            target,
            decision,
        })
    }

    /// Follow-up after a successful append from [`evaluate`](Self::evaluate).
    async fn settle(&self, updated: PackageVersion, target: &CatalogRing) -> Result<Evaluation> {
        let Some(last) = updated.history.last() else {
            return Err(StoreError::Corrupt(format!("{} has no history", updated.key)).into());
        };
        match &last.kind {
            HistoryKind::Promoted { ring, .. } => {
                info!(package = %updated.key, %ring, "Promoted");
                self.retire_older(&updated, target).await?;
                Ok(Evaluation::Promoted { ring: ring.clone() })
            }
            HistoryKind::RolledBack { from_ring, reason } => {
                warn!(package = %updated.key, %from_ring, %reason, "Rolled back");
                Ok(Evaluation::RolledBack {
                    from_ring: from_ring.clone(),
                    reason: reason.clone(),
                })
            }
            HistoryKind::Held { ring, reason } => {
                warn!(package = %updated.key, %ring, %reason, "Held");
                Ok(Evaluation::Held {
                    ring: ring.clone(),
                    reason: reason.clone(),
                })
            }
            other => Err(StoreError::Corrupt(format!(
                "{} gained unexpected '{}' event",
                updated.key,
                other.label()
            ))
            .into()),
        }
    }

    /// Retire older versions from `ring` under singular-latest. Caller holds
    /// the name lock.
    async fn retire_older(&self, entering: &PackageVersion, ring: &CatalogRing) -> Result<()> {
        if ring.retirement != RetirementPolicy::SingularLatest {
            return Ok(());
        }

        let name = entering.key.name.clone();
        let siblings = self
            .with_store_retry(|| self.store.list_by_name(&name))
            .await?;
        for older in policy::to_retire(entering, &ring.name, &siblings) {
            let ring_name = ring.name.clone();
            let superseded_by = entering.key.version.clone();
            self.append_with(&older.key, &self.settings.actor, |version| {
                let still_active = version
                    .current_membership()
                    .is_some_and(|m| m.ring == ring_name && !m.retired);
                Ok(still_active.then(|| HistoryKind::Retired {
                    ring: ring_name.clone(),
                    superseded_by: superseded_by.clone(),
                }))
            })
            .await?;
            info!(package = %older.key, ring = %ring.name, superseded_by = %entering.key.version, "Retired");
        }
        Ok(())
    }

    /// Version string of a newer sibling active in a singular-latest `ring`.
    /// Caller holds the name lock.
    async fn newer_active(
        &self,
        entering: &PackageVersion,
        ring: &CatalogRing,
    ) -> Result<Option<String>> {
        if ring.retirement != RetirementPolicy::SingularLatest {
            return Ok(None);
        }
        let name = entering.key.name.clone();
        let siblings = self
            .with_store_retry(|| self.store.list_by_name(&name))
            .await?;
        Ok(policy::newer_active(entering, &ring.name, &siblings).map(|v| v.key.version.clone()))
    }

    async fn signal(
        &self,
        version: &PackageVersion,
        ring: &CatalogRing,
    ) -> Result<Option<ValidationSignal>> {
        let Some(name) = &ring.validation_hook else {
            return Ok(None);
        };
        let hook = self
            .hooks
            .get(&name.to_lowercase())
            .ok_or_else(|| PromotionError::Hook {
                key: version.key.clone(),
                source: HookError::Unknown(name.clone()),
            })?;

        let timeout = self.settings.hook_timeout;
        let signal = (|| async {
            match tokio::time::timeout(timeout, hook.check(version, ring)).await {
                Ok(result) => result,
                Err(_) => Err(HookError::Timeout),
            }
        })
        .retry(self.settings.hook_retry.backoff())
        .when(HookError::is_transient)
        .notify(|err: &HookError, dur| {
            warn!(package = %version.key, hook = %name, error = %err, delay = ?dur, "Validation hook failed, retrying");
        })
        .await
        .map_err(|source| PromotionError::Hook {
            key: version.key.clone(),
            source,
        })?;

        debug!(package = %version.key, hook = %name, ?signal, "Validation signal");
        Ok(Some(signal))
    }

    async fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    async fn require(&self, key: &PackageKey) -> Result<PackageVersion> {
        self.with_store_retry(|| self.store.get(key))
            .await?
            .ok_or_else(|| PromotionError::NotFound(key.clone()))
    }

    async fn append(
        &self,
        key: &PackageKey,
        seen: u64,
        kind: HistoryKind,
    ) -> std::result::Result<PackageVersion, StoreError> {
        let event = NewEvent::new(self.clock.now(), self.settings.actor.clone(), kind);
        self.with_store_retry(|| self.store.append(key, seen, event.clone()))
            .await
    }

    async fn locked_append<F>(&self, key: &PackageKey, actor: &str, decide: F) -> Result<PackageVersion>
    where
        F: FnMut(&PackageVersion) -> Result<Option<HistoryKind>>,
    {
        let lock = self.name_lock(&key.name).await;
        let _guard = lock.lock().await;
        self.append_with(key, actor, decide).await
    }

    /// Reload, let `decide` pick an event, append it with CAS; repeat on
    /// conflict. `decide` returning `None` leaves the version as it is.
    async fn append_with<F>(
        &self,
        key: &PackageKey,
        actor: &str,
        mut decide: F,
    ) -> Result<PackageVersion>
    where
        F: FnMut(&PackageVersion) -> Result<Option<HistoryKind>>,
    {
        let mut delays = self.settings.store_retry.backoff().build();
        let mut attempt = 0u32;
        loop {
            let version = self.require(key).await?;
            let Some(kind) = decide(&version)? else {
                return Ok(version);
            };
            let label = kind.label();
            let event = NewEvent::new(self.clock.now(), actor, kind);
            match self
                .with_store_retry(|| self.store.append(key, version.sequence(), event.clone()))
                .await
            {
                Ok(updated) => {
                    info!(package = %key, event = label, actor, "Recorded");
                    return Ok(updated);
                }
                Err(StoreError::SequenceConflict { .. }) => match delays.next() {
                    Some(delay) => {
                        attempt += 1;
                        warn!(package = %key, attempt, "Sequence conflict, reloading");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(PromotionError::Contention {
                            key: key.clone(),
                            attempts: attempt + 1,
                        })
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Retry transient store failures. Sequence conflicts pass straight
    /// through for the caller to reload.
    async fn with_store_retry<T, F, Fut>(&self, op: F) -> std::result::Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, StoreError>>,
    {
        op.retry(self.settings.store_retry.backoff())
            .when(StoreError::is_transient)
            .notify(|err: &StoreError, dur| {
                warn!(error = %err, delay = ?dur, "Catalog store unavailable, retrying");
            })
            .await
    }
}

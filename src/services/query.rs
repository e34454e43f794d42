//! Catalog query service.
//!
//! Operator-facing reads and manual actions on the catalog. Every mutation
//! goes through the promotion engine, so the same per-name lock and
//! compare-and-swap rules apply as for automatic promotion.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::interfaces::CatalogStore;
use crate::model::{HistoryEvent, PackageKey, PackageVersion};
use crate::promotion::{Outlook, PromotionEngine, PromotionError, Result};

/// A version with its full history, as shown by `history`.
#[derive(Debug, Clone, Serialize)]
pub struct VersionHistory {
    pub package: PackageKey,
    pub checksum: String,
    pub source_recipe: String,
    pub artifact: String,
    pub current_ring: Option<String>,
    pub held: Option<String>,
    pub events: Vec<HistoryEvent>,
}

impl From<PackageVersion> for VersionHistory {
    fn from(version: PackageVersion) -> Self {
        Self {
            current_ring: version.current_ring(),
            held: version.hold().map(|h| h.reason),
            package: version.key,
            checksum: version.checksum,
            source_recipe: version.source_recipe.to_string(),
            artifact: version.artifact,
            events: version.history,
        }
    }
}

/// One row of `pending`: where the version stands, or why that could not
/// be worked out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingEntry {
    pub key: PackageKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlook: Option<Outlook>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct CatalogQueryService {
    store: Arc<dyn CatalogStore>,
    engine: Arc<PromotionEngine>,
}

impl CatalogQueryService {
    pub fn new(store: Arc<dyn CatalogStore>, engine: Arc<PromotionEngine>) -> Self {
        Self { store, engine }
    }

    /// Versions that could still advance, with what stands in their way.
    ///
    /// A hook failing for one version is reported on that row; store
    /// failures end the listing.
    pub async fn list_pending(&self) -> Result<Vec<PendingEntry>> {
        let mut entries = Vec::new();
        for key in self.engine.candidates().await? {
            let entry = match self.engine.outlook(&key).await {
                Ok(outlook) => PendingEntry {
                    key,
                    outlook: Some(outlook),
                    error: None,
                },
                Err(e @ PromotionError::Store(_)) => return Err(e),
                Err(e) => {
                    warn!(package = %key, error = %e, "Could not work out outlook");
                    PendingEntry {
                        key,
                        outlook: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            entries.push(entry);
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    pub async fn history(&self, name: &str, version: &str) -> Result<VersionHistory> {
        let key = PackageKey::new(name, version);
        self.store
            .get(&key)
            .await?
            .map(VersionHistory::from)
            .ok_or(PromotionError::NotFound(key))
    }

    /// Every recorded version of `name`, oldest import first.
    pub async fn versions(&self, name: &str) -> Result<Vec<VersionHistory>> {
        let mut versions = self.store.list_by_name(name).await?;
        versions.sort_by(|a, b| a.imported_at.cmp(&b.imported_at));
        Ok(versions.into_iter().map(VersionHistory::from).collect())
    }

    pub async fn approve(
        &self,
        name: &str,
        version: &str,
        ring: &str,
        actor: &str,
    ) -> Result<PackageVersion> {
        let key = PackageKey::new(name, version);
        info!(package = %key, ring, actor, "Approval requested");
        self.engine.record_approval(&key, ring, actor).await
    }

    pub async fn release(&self, name: &str, version: &str, actor: &str) -> Result<PackageVersion> {
        self.engine
            .release(&PackageKey::new(name, version), actor)
            .await
    }

    pub async fn rollback(
        &self,
        name: &str,
        version: &str,
        actor: &str,
        reason: &str,
    ) -> Result<PackageVersion> {
        self.engine
            .rollback(&PackageKey::new(name, version), actor, reason)
            .await
    }

    pub async fn force_promote(
        &self,
        name: &str,
        version: &str,
        ring: &str,
        actor: &str,
    ) -> Result<PackageVersion> {
        self.engine
            .force_promote(&PackageKey::new(name, version), ring, actor)
            .await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    use super::*;
    use crate::interfaces::{HookError, ValidationHook, ValidationSignal};
    use crate::model::{CatalogRing, HistoryKind, PromotionDecision, RecipeId, RingSequence};
    use crate::promotion::PromotionSettings;
    use crate::storage::MemoryCatalogStore;
    use crate::utils::{Clock, ManualClock, RetrySettings};

    async fn setup() -> (CatalogQueryService, Arc<PromotionEngine>) {
        let store: Arc<dyn CatalogStore> = Arc::new(MemoryCatalogStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let rings = RingSequence::new(vec![
            CatalogRing::new("testing"),
            CatalogRing::new("production").with_approval(),
        ]);
        let settings = PromotionSettings {
            store_retry: RetrySettings::immediate(5),
            ..PromotionSettings::default()
        };
        let engine = Arc::new(PromotionEngine::new(store.clone(), rings, clock.clone(), settings));

        for (version, age) in [("131.0", 2), ("132.0", 1)] {
            store
                .insert_if_absent(PackageVersion::imported(
                    PackageKey::new("Firefox", version),
                    format!("sha-{version}"),
                    RecipeId::from("com.example.munki.Firefox"),
                    "pkgs",
                    clock.now() - Duration::days(age),
                    "test",
                ))
                .await
                .unwrap();
        }
        (CatalogQueryService::new(store, engine.clone()), engine)
    }

    #[tokio::test]
    async fn test_pending_lists_blockers() {
        let (service, engine) = setup().await;
        engine
            .evaluate(&PackageKey::new("Firefox", "132.0"))
            .await
            .unwrap();

        let pending = service.list_pending().await.unwrap();

        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].key.version, "131.0");
        let older = pending[0].outlook.as_ref().unwrap();
        assert_eq!(older.decision, PromotionDecision::Allow);
        let newer = pending[1].outlook.as_ref().unwrap();
        assert_eq!(newer.target_ring.as_deref(), Some("production"));
        assert_eq!(newer.decision, PromotionDecision::pending("approval required"));
    }

    /// Rejects one version outright, passes the rest.
    struct RejectsVersion(&'static str);

    #[async_trait]
    impl ValidationHook for RejectsVersion {
        async fn check(
            &self,
            version: &PackageVersion,
            _ring: &CatalogRing,
        ) -> std::result::Result<ValidationSignal, HookError> {
            if version.key.version == self.0 {
                return Err(HookError::InvalidResponse("unparseable body".into()));
            }
            Ok(ValidationSignal::Pass)
        }
    }

    #[tokio::test]
    async fn test_pending_reports_hook_error_per_version() {
        let store: Arc<dyn CatalogStore> = Arc::new(MemoryCatalogStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let rings = RingSequence::new(vec![CatalogRing::new("testing").with_hook("qa")]);
        let engine = Arc::new(
            PromotionEngine::new(store.clone(), rings, clock.clone(), PromotionSettings::default())
                .with_hook("qa", Arc::new(RejectsVersion("131.0"))),
        );
        for version in ["131.0", "132.0"] {
            store
                .insert_if_absent(PackageVersion::imported(
                    PackageKey::new("Firefox", version),
                    "sha",
                    RecipeId::from("com.example.munki.Firefox"),
                    "pkgs",
                    clock.now(),
                    "test",
                ))
                .await
                .unwrap();
        }
        let service = CatalogQueryService::new(store, engine);

        let pending = service.list_pending().await.unwrap();

        assert_eq!(pending.len(), 2);
        assert!(pending[0].outlook.is_none());
        assert!(pending[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("unparseable body")));
        let healthy = pending[1].outlook.as_ref().unwrap();
        assert_eq!(healthy.key.version, "132.0");
        assert_eq!(healthy.decision, PromotionDecision::Allow);
        assert!(pending[1].error.is_none());
    }

    #[tokio::test]
    async fn test_approve_then_history_shows_actor() {
        let (service, _engine) = setup().await;

        service
            .approve("Firefox", "132.0", "production", "alice")
            .await
            .unwrap();
        let history = service.history("Firefox", "132.0").await.unwrap();

        let last = history.events.last().unwrap();
        assert_eq!(last.actor, "alice");
        assert_eq!(
            last.kind,
            HistoryKind::Approved {
                ring: "production".into()
            }
        );
    }

    #[tokio::test]
    async fn test_rollback_then_release() {
        let (service, engine) = setup().await;
        engine
            .evaluate(&PackageKey::new("Firefox", "131.0"))
            .await
            .unwrap();

        service
            .rollback("Firefox", "131.0", "alice", "crashes on launch")
            .await
            .unwrap();
        let history = service.history("Firefox", "131.0").await.unwrap();
        assert_eq!(history.held.as_deref(), Some("crashes on launch"));
        assert!(history.current_ring.is_none());

        service.release("Firefox", "131.0", "alice").await.unwrap();
        assert!(service.history("Firefox", "131.0").await.unwrap().held.is_none());
    }

    #[tokio::test]
    async fn test_versions_oldest_first_and_missing_history() {
        let (service, _engine) = setup().await;
        let versions = service.versions("Firefox").await.unwrap();
        assert_eq!(versions[0].package.version, "131.0");
        assert_eq!(versions[1].package.version, "132.0");

        let err = service.history("Firefox", "1.0").await.unwrap_err();
        assert!(matches!(err, PromotionError::NotFound(_)));
    }
}

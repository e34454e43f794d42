//! CatalogStore interface step definitions.

use std::sync::Arc;

use chrono::Utc;
use cucumber::{given, then, when, World};
use futures::future::join_all;

use ringrelay::interfaces::{CatalogStore, InsertOutcome, StoreError};
use ringrelay::model::{HistoryKind, NewEvent, PackageKey, PackageVersion, RecipeId};

use crate::backend::{CatalogBackend, StorageContext};

/// Test context for CatalogStore scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct CatalogStoreWorld {
    backend: CatalogBackend,
    context: Option<StorageContext>,
    last_insert: Option<InsertOutcome>,
    last_append: Option<Result<PackageVersion, StoreError>>,
    append_successes: usize,
    last_listed: Vec<PackageVersion>,
}

impl CatalogStoreWorld {
    fn new() -> Self {
        Self {
            backend: CatalogBackend::from_env(),
            context: None,
            last_insert: None,
            last_append: None,
            append_successes: 0,
            last_listed: Vec::new(),
        }
    }

    fn store(&self) -> Arc<dyn CatalogStore> {
        self.context
            .as_ref()
            .expect("Storage context not initialized")
            .catalog
            .clone()
    }

    fn make_version(name: &str, version: &str, checksum: &str) -> PackageVersion {
        PackageVersion::imported(
            PackageKey::new(name, version),
            checksum,
            RecipeId::from(format!("com.example.munki.{name}")),
            format!("pkgs/{name}-{version}.pkg"),
            Utc::now(),
            "cucumber",
        )
    }

    async fn load(&self, name: &str, version: &str) -> PackageVersion {
        self.store()
            .get(&PackageKey::new(name, version))
            .await
            .expect("get failed")
            .expect("version should exist")
    }

    async fn append_now(&self, name: &str, version: &str, kind: HistoryKind) {
        let key = PackageKey::new(name, version);
        let current = self.load(name, version).await;
        self.store()
            .append(
                &key,
                current.sequence(),
                NewEvent::new(Utc::now(), "cucumber", kind),
            )
            .await
            .expect("append failed");
    }
}

// --- Background ---

#[given("a CatalogStore backend")]
async fn given_catalog_backend(world: &mut CatalogStoreWorld) {
    println!("Using backend: {}", world.backend.name());
    world.context = Some(StorageContext::new(world.backend).await);
}

// --- Given steps ---

#[given(expr = "version {string} {string} with checksum {string}")]
async fn given_version(world: &mut CatalogStoreWorld, name: String, version: String, checksum: String) {
    world
        .store()
        .insert_if_absent(CatalogStoreWorld::make_version(&name, &version, &checksum))
        .await
        .expect("insert failed");
}

#[given(expr = "{string} {string} was promoted to {string}")]
async fn given_promoted(world: &mut CatalogStoreWorld, name: String, version: String, ring: String) {
    world
        .append_now(
            &name,
            &version,
            HistoryKind::Promoted {
                ring,
                overridden: false,
            },
        )
        .await;
}

#[given(expr = "{string} {string} was rolled back from {string} because {string}")]
async fn given_rolled_back(
    world: &mut CatalogStoreWorld,
    name: String,
    version: String,
    ring: String,
    reason: String,
) {
    world
        .append_now(
            &name,
            &version,
            HistoryKind::RolledBack {
                from_ring: ring,
                reason,
            },
        )
        .await;
}

// --- When steps ---

#[when(expr = "I insert version {string} {string} with checksum {string}")]
async fn when_insert(world: &mut CatalogStoreWorld, name: String, version: String, checksum: String) {
    let outcome = world
        .store()
        .insert_if_absent(CatalogStoreWorld::make_version(&name, &version, &checksum))
        .await
        .expect("insert failed");
    world.last_insert = Some(outcome);
}

#[when(expr = "I promote {string} {string} to {string} expecting sequence {int}")]
async fn when_promote(
    world: &mut CatalogStoreWorld,
    name: String,
    version: String,
    ring: String,
    expected: u64,
) {
    let result = world
        .store()
        .append(
            &PackageKey::new(&name, &version),
            expected,
            NewEvent::new(
                Utc::now(),
                "cucumber",
                HistoryKind::Promoted {
                    ring,
                    overridden: false,
                },
            ),
        )
        .await;
    world.last_append = Some(result);
}

#[when(expr = "{int} writers promote {string} {string} to {string} expecting sequence {int}")]
async fn when_concurrent_promote(
    world: &mut CatalogStoreWorld,
    writers: usize,
    name: String,
    version: String,
    ring: String,
    expected: u64,
) {
    let key = PackageKey::new(&name, &version);
    let store = world.store();
    let attempts = (0..writers).map(|i| {
        let store = store.clone();
        let key = key.clone();
        let ring = ring.clone();
        async move {
            store
                .append(
                    &key,
                    expected,
                    NewEvent::new(
                        Utc::now(),
                        format!("writer-{i}"),
                        HistoryKind::Promoted {
                            ring,
                            overridden: false,
                        },
                    ),
                )
                .await
        }
    });

    let results = join_all(attempts).await;
    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(e, StoreError::SequenceConflict { .. }),
                "unexpected error: {e}"
            );
        }
    }
    world.append_successes = results.iter().filter(|r| r.is_ok()).count();
}

#[when(expr = "I list versions named {string}")]
async fn when_list_by_name(world: &mut CatalogStoreWorld, name: String) {
    world.last_listed = world
        .store()
        .list_by_name(&name)
        .await
        .expect("list_by_name failed");
}

// --- Then steps ---

#[then("the insert reports created")]
async fn then_insert_created(world: &mut CatalogStoreWorld) {
    assert!(matches!(world.last_insert, Some(InsertOutcome::Created(_))));
}

#[then("the insert reports existing")]
async fn then_insert_existing(world: &mut CatalogStoreWorld) {
    assert!(matches!(world.last_insert, Some(InsertOutcome::Existing(_))));
}

#[then("the append succeeds")]
async fn then_append_succeeds(world: &mut CatalogStoreWorld) {
    match &world.last_append {
        Some(Ok(_)) => {}
        other => panic!("expected successful append, got {other:?}"),
    }
}

#[then("the append fails with a sequence conflict")]
async fn then_append_conflict(world: &mut CatalogStoreWorld) {
    match &world.last_append {
        Some(Err(StoreError::SequenceConflict {
            expected, actual, ..
        })) => {
            assert_eq!(*expected, 1);
            assert_eq!(*actual, 2);
        }
        other => panic!("expected sequence conflict, got {other:?}"),
    }
}

#[then("the append fails with not found")]
async fn then_append_not_found(world: &mut CatalogStoreWorld) {
    assert!(matches!(
        world.last_append,
        Some(Err(StoreError::NotFound(_)))
    ));
}

#[then(expr = "exactly {int} append succeeds")]
async fn then_exactly_n_succeed(world: &mut CatalogStoreWorld, count: usize) {
    assert_eq!(world.append_successes, count);
}

#[then(expr = "version {string} {string} has sequence {int}")]
async fn then_sequence(world: &mut CatalogStoreWorld, name: String, version: String, sequence: u64) {
    assert_eq!(world.load(&name, &version).await.sequence(), sequence);
}

#[then(expr = "version {string} {string} has checksum {string}")]
async fn then_checksum(world: &mut CatalogStoreWorld, name: String, version: String, checksum: String) {
    assert_eq!(world.load(&name, &version).await.checksum, checksum);
}

#[then(expr = "version {string} {string} is in ring {string}")]
async fn then_in_ring(world: &mut CatalogStoreWorld, name: String, version: String, ring: String) {
    assert_eq!(
        world.load(&name, &version).await.current_ring().as_deref(),
        Some(ring.as_str())
    );
}

#[then(expr = "version {string} {string} is held")]
async fn then_held(world: &mut CatalogStoreWorld, name: String, version: String) {
    assert!(world.load(&name, &version).await.hold().is_some());
}

#[then(expr = "version {string} {string} does not exist")]
async fn then_missing(world: &mut CatalogStoreWorld, name: String, version: String) {
    let found = world
        .store()
        .get(&PackageKey::new(&name, &version))
        .await
        .expect("get failed");
    assert!(found.is_none());
}

#[then(expr = "version {string} {string} has history {string}")]
async fn then_history(world: &mut CatalogStoreWorld, name: String, version: String, labels: String) {
    let history = world.load(&name, &version).await.history;
    let actual: Vec<&str> = history.iter().map(|e| e.kind.label()).collect();
    let expected: Vec<&str> = labels.split(", ").collect();
    assert_eq!(actual, expected);

    let sequences: Vec<u64> = history.iter().map(|e| e.sequence).collect();
    let ordered: Vec<u64> = (0..history.len() as u64).collect();
    assert_eq!(sequences, ordered);
}

#[then(expr = "I get {int} versions")]
async fn then_listed_count(world: &mut CatalogStoreWorld, count: usize) {
    assert_eq!(world.last_listed.len(), count);
    assert!(world.last_listed.iter().all(|v| v.key.name == "Firefox"));
}

#[then(expr = "listing everything returns {int} version")]
#[then(expr = "listing everything returns {int} versions")]
async fn then_list_all(world: &mut CatalogStoreWorld, count: usize) {
    assert_eq!(world.store().list().await.expect("list failed").len(), count);
}

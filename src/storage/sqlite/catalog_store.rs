//! SQLite CatalogStore implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::interfaces::catalog_store::{CatalogStore, InsertOutcome, Result, StoreError};
use crate::model::{HistoryEvent, HistoryKind, NewEvent, PackageKey, PackageVersion, RecipeId};
use crate::storage::schema::{History, PackageVersions, CREATE_HISTORY_TABLE, CREATE_PACKAGE_VERSIONS_TABLE};

/// SQLite implementation of CatalogStore.
pub struct SqliteCatalogStore {
    pool: SqlitePool,
}

impl SqliteCatalogStore {
    /// Create a new SQLite catalog store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables if they do not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_PACKAGE_VERSIONS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_HISTORY_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
    }

    fn version_from_row(row: &SqliteRow) -> Result<PackageVersion> {
        let imported_at: String = row.try_get("imported_at")?;
        Ok(PackageVersion {
            key: PackageKey::new(
                row.try_get::<String, _>("name")?,
                row.try_get::<String, _>("version")?,
            ),
            checksum: row.try_get("checksum")?,
            source_recipe: RecipeId::new(row.try_get::<String, _>("source_recipe")?),
            artifact: row.try_get("artifact")?,
            imported_at: Self::parse_time(&imported_at)?,
            history: Vec::new(),
        })
    }

    fn event_from_row(row: &SqliteRow) -> Result<HistoryEvent> {
        let sequence: i64 = row.try_get("sequence")?;
        let recorded_at: String = row.try_get("recorded_at")?;
        let event_data: String = row.try_get("event_data")?;
        let kind: HistoryKind = serde_json::from_str(&event_data)?;
        Ok(HistoryEvent {
            sequence: sequence as u64,
            at: Self::parse_time(&recorded_at)?,
            actor: row.try_get("actor")?,
            kind,
        })
    }

    /// Load one version with its history on an open connection.
    async fn load(conn: &mut SqliteConnection, key: &PackageKey) -> Result<Option<PackageVersion>> {
        let query = Query::select()
            .columns([
                PackageVersions::Name,
                PackageVersions::Version,
                PackageVersions::Checksum,
                PackageVersions::SourceRecipe,
                PackageVersions::Artifact,
                PackageVersions::ImportedAt,
            ])
            .from(PackageVersions::Table)
            .and_where(Expr::col(PackageVersions::Name).eq(key.name.as_str()))
            .and_where(Expr::col(PackageVersions::Version).eq(key.version.as_str()))
            .to_string(SqliteQueryBuilder);

        let Some(row) = sqlx::query(&query).fetch_optional(&mut *conn).await? else {
            return Ok(None);
        };
        let mut version = Self::version_from_row(&row)?;

        let query = Query::select()
            .columns([History::Sequence, History::RecordedAt, History::Actor, History::EventData])
            .from(History::Table)
            .and_where(Expr::col(History::Name).eq(key.name.as_str()))
            .and_where(Expr::col(History::Version).eq(key.version.as_str()))
            .order_by(History::Sequence, Order::Asc)
            .to_string(SqliteQueryBuilder);

        for row in sqlx::query(&query).fetch_all(&mut *conn).await? {
            version.history.push(Self::event_from_row(&row)?);
        }

        Ok(Some(version))
    }

    async fn insert_event(conn: &mut SqliteConnection, key: &PackageKey, event: &HistoryEvent) -> Result<()> {
        let event_data = serde_json::to_string(&event.kind)?;
        let query = Query::insert()
            .into_table(History::Table)
            .columns([
                History::Name,
                History::Version,
                History::Sequence,
                History::RecordedAt,
                History::Actor,
                History::EventData,
            ])
            .values_panic([
                key.name.as_str().into(),
                key.version.as_str().into(),
                (event.sequence as i64).into(),
                event.at.to_rfc3339().into(),
                event.actor.as_str().into(),
                event_data.into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    async fn insert_version(conn: &mut SqliteConnection, version: &PackageVersion) -> Result<InsertOutcome> {
        if let Some(existing) = Self::load(conn, &version.key).await? {
            return Ok(InsertOutcome::Existing(existing));
        }

        let query = Query::insert()
            .into_table(PackageVersions::Table)
            .columns([
                PackageVersions::Name,
                PackageVersions::Version,
                PackageVersions::Checksum,
                PackageVersions::SourceRecipe,
                PackageVersions::Artifact,
                PackageVersions::ImportedAt,
            ])
            .values_panic([
                version.key.name.as_str().into(),
                version.key.version.as_str().into(),
                version.checksum.as_str().into(),
                version.source_recipe.as_str().into(),
                version.artifact.as_str().into(),
                version.imported_at.to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *conn).await?;

        for event in &version.history {
            Self::insert_event(conn, &version.key, event).await?;
        }

        Ok(InsertOutcome::Created(version.clone()))
    }

    async fn append_event(
        conn: &mut SqliteConnection,
        key: &PackageKey,
        expected_sequence: u64,
        event: NewEvent,
    ) -> Result<PackageVersion> {
        let mut version = Self::load(conn, key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        let actual = version.sequence();
        if actual != expected_sequence {
            return Err(StoreError::SequenceConflict {
                key: key.clone(),
                expected: expected_sequence,
                actual,
            });
        }

        let event = event.into_event(actual);
        Self::insert_event(conn, key, &event).await?;
        version.history.push(event);
        Ok(version)
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(conn: &mut SqliteConnection, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(value)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn get(&self, key: &PackageKey) -> Result<Option<PackageVersion>> {
        let mut conn = self.pool.acquire().await?;
        Self::load(&mut conn, key).await
    }

    async fn insert_if_absent(&self, version: PackageVersion) -> Result<InsertOutcome> {
        // BEGIN IMMEDIATE acquires the write lock upfront, preventing deadlocks
        // when concurrent DEFERRED transactions race to upgrade from shared to exclusive.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = Self::insert_version(&mut conn, &version).await;
        Self::finish(&mut conn, result).await
    }

    async fn append(
        &self,
        key: &PackageKey,
        expected_sequence: u64,
        event: NewEvent,
    ) -> Result<PackageVersion> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = Self::append_event(&mut conn, key, expected_sequence, event).await;
        Self::finish(&mut conn, result).await
    }

    async fn list(&self) -> Result<Vec<PackageVersion>> {
        let query = Query::select()
            .columns([
                PackageVersions::Name,
                PackageVersions::Version,
                PackageVersions::Checksum,
                PackageVersions::SourceRecipe,
                PackageVersions::Artifact,
                PackageVersions::ImportedAt,
            ])
            .from(PackageVersions::Table)
            .order_by(PackageVersions::Name, Order::Asc)
            .order_by(PackageVersions::Version, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let mut conn = self.pool.acquire().await?;
        let mut versions: BTreeMap<PackageKey, PackageVersion> = BTreeMap::new();
        for row in sqlx::query(&query).fetch_all(&mut *conn).await? {
            let version = Self::version_from_row(&row)?;
            versions.insert(version.key.clone(), version);
        }

        let query = Query::select()
            .columns([
                History::Name,
                History::Version,
                History::Sequence,
                History::RecordedAt,
                History::Actor,
                History::EventData,
            ])
            .from(History::Table)
            .order_by(History::Name, Order::Asc)
            .order_by(History::Version, Order::Asc)
            .order_by(History::Sequence, Order::Asc)
            .to_string(SqliteQueryBuilder);

        for row in sqlx::query(&query).fetch_all(&mut *conn).await? {
            let key = PackageKey::new(
                row.try_get::<String, _>("name")?,
                row.try_get::<String, _>("version")?,
            );
            let event = Self::event_from_row(&row)?;
            match versions.get_mut(&key) {
                Some(version) => version.history.push(event),
                None => return Err(StoreError::Corrupt(format!("history for unknown version {key}"))),
            }
        }

        Ok(versions.into_values().collect())
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<PackageVersion>> {
        let query = Query::select()
            .column(PackageVersions::Version)
            .from(PackageVersions::Table)
            .and_where(Expr::col(PackageVersions::Name).eq(name))
            .order_by(PackageVersions::Version, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;

        let mut versions = Vec::with_capacity(rows.len());
        for row in rows {
            let key = PackageKey::new(name, row.try_get::<String, _>("version")?);
            if let Some(version) = Self::load(&mut conn, &key).await? {
                versions.push(version);
            }
        }
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    use super::*;

    async fn test_store() -> SqliteCatalogStore {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .expect("failed to create in-memory pool");

        let store = SqliteCatalogStore::new(pool);
        store.init().await.expect("failed to init schema");
        store
    }

    fn firefox(checksum: &str) -> PackageVersion {
        PackageVersion::imported(
            PackageKey::new("Firefox", "132.0"),
            checksum,
            RecipeId::from("munki.Firefox"),
            "pkgs/Firefox/132.0/Firefox.dmg",
            Utc::now(),
            "ringrelay",
        )
    }

    fn promoted(ring: &str) -> NewEvent {
        NewEvent::new(
            Utc::now(),
            "ringrelay",
            HistoryKind::Promoted {
                ring: ring.into(),
                overridden: false,
            },
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let store = test_store().await;
        let version = firefox("abc123");
        store.insert_if_absent(version.clone()).await.unwrap();

        let loaded = store.get(&version.key).await.unwrap().unwrap();
        assert_eq!(loaded.checksum, "abc123");
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.history[0].kind, HistoryKind::Imported);
        assert_eq!(loaded.imported_at, version.imported_at);
    }

    #[tokio::test]
    async fn test_insert_if_absent_returns_existing() {
        let store = test_store().await;
        store.insert_if_absent(firefox("abc123")).await.unwrap();
        match store.insert_if_absent(firefox("def456")).await.unwrap() {
            InsertOutcome::Existing(v) => assert_eq!(v.checksum, "abc123"),
            other => panic!("expected existing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_append_is_compare_and_swap() {
        let store = test_store().await;
        let key = PackageKey::new("Firefox", "132.0");
        store.insert_if_absent(firefox("abc123")).await.unwrap();

        let updated = store.append(&key, 1, promoted("testing")).await.unwrap();
        assert_eq!(updated.current_ring().as_deref(), Some("testing"));

        let err = store.append(&key, 1, promoted("testing")).await.unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { expected: 1, actual: 2, .. }));

        let loaded = store.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded.promotions_into("testing"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_single_winner() {
        let store = Arc::new(test_store().await);
        let key = PackageKey::new("Firefox", "132.0");
        store.insert_if_absent(firefox("abc123")).await.unwrap();

        let attempts = (0..8).map(|_| {
            let store = store.clone();
            let key = key.clone();
            async move { store.append(&key, 1, promoted("testing")).await }
        });
        let results = futures::future::join_all(attempts).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loaded = store.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), 2);
    }

    #[tokio::test]
    async fn test_list_groups_history() {
        let store = test_store().await;
        let key = PackageKey::new("Firefox", "132.0");
        store.insert_if_absent(firefox("abc123")).await.unwrap();
        store.append(&key, 1, promoted("testing")).await.unwrap();
        store
            .insert_if_absent(PackageVersion::imported(
                PackageKey::new("Chrome", "130"),
                "x",
                RecipeId::from("munki.Chrome"),
                "pkgs/Chrome/130",
                Utc::now(),
                "ringrelay",
            ))
            .await
            .unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        let firefox = all.iter().find(|v| v.key == key).unwrap();
        assert_eq!(firefox.history.len(), 2);

        let by_name = store.list_by_name("Chrome").await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].history.len(), 1);
    }

    #[tokio::test]
    async fn test_inlined_values_with_quotes_survive() {
        let store = test_store().await;
        let key = PackageKey::new("O'Reilly Reader", "1.0'beta");
        store
            .insert_if_absent(PackageVersion::imported(
                key.clone(),
                "abc'123",
                RecipeId::from("munki.O'Reilly"),
                "pkgs/O'Reilly/1.0",
                Utc::now(),
                "ringrelay",
            ))
            .await
            .unwrap();
        store
            .append(
                &key,
                1,
                NewEvent::new(
                    Utc::now(),
                    "ops'bot",
                    HistoryKind::RolledBack {
                        from_ring: "testing".into(),
                        reason: "can't launch".into(),
                    },
                ),
            )
            .await
            .unwrap();

        let loaded = store.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded.checksum, "abc'123");
        assert_eq!(loaded.history[1].actor, "ops'bot");
        assert_eq!(store.list_by_name("O'Reilly Reader").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_missing_version() {
        let store = test_store().await;
        let err = store
            .append(&PackageKey::new("Nope", "1"), 0, promoted("testing"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}

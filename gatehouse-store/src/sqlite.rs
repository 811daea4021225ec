// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistent entitlement ledger.
use gatehouse_core::{BucketId, EntitlementRecord, MemberId, Timestamp};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, migrate, query, query_as};
use thiserror::Error;

use crate::traits::EntitlementStore;

/// Create the SQLite database if it doesn't already exist.
pub async fn create_database(url: &str) -> Result<(), StoreError> {
    if !Sqlite::database_exists(url).await? {
        Sqlite::create_database(url).await?;
    }
    Ok(())
}

/// Create a SQLite connection pool.
pub async fn connection_pool(url: &str, max_connections: u32) -> Result<SqlitePool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    Ok(pool)
}

/// Run any pending database migrations from inside the application.
pub async fn run_pending_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    migrate!().run(pool).await?;
    Ok(())
}

/// SQLite-backed entitlement store.
///
/// Every [`EntitlementStore`] write is a single `ON CONFLICT ... DO UPDATE` upsert statement, so
/// per-record atomicity comes directly from the database.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new `SqliteStore` using the provided connection pool.
    ///
    /// Assumes migrations have already been run, see [`SqliteStoreBuilder`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Builder to configure and establish a SQLite database connection.
pub struct SqliteStoreBuilder {
    url: String,
    max_connections: u32,
    create_database: bool,
    run_migrations: bool,
}

impl Default for SqliteStoreBuilder {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            max_connections: 16,
            create_database: true,
            run_migrations: true,
        }
    }
}

impl SqliteStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(any(test, feature = "test_utils"))]
    pub fn random_memory_url(mut self) -> Self {
        // Combining Rust tests with in-memory databases can lead to unsound behaviour, this
        // "workaround" assigns every temporary database a different, random name and keeps them
        // isolated from other tests.
        //
        // See related issue: https://github.com/launchbadge/sqlx/issues/2510
        self.url = format!(
            "sqlite://dbmem{}?mode=memory&cache=private",
            rand::random::<u32>()
        );
        self
    }

    pub fn database_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn create_database(mut self, create_database: bool) -> Self {
        self.create_database = create_database;
        self
    }

    pub fn run_default_migrations(mut self, run_migrations: bool) -> Self {
        self.run_migrations = run_migrations;
        self
    }

    pub async fn build(self) -> Result<SqliteStore, StoreError> {
        if self.create_database {
            create_database(&self.url).await?;
        }

        let pool = connection_pool(&self.url, self.max_connections).await?;

        if self.run_migrations {
            run_pending_migrations(&pool).await?;
        }

        Ok(SqliteStore::new(pool))
    }
}

/// A single entitlement row as stored in the database.
#[derive(FromRow, Debug, Clone)]
struct EntitlementRow {
    trial_used: i64,
    trial_expires_at: Option<i64>,
    trial_bucket: Option<String>,
    paid: i64,
    last_join_at: i64,
}

impl From<EntitlementRow> for EntitlementRecord {
    fn from(row: EntitlementRow) -> Self {
        EntitlementRecord {
            trial_used: row.trial_used != 0,
            trial_expires_at: row.trial_expires_at.map(|at| at as Timestamp),
            trial_bucket: row.trial_bucket.map(BucketId::new),
            paid: row.paid != 0,
            last_join_at: row.last_join_at as Timestamp,
        }
    }
}

impl EntitlementStore for SqliteStore {
    type Error = StoreError;

    async fn get(&self, member: &MemberId) -> Result<Option<EntitlementRecord>, Self::Error> {
        let row = query_as::<_, EntitlementRow>(
            "
            SELECT
                trial_used,
                trial_expires_at,
                trial_bucket,
                paid,
                last_join_at
            FROM
                entitlements_v1
            WHERE
                member_id = ?
            ",
        )
        .bind(member.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EntitlementRecord::from))
    }

    async fn upsert_join(&self, member: &MemberId, now: Timestamp) -> Result<(), Self::Error> {
        query(
            "
            INSERT INTO
                entitlements_v1 (member_id, last_join_at)
            VALUES
                (?, ?)
            ON CONFLICT (member_id) DO UPDATE SET
                last_join_at = excluded.last_join_at
            ",
        )
        .bind(member.as_str())
        .bind(now as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn start_trial(
        &self,
        member: &MemberId,
        expires_at: Timestamp,
        bucket: &BucketId,
        now: Timestamp,
    ) -> Result<(), Self::Error> {
        query(
            "
            INSERT INTO
                entitlements_v1 (member_id, trial_used, trial_expires_at, trial_bucket, last_join_at)
            VALUES
                (?, 1, ?, ?, ?)
            ON CONFLICT (member_id) DO UPDATE SET
                trial_used = 1,
                trial_expires_at = excluded.trial_expires_at,
                trial_bucket = excluded.trial_bucket,
                last_join_at = excluded.last_join_at
            ",
        )
        .bind(member.as_str())
        .bind(expires_at as i64)
        .bind(bucket.as_str())
        .bind(now as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_trial(&self, member: &MemberId) -> Result<(), Self::Error> {
        query(
            "
            INSERT INTO
                entitlements_v1 (member_id)
            VALUES
                (?)
            ON CONFLICT (member_id) DO UPDATE SET
                trial_expires_at = NULL,
                trial_bucket = NULL
            ",
        )
        .bind(member.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_paid(&self, member: &MemberId, paid: bool) -> Result<(), Self::Error> {
        query(
            "
            INSERT INTO
                entitlements_v1 (member_id, paid)
            VALUES
                (?, ?)
            ON CONFLICT (member_id) DO UPDATE SET
                paid = excluded.paid
            ",
        )
        .bind(member.as_str())
        .bind(paid as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn expired_trials(
        &self,
        now: Timestamp,
    ) -> Result<Vec<(MemberId, Option<BucketId>)>, Self::Error> {
        let rows = query_as::<_, (String, Option<String>)>(
            "
            SELECT
                member_id,
                trial_bucket
            FROM
                entitlements_v1
            WHERE
                trial_expires_at IS NOT NULL
                AND trial_expires_at <= ?
            ORDER BY
                member_id
            ",
        )
        .bind(now as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(member, bucket)| (MemberId::new(member), bucket.map(BucketId::new)))
            .collect())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

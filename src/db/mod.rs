use std::path::Path;

use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::SimpleAsyncConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{Result, TodoSyncError};

pub mod schema;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

const CONNECTION_PRAGMAS: &str = "PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;";

/// Persistent in the database file; readers then never block the writer.
const DATABASE_PRAGMAS: &str = "PRAGMA journal_mode = WAL;";

type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
type SqlitePool = Pool<SqliteAsyncConn>;
type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

/// Shared handle to the SQLite database. Cloning is cheap; every store holds one.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn open(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let sqlite_path = sqlite_path.as_ref();
        ensure_parent_dir(sqlite_path)?;
        run_migrations(sqlite_path).await?;

        let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(sqlite_path);
        let pool: SqlitePool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| TodoSyncError::Runtime(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TodoSyncError::Runtime(e.to_string()))?;
        apply_connection_pragmas(&mut conn).await?;
        Ok(conn)
    }

    /// Run `task` on a pooled connection outside any explicit transaction.
    pub async fn read<T, F>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut conn = self.conn().await?;
        conn.spawn_blocking(move |conn| Ok(task(conn))).await?
    }

    /// Run `task` inside `BEGIN IMMEDIATE ... COMMIT`.
    ///
    /// The write lock is taken up front, so concurrent writers queue on
    /// `busy_timeout` instead of failing when a deferred transaction tries
    /// to upgrade. Any error rolls the whole task back. The task runs to
    /// completion even if the returned future is dropped.
    pub async fn write<T, F>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut conn = self.conn().await?;
        conn.spawn_blocking(move |conn| {
            Ok(conn.immediate_transaction::<_, TodoSyncError, _>(task))
        })
        .await?
    }
}

async fn apply_connection_pragmas(conn: &mut SqliteAsyncConn) -> Result<()> {
    conn.batch_execute(CONNECTION_PRAGMAS).await?;
    Ok(())
}

pub fn default_db_path() -> String {
    "./data/todos.db".to_string()
}

pub(crate) fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| TodoSyncError::Runtime(e.to_string()))?;
    }
    Ok(())
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = SqliteConnection::establish(&database_url)
            .map_err(|e| TodoSyncError::Runtime(e.to_string()))?;
        conn.batch_execute(DATABASE_PRAGMAS)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| TodoSyncError::Runtime(e.to_string()))?;
        Ok::<_, TodoSyncError>(())
    })
    .await
    .map_err(|e| TodoSyncError::Runtime(e.to_string()))??;
    Ok(())
}

pub(crate) fn now_ts() -> i64 {
    Utc::now().timestamp()
}

pub(crate) fn to_timestamp(value: DateTime<Utc>) -> i64 {
    value.timestamp()
}

pub(crate) fn from_timestamp(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(value, 0).unwrap_or_default()
}

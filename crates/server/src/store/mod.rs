mod auth;
mod heartbeats;
mod tasks;
mod work_items;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub use work_items::{LeaseOutcome, LeasedWorkItem, ReclaimCounts, SubmitOutcome};

/// SQLite-backed client for the task/work-item/auth/heartbeat store.
///
/// The pool is capped at a single connection: SQLite has no
/// `SELECT ... FOR UPDATE SKIP LOCKED`, so correctness for the lease
/// transaction instead comes from there only ever being one writer
/// connection — every `pool.begin()` transaction on it is already
/// serialized against every other one.
pub struct StoreClient {
    pool: SqlitePool,
}

impl StoreClient {
    /// Open (creating if absent) the SQLite database at `database_path`.
    pub async fn connect(database_path: &str) -> Result<Self, StoreError> {
        tracing::info!(path = database_path, "opening store");

        let url = format!("sqlite://{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let client = Self { pool };
        client.health_check().await?;
        tracing::info!("store connection established");

        Ok(client)
    }

    /// Verify the connection is alive.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        tracing::info!("running store migrations");

        sqlx::migrate!("src/store/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        tracing::info!("store migrations complete");
        Ok(())
    }

    #[allow(dead_code)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store query error: {0}")]
    Query(String),

    #[error("store migration error: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for dispatch_common::DispatchError {
    fn from(e: StoreError) -> Self {
        dispatch_common::DispatchError::Store(e.to_string())
    }
}

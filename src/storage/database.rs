use crate::core::config::AppConfig;
use crate::core::error::StorageError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    revision: Arc<watch::Sender<u64>>,
    clock: Arc<AtomicI64>,
}

impl Database {
    pub async fn open(config: &AppConfig) -> Result<Self, StorageError> {
        let db_dir = config.data_path();
        std::fs::create_dir_all(&db_dir).map_err(|e| StorageError::Database(e.to_string()))?;

        let db_path = db_dir.join("ledger.db");
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        tracing::debug!(path = %db_path.display(), "opened ledger database");

        let (revision, _) = watch::channel(0);
        Ok(Self {
            pool,
            revision: Arc::new(revision),
            clock: Arc::new(AtomicI64::new(0)),
        })
    }

    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(include_str!("../../migrations/001_initial.sql"))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        Ok(())
    }

    pub fn entries(&self) -> super::LedgerRepo {
        super::LedgerRepo::new(
            self.pool.clone(),
            Arc::clone(&self.revision),
            Arc::clone(&self.clock),
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Hands out creation timestamps (ms) that strictly increase within the process,
/// even when two inserts land in the same millisecond.
pub(crate) fn next_timestamp(clock: &AtomicI64) -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let mut prev = clock.load(Ordering::SeqCst);
    loop {
        let next = now.max(prev + 1);
        match clock.compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

//! Durable store for the integrad CI daemon.
//!
//! An ordered, crash-safe key/value store with named buckets, per-bucket
//! auto-increment sequences and atomic multi-key transactions, kept in a
//! single SQLite file.

pub mod error;
pub mod key;
pub mod repo;
pub mod retry;
pub mod txn;

pub use error::{StoreError, StoreResult};
pub use repo::*;
pub use retry::RetryPolicy;
pub use txn::{Order, Record, Txn};

use sqlx::SqlitePool;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Handle to the store. Cheap to clone.
///
/// The pool holds a single connection, so transactions are serialized the
/// way a single-writer embedded store serializes them.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the store file at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        run_migrations(&pool).await?;

        info!(path = %path.display(), "Store opened");
        Ok(Self { pool })
    }

    /// Open a private in-memory store. Contents vanish with the handle.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Start a transaction. Dropping it without `commit` rolls it back.
    pub async fn begin(&self) -> StoreResult<Txn> {
        Ok(Txn::new(self.pool.begin().await?))
    }

    /// Create `bucket` if it does not exist yet, in its own transaction.
    pub async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        let mut txn = self.begin().await?;
        txn.create_bucket_if_not_exists(bucket).await?;
        txn.commit().await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Name of a bucket nested under `parent`.
pub fn nested(parent: &str, child: &str) -> String {
    format!("{parent}/{child}")
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

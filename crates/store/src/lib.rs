//! Persistence for dispatch log rows and the finalization worker's lease.
//!
//! Deliberately narrow: no organization/project/user/credential tables live
//! here, those belong to an external credential store. This crate owns
//! exactly the two tables the dispatch core and finalization worker touch.

mod lock;
mod log_record;

pub use lock::LOCK_DURATION_MINUTES;
pub use log_record::{FinalizedCost, FinalizedUsage, LogRecord};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Builds a pool without establishing a connection up front. Used by a
    /// dispatch-only build (no Finalization Worker started) and by tests that
    /// never actually issue a query.
    pub fn connect_lazy(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(10).connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_log(&self, record: &LogRecord) -> Result<(), StoreError> {
        log_record::insert(&self.pool, record).await
    }

    pub async fn fetch_unfinalized_logs(&self, batch_size: i64) -> Result<Vec<LogRecord>, StoreError> {
        log_record::fetch_unfinalized(&self.pool, batch_size).await
    }

    pub async fn finalize_log(
        &self,
        request_id: &str,
        usage: log_record::FinalizedUsage,
        cost: log_record::FinalizedCost,
    ) -> Result<(), StoreError> {
        log_record::finalize(&self.pool, request_id, usage, cost).await
    }

    /// Insert-or-steal-stale-lease acquisition: tries to insert the lock row;
    /// on conflict, deletes it if stale and retries once.
    pub async fn try_acquire_lock(&self, key: &str) -> Result<bool, StoreError> {
        lock::try_acquire(&self.pool, key).await
    }

    pub async fn release_lock(&self, key: &str) -> Result<(), StoreError> {
        lock::release(&self.pool, key).await
    }
}

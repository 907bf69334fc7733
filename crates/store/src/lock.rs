use sqlx::PgPool;

use crate::StoreError;

/// A lease older than this is considered abandoned and may be stolen.
pub const LOCK_DURATION_MINUTES: i64 = 10;

/// Inserts the named lock row; on a unique-constraint conflict, deletes the
/// row first if it's older than [`LOCK_DURATION_MINUTES`] and retries once.
/// Returns `false` if the lease is still held by someone else.
pub(crate) async fn try_acquire(pool: &PgPool, key: &str) -> Result<bool, StoreError> {
    if insert(pool, key).await? {
        return Ok(true);
    }

    let deleted = sqlx::query(
        "DELETE FROM locks WHERE key = $1 AND updated_at < extract(epoch from now())::bigint - $2 * 60",
    )
    .bind(key)
    .bind(LOCK_DURATION_MINUTES)
    .execute(pool)
    .await?;

    if deleted.rows_affected() == 0 {
        return Ok(false);
    }

    insert(pool, key).await
}

async fn insert(pool: &PgPool, key: &str) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "INSERT INTO locks (key, created_at, updated_at)
         VALUES ($1, extract(epoch from now())::bigint, extract(epoch from now())::bigint)
         ON CONFLICT (key) DO NOTHING",
    )
    .bind(key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn release(pool: &PgPool, key: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM locks WHERE key = $1").bind(key).execute(pool).await?;
    Ok(())
}

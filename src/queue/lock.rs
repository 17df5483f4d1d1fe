use chrono::Utc;
use sqlx::SqlitePool;

use super::store::StoreError;
use crate::timeutil::{format_utc, plus_seconds};

/// Store-level named lock used to single-flight runner instances across
/// processes. A lock is free when absent or expired; re-acquiring under
/// the same holder renews it.
pub async fn acquire(
    pool: &SqlitePool,
    name: &str,
    holder: &str,
    ttl_s: i64,
) -> Result<bool, StoreError> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO named_locks (name, holder, expires_at)
        VALUES (?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            holder = excluded.holder,
            expires_at = excluded.expires_at
        WHERE named_locks.expires_at <= ?
            OR named_locks.holder = excluded.holder
        "#,
    )
    .bind(name)
    .bind(holder)
    .bind(plus_seconds(now, ttl_s))
    .bind(format_utc(now))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn release(pool: &SqlitePool, name: &str, holder: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM named_locks WHERE name = ? AND holder = ?")
        .bind(name)
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(())
}

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use super::StoreError;
use crate::timeutil::{minute_window, now_str, secs_to_next_window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after_s: i64 },
}

/// Consumes one token from the minute bucket for `rl_key`. The increment
/// is unconditional so concurrent processes converge on the same counter;
/// callers over the limit are told how long until the window rolls.
pub async fn try_acquire(
    pool: &SqlitePool,
    rl_key: &str,
    limit_per_min: i64,
) -> Result<RateDecision, StoreError> {
    let now = Utc::now();
    let counter = bump(pool, rl_key, 1).await?;

    if counter > limit_per_min {
        return Ok(RateDecision::Denied {
            retry_after_s: secs_to_next_window(now),
        });
    }
    Ok(RateDecision::Allowed)
}

/// Unconditional counter increment for observation keys (status classes,
/// latency buckets). Returns the bucket's running total.
pub async fn record(pool: &SqlitePool, rl_key: &str) -> Result<i64, StoreError> {
    bump(pool, rl_key, 1).await
}

async fn bump(pool: &SqlitePool, rl_key: &str, by: i64) -> Result<i64, StoreError> {
    let now = Utc::now();
    let counter: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO rate_limit_counters (rl_key, window_start, counter, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(rl_key, window_start) DO UPDATE SET
            counter = counter + excluded.counter,
            updated_at = excluded.updated_at
        RETURNING counter
        "#,
    )
    .bind(rl_key)
    .bind(minute_window(now))
    .bind(by)
    .bind(now_str())
    .fetch_one(pool)
    .await?;

    Ok(counter)
}

/// Sum of a key's counters over the trailing `windows` minute buckets,
/// including the current one.
pub async fn window_total(
    pool: &SqlitePool,
    rl_key: &str,
    windows: i64,
) -> Result<i64, StoreError> {
    let oldest = minute_window(Utc::now() - Duration::minutes(windows - 1));
    let total: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT SUM(counter)
        FROM rate_limit_counters
        WHERE rl_key = ? AND window_start >= ?
        "#,
    )
    .bind(rl_key)
    .bind(&oldest)
    .fetch_one(pool)
    .await?;

    Ok(total.unwrap_or(0))
}

/// Drops buckets older than `older_than_minutes`; called opportunistically
/// by the watchdog so the table stays small.
pub async fn prune(pool: &SqlitePool, older_than_minutes: i64) -> Result<i64, StoreError> {
    let cutoff = minute_window(Utc::now() - Duration::minutes(older_than_minutes));
    let result = sqlx::query("DELETE FROM rate_limit_counters WHERE window_start < ?")
        .bind(&cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() as i64)
}

/// Histogram bucket upper bounds for `vend_http_latency_bucket_ms`.
pub const LATENCY_BUCKETS_MS: [u64; 7] = [50, 100, 250, 500, 1000, 2500, 5000];

pub fn latency_bucket_key(elapsed_ms: u64) -> String {
    for le in LATENCY_BUCKETS_MS {
        if elapsed_ms <= le {
            return format!("vend_http_latency_bucket_ms:le_{le}");
        }
    }
    "vend_http_latency_bucket_ms:le_inf".to_string()
}

pub fn status_class_key(status: u16) -> &'static str {
    match status {
        429 => "vend.http.429",
        200..=299 => "vend.http.2xx",
        300..=399 => "vend.http.3xx",
        400..=499 => "vend.http.4xx",
        _ => "vend.http.5xx",
    }
}

pub const TOTAL_KEY: &str = "vend.http.total";

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use sqlx::{QueryBuilder, SqlitePool};

use crate::timeutil::{format_utc, now_str, parse_utc, plus_seconds};
use crate::types::{DlqEntry, Job, JobStatus, JobType};

#[derive(Debug)]
pub enum StoreError {
    Db(sqlx::Error),
    Conflict(String),
    NotFound(String),
    Parse(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err)
    }
}

pub const BACKOFF_BASE_S: i64 = 10;
pub const BACKOFF_CAP_S: i64 = 300;

/// Threshold after which a working row is considered stuck regardless of
/// its lease, counted from `started_at`.
pub const STUCK_STARTED_THRESHOLD_S: i64 = 3600;

/// `min(base * 2^(attempts-1), cap) + jitter(0..base)`.
pub fn backoff_delay_s(attempts: i64) -> i64 {
    let exponent = (attempts - 1).clamp(0, 30) as u32;
    let stepped = BACKOFF_BASE_S
        .saturating_mul(1_i64 << exponent)
        .min(BACKOFF_CAP_S);
    stepped + fastrand::i64(0..BACKOFF_BASE_S)
}

pub struct EnqueueParams<'a> {
    pub job_type: JobType,
    pub payload: &'a serde_json::Value,
    pub idempotency_key: Option<&'a str>,
    pub priority: i64,
    pub max_attempts: i64,
}

pub struct EnqueueOutcome {
    pub job_id: i64,
    pub deduplicated: bool,
}

pub async fn enqueue(
    pool: &SqlitePool,
    params: &EnqueueParams<'_>,
) -> Result<EnqueueOutcome, StoreError> {
    let now = now_str();
    let payload = serde_json::to_string(params.payload)
        .map_err(|err| StoreError::Parse(format!("invalid payload JSON: {err}")))?;

    if let Some(key) = params.idempotency_key {
        if let Some(existing) = find_by_idempotency_key(pool, key).await? {
            return Ok(EnqueueOutcome {
                job_id: existing,
                deduplicated: true,
            });
        }
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO jobs (
            idempotency_key,
            job_type,
            priority,
            payload,
            status,
            attempts,
            max_attempts,
            next_run_at,
            created_at,
            updated_at
        )
        VALUES (?, ?, ?, ?, 'pending', 0, ?, ?, ?, ?)
        "#,
    )
    .bind(params.idempotency_key)
    .bind(params.job_type.as_str())
    .bind(params.priority)
    .bind(&payload)
    .bind(params.max_attempts)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await;

    let job_id = match inserted {
        Ok(done) => done.last_insert_rowid(),
        Err(sqlx::Error::Database(db))
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
        {
            // Lost the insert race on the idempotency key; the winner's row
            // is the one the caller gets.
            if let Some(key) = params.idempotency_key {
                if let Some(existing) = find_by_idempotency_key(pool, key).await? {
                    return Ok(EnqueueOutcome {
                        job_id: existing,
                        deduplicated: true,
                    });
                }
            }
            return Err(StoreError::Db(sqlx::Error::Database(db)));
        }
        Err(err) => return Err(err.into()),
    };

    append_log(
        pool,
        job_id,
        "info",
        &serde_json::json!({ "event": "job.enqueued", "type": params.job_type.as_str() }),
        None,
    )
    .await?;

    Ok(EnqueueOutcome {
        job_id,
        deduplicated: false,
    })
}

async fn find_by_idempotency_key(
    pool: &SqlitePool,
    key: &str,
) -> Result<Option<i64>, StoreError> {
    Ok(
        sqlx::query_scalar("SELECT id FROM jobs WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?,
    )
}

/// Atomically transitions up to `limit` eligible pending rows to `working`
/// under a fresh lease. Two concurrent calls never return overlapping id
/// sets: the UPDATE re-checks `status = 'pending'` and SQLite serializes
/// the write.
pub async fn claim_batch(
    pool: &SqlitePool,
    limit: i64,
    job_type: Option<JobType>,
    worker_id: &str,
    lease_ttl_s: i64,
) -> Result<Vec<Job>, StoreError> {
    let now = Utc::now();
    let now_text = format_utc(now);
    let leased_until = format_utc(now + Duration::seconds(lease_ttl_s));
    let type_filter = job_type.map(JobType::as_str);

    let mut tx = pool.begin().await?;

    let claimed_ids: Vec<i64> = sqlx::query_scalar(
        r#"
        WITH eligible AS (
            SELECT id
            FROM jobs
            WHERE status = 'pending'
                AND (next_run_at IS NULL OR next_run_at <= ?)
                AND (? IS NULL OR job_type = ?)
            ORDER BY priority ASC, updated_at ASC
            LIMIT ?
        )
        UPDATE jobs
        SET status = 'working',
            leased_until = ?,
            leased_by = ?,
            heartbeat_at = ?,
            started_at = COALESCE(started_at, ?),
            attempts = attempts + 1,
            updated_at = ?
        WHERE id IN (SELECT id FROM eligible)
            AND status = 'pending'
        RETURNING id
        "#,
    )
    .bind(&now_text)
    .bind(type_filter)
    .bind(type_filter)
    .bind(limit)
    .bind(&leased_until)
    .bind(worker_id)
    .bind(&now_text)
    .bind(&now_text)
    .bind(&now_text)
    .fetch_all(&mut *tx)
    .await?;

    if claimed_ids.is_empty() {
        tx.commit().await?;
        return Ok(Vec::new());
    }

    let mut fetch = QueryBuilder::new("SELECT * FROM jobs WHERE id IN (");
    let mut fetch_list = fetch.separated(", ");
    for id in &claimed_ids {
        fetch_list.push_bind(id);
    }
    fetch_list.push_unseparated(") ORDER BY priority ASC, updated_at ASC");

    let rows: Vec<JobRow> = fetch.build_query_as().fetch_all(&mut *tx).await?;

    for id in &claimed_ids {
        insert_log(
            &mut tx,
            *id,
            "info",
            &serde_json::json!({ "event": "job.claimed", "worker": worker_id }),
            None,
        )
        .await?;
    }

    tx.commit().await?;

    rows.into_iter().map(JobRow::try_into).collect()
}

pub async fn heartbeat(
    pool: &SqlitePool,
    job_id: i64,
    worker_id: &str,
    lease_ttl_s: i64,
) -> Result<(), StoreError> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET leased_until = ?,
            heartbeat_at = ?,
            updated_at = ?
        WHERE id = ?
            AND status = 'working'
            AND leased_by = ?
        "#,
    )
    .bind(format_utc(now + Duration::seconds(lease_ttl_s)))
    .bind(format_utc(now))
    .bind(format_utc(now))
    .bind(job_id)
    .bind(worker_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict("lease_not_owned".to_string()));
    }
    Ok(())
}

pub async fn complete(
    pool: &SqlitePool,
    job_id: i64,
    worker_id: &str,
    correlation_id: Option<&str>,
) -> Result<(), StoreError> {
    let now = now_str();
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'done',
            finished_at = ?,
            leased_until = NULL,
            leased_by = NULL,
            last_error = NULL,
            updated_at = ?
        WHERE id = ?
            AND status = 'working'
            AND leased_by = ?
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(job_id)
    .bind(worker_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict("lease_not_owned".to_string()));
    }

    append_log(
        pool,
        job_id,
        "info",
        &serde_json::json!({ "event": "job.completed" }),
        correlation_id,
    )
    .await?;
    Ok(())
}

pub enum FailOutcome {
    Retried { next_run_at: String },
    MovedToDlq { dlq_id: i64 },
}

/// Retries with backoff while attempts remain, otherwise freezes the row
/// into the DLQ and removes it from the live table. `terminal` skips the
/// retry path for errors classified fatal on first sight.
pub async fn fail(
    pool: &SqlitePool,
    job_id: i64,
    worker_id: &str,
    fail_code: &str,
    fail_message: &str,
    terminal: bool,
) -> Result<FailOutcome, StoreError> {
    let now = Utc::now();
    let now_text = format_utc(now);

    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound("job not found".to_string()))?;

    if row.status != "working" || row.leased_by.as_deref() != Some(worker_id) {
        return Err(StoreError::Conflict("lease_not_owned".to_string()));
    }

    let exhausted = row.attempts >= row.max_attempts;
    if !terminal && !exhausted {
        let next_run_at = plus_seconds(now, backoff_delay_s(row.attempts));
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                next_run_at = ?,
                leased_until = NULL,
                leased_by = NULL,
                last_error = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&next_run_at)
        .bind(fail_message)
        .bind(&now_text)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        insert_log(
            &mut tx,
            job_id,
            "warn",
            &serde_json::json!({
                "event": "job.retry",
                "code": fail_code,
                "attempt": row.attempts,
                "next_run_at": next_run_at,
            }),
            None,
        )
        .await?;

        tx.commit().await?;
        return Ok(FailOutcome::Retried { next_run_at });
    }

    let dlq = sqlx::query(
        r#"
        INSERT INTO job_dlq (
            job_id,
            idempotency_key,
            job_type,
            priority,
            payload,
            attempts,
            max_attempts,
            fail_code,
            fail_message,
            created_at,
            moved_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job_id)
    .bind(row.idempotency_key.as_deref())
    .bind(&row.job_type)
    .bind(row.priority)
    .bind(&row.payload)
    .bind(row.attempts)
    .bind(row.max_attempts)
    .bind(fail_code)
    .bind(fail_message)
    .bind(&row.created_at)
    .bind(&now_text)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

    insert_log(
        &mut tx,
        job_id,
        "error",
        &serde_json::json!({
            "event": "job.dlq",
            "code": fail_code,
            "attempt": row.attempts,
        }),
        None,
    )
    .await?;

    tx.commit().await?;
    Ok(FailOutcome::MovedToDlq {
        dlq_id: dlq.last_insert_rowid(),
    })
}

/// Resets working rows whose lease or heartbeat is older than
/// `older_than_s`, or that started longer ago than the stuck threshold.
/// Attempts are left untouched; the next claim re-increments them.
pub async fn reap(pool: &SqlitePool, older_than_s: i64) -> Result<i64, StoreError> {
    let now = Utc::now();
    let cutoff = format_utc(now - Duration::seconds(older_than_s));
    let stuck_cutoff = format_utc(now - Duration::seconds(STUCK_STARTED_THRESHOLD_S));

    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'pending',
            leased_until = NULL,
            leased_by = NULL,
            heartbeat_at = NULL,
            updated_at = ?
        WHERE status = 'working'
            AND (
                (leased_until IS NOT NULL AND leased_until < ?)
                OR (heartbeat_at IS NOT NULL AND heartbeat_at < ?)
                OR (started_at IS NOT NULL AND started_at < ?)
            )
        "#,
    )
    .bind(format_utc(now))
    .bind(&cutoff)
    .bind(&cutoff)
    .bind(&stuck_cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as i64)
}

/// Operator-forced DLQ move, regardless of remaining attempts.
pub async fn move_dlq(
    pool: &SqlitePool,
    job_id: i64,
    fail_code: &str,
    fail_message: &str,
) -> Result<i64, StoreError> {
    let now_text = now_str();
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound("job not found".to_string()))?;

    let dlq = sqlx::query(
        r#"
        INSERT INTO job_dlq (
            job_id, idempotency_key, job_type, priority, payload,
            attempts, max_attempts, fail_code, fail_message, created_at, moved_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job_id)
    .bind(row.idempotency_key.as_deref())
    .bind(&row.job_type)
    .bind(row.priority)
    .bind(&row.payload)
    .bind(row.attempts)
    .bind(row.max_attempts)
    .bind(fail_code)
    .bind(fail_message)
    .bind(&row.created_at)
    .bind(&now_text)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(dlq.last_insert_rowid())
}

pub struct RedriveOutcome {
    pub redriven: i64,
    pub job_ids: Vec<i64>,
}

/// Moves DLQ rows back to `pending` with one attempt refunded and a short
/// delay before eligibility. Rows whose idempotency key is already live
/// are dropped from the DLQ without creating a duplicate.
pub async fn redrive_dlq(
    pool: &SqlitePool,
    ids: Option<&[i64]>,
    count: Option<i64>,
    delay_s: i64,
) -> Result<RedriveOutcome, StoreError> {
    let now = Utc::now();
    let now_text = format_utc(now);
    let next_run_at = plus_seconds(now, delay_s);

    let entries: Vec<DlqRow> = match ids {
        Some(ids) if !ids.is_empty() => {
            let mut query = QueryBuilder::new("SELECT * FROM job_dlq WHERE id IN (");
            let mut list = query.separated(", ");
            for id in ids {
                list.push_bind(id);
            }
            list.push_unseparated(") ORDER BY moved_at ASC");
            query.build_query_as().fetch_all(pool).await?
        }
        _ => {
            let limit = count.unwrap_or(50).clamp(1, 500);
            sqlx::query_as("SELECT * FROM job_dlq ORDER BY moved_at ASC LIMIT ?")
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
    };

    let mut redriven = 0;
    let mut job_ids = Vec::with_capacity(entries.len());

    for entry in entries {
        let mut tx = pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (
                idempotency_key, job_type, priority, payload, status,
                attempts, max_attempts, next_run_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?)
            ON CONFLICT(idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
            "#,
        )
        .bind(entry.idempotency_key.as_deref())
        .bind(&entry.job_type)
        .bind(entry.priority)
        .bind(&entry.payload)
        .bind((entry.attempts - 1).max(0))
        .bind(entry.max_attempts)
        .bind(&next_run_at)
        .bind(&now_text)
        .bind(&now_text)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM job_dlq WHERE id = ?")
            .bind(entry.id)
            .execute(&mut *tx)
            .await?;

        if inserted.rows_affected() > 0 {
            let job_id = inserted.last_insert_rowid();
            insert_log(
                &mut tx,
                job_id,
                "info",
                &serde_json::json!({ "event": "job.redriven", "dlq_id": entry.id }),
                None,
            )
            .await?;
            redriven += 1;
            job_ids.push(job_id);
        }

        tx.commit().await?;
    }

    Ok(RedriveOutcome { redriven, job_ids })
}

pub async fn purge_dlq(
    pool: &SqlitePool,
    ids: Option<&[i64]>,
    older_than_s: Option<i64>,
) -> Result<i64, StoreError> {
    let result = match (ids, older_than_s) {
        (Some(ids), _) if !ids.is_empty() => {
            let mut query = QueryBuilder::new("DELETE FROM job_dlq WHERE id IN (");
            let mut list = query.separated(", ");
            for id in ids {
                list.push_bind(id);
            }
            list.push_unseparated(")");
            query.build().execute(pool).await?
        }
        (_, Some(older_than_s)) => {
            let cutoff = format_utc(Utc::now() - Duration::seconds(older_than_s));
            sqlx::query("DELETE FROM job_dlq WHERE moved_at < ?")
                .bind(cutoff)
                .execute(pool)
                .await?
        }
        _ => sqlx::query("DELETE FROM job_dlq").execute(pool).await?,
    };

    Ok(result.rows_affected() as i64)
}

pub async fn list_dlq(pool: &SqlitePool, limit: i64) -> Result<Vec<DlqEntry>, StoreError> {
    let rows: Vec<DlqRow> =
        sqlx::query_as("SELECT * FROM job_dlq ORDER BY moved_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(pool)
            .await?;
    rows.into_iter().map(DlqRow::try_into).collect()
}

pub struct QueueCounts {
    pub pending: i64,
    pub working: i64,
    pub done: i64,
    pub dlq_depth: i64,
    pub oldest_pending_age_s: Option<i64>,
}

pub async fn status_counts(pool: &SqlitePool) -> Result<QueueCounts, StoreError> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .fetch_all(pool)
            .await?;

    let mut counts = QueueCounts {
        pending: 0,
        working: 0,
        done: 0,
        dlq_depth: 0,
        oldest_pending_age_s: None,
    };
    for (status, count) in rows {
        match JobStatus::parse(&status) {
            Some(JobStatus::Pending) => counts.pending = count,
            Some(JobStatus::Working) => counts.working = count,
            Some(JobStatus::Done) => counts.done = count,
            _ => {}
        }
    }

    counts.dlq_depth = sqlx::query_scalar("SELECT COUNT(*) FROM job_dlq")
        .fetch_one(pool)
        .await?;
    counts.oldest_pending_age_s = oldest_pending_age_s(pool).await?;

    Ok(counts)
}

pub async fn oldest_pending_age_s(pool: &SqlitePool) -> Result<Option<i64>, StoreError> {
    let oldest: Option<String> =
        sqlx::query_scalar("SELECT MIN(created_at) FROM jobs WHERE status = 'pending'")
            .fetch_one(pool)
            .await?;

    Ok(oldest
        .as_deref()
        .and_then(parse_utc)
        .map(|dt| (Utc::now() - dt).num_seconds().max(0)))
}

pub async fn working_by_type(
    pool: &SqlitePool,
) -> Result<BTreeMap<String, i64>, StoreError> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT job_type, COUNT(*) FROM jobs WHERE status = 'working' GROUP BY job_type",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Distinct types with at least one due pending row, claim-ordered.
pub async fn pending_types_due(pool: &SqlitePool) -> Result<Vec<JobType>, StoreError> {
    let now = now_str();
    let rows: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT job_type
        FROM jobs
        WHERE status = 'pending'
            AND (next_run_at IS NULL OR next_run_at <= ?)
        "#,
    )
    .bind(&now)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .filter_map(|raw| JobType::parse(raw))
        .collect())
}

pub async fn done_since(pool: &SqlitePool, since_s: i64) -> Result<i64, StoreError> {
    let cutoff = format_utc(Utc::now() - Duration::seconds(since_s));
    Ok(sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE status = 'done' AND finished_at >= ?",
    )
    .bind(cutoff)
    .fetch_one(pool)
    .await?)
}

pub async fn stuck_working(pool: &SqlitePool, older_than_s: i64) -> Result<i64, StoreError> {
    let cutoff = format_utc(Utc::now() - Duration::seconds(older_than_s));
    Ok(sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM jobs
        WHERE status = 'working'
            AND (
                (heartbeat_at IS NOT NULL AND heartbeat_at < ?)
                OR (heartbeat_at IS NULL AND started_at IS NOT NULL AND started_at < ?)
            )
        "#,
    )
    .bind(&cutoff)
    .bind(&cutoff)
    .fetch_one(pool)
    .await?)
}

pub async fn append_log(
    pool: &SqlitePool,
    job_id: i64,
    level: &str,
    message: &serde_json::Value,
    correlation_id: Option<&str>,
) -> Result<(), StoreError> {
    let message = serde_json::to_string(message)
        .map_err(|err| StoreError::Parse(format!("invalid log message JSON: {err}")))?;
    sqlx::query(
        r#"
        INSERT INTO job_logs (job_id, level, message, correlation_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(job_id)
    .bind(level)
    .bind(&message)
    .bind(correlation_id)
    .bind(now_str())
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_log(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    job_id: i64,
    level: &str,
    message: &serde_json::Value,
    correlation_id: Option<&str>,
) -> Result<(), StoreError> {
    let message = serde_json::to_string(message)
        .map_err(|err| StoreError::Parse(format!("invalid log message JSON: {err}")))?;
    sqlx::query(
        r#"
        INSERT INTO job_logs (job_id, level, message, correlation_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(job_id)
    .bind(level)
    .bind(&message)
    .bind(correlation_id)
    .bind(now_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    idempotency_key: Option<String>,
    job_type: String,
    priority: i64,
    payload: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    last_error: Option<String>,
    next_run_at: Option<String>,
    leased_until: Option<String>,
    leased_by: Option<String>,
    heartbeat_at: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_type = JobType::parse(&row.job_type)
            .ok_or_else(|| StoreError::Parse(format!("unknown job type: {}", row.job_type)))?;
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Parse(format!("unknown status: {}", row.status)))?;
        let payload = serde_json::from_str(&row.payload)
            .map_err(|err| StoreError::Parse(format!("invalid payload JSON: {err}")))?;

        Ok(Job {
            id: row.id,
            idempotency_key: row.idempotency_key,
            job_type,
            priority: row.priority,
            payload,
            status,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            next_run_at: row.next_run_at,
            leased_until: row.leased_until,
            leased_by: row.leased_by,
            heartbeat_at: row.heartbeat_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DlqRow {
    id: i64,
    job_id: i64,
    idempotency_key: Option<String>,
    job_type: String,
    priority: i64,
    payload: String,
    attempts: i64,
    max_attempts: i64,
    fail_code: String,
    fail_message: String,
    created_at: String,
    moved_at: String,
}

impl TryFrom<DlqRow> for DlqEntry {
    type Error = StoreError;

    fn try_from(row: DlqRow) -> Result<Self, Self::Error> {
        let job_type = JobType::parse(&row.job_type)
            .ok_or_else(|| StoreError::Parse(format!("unknown job type: {}", row.job_type)))?;
        let payload = serde_json::from_str(&row.payload)
            .map_err(|err| StoreError::Parse(format!("invalid payload JSON: {err}")))?;

        Ok(DlqEntry {
            id: row.id,
            job_id: row.job_id,
            idempotency_key: row.idempotency_key,
            job_type,
            priority: row.priority,
            payload,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            fail_code: row.fail_code,
            fail_message: row.fail_message,
            created_at: row.created_at,
            moved_at: row.moved_at,
        })
    }
}

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::timeutil::{now_str, parse_utc};
use crate::types::{WebhookEvent, WebhookEventStatus};

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

pub struct InsertEvent<'a> {
    pub webhook_id: &'a str,
    pub webhook_type: &'a str,
    pub raw_payload: &'a str,
    pub payload: Option<&'a serde_json::Value>,
    pub headers: &'a BTreeMap<String, String>,
    pub source_ip: Option<&'a str>,
    pub status: WebhookEventStatus,
    pub error_message: Option<&'a str>,
    pub replayed_from: Option<Uuid>,
}

pub enum InsertOutcome {
    Inserted(WebhookEvent),
    /// The webhook_id was already stored; the existing row is returned
    /// untouched and the delivery is acknowledged idempotently.
    Duplicate(WebhookEvent),
}

pub async fn insert_event(
    pool: &SqlitePool,
    event: &InsertEvent<'_>,
) -> Result<InsertOutcome, StoreError> {
    let id = Uuid::new_v4();
    let now = now_str();
    let headers = serde_json::to_string(event.headers)
        .map_err(|err| StoreError::Parse(format!("invalid headers JSON: {err}")))?;
    let payload = match event.payload {
        Some(value) => Some(
            serde_json::to_string(value)
                .map_err(|err| StoreError::Parse(format!("invalid payload JSON: {err}")))?,
        ),
        None => None,
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO webhook_events (
            id,
            webhook_id,
            webhook_type,
            raw_payload,
            payload,
            headers,
            source_ip,
            status,
            received_at,
            processing_attempts,
            error_message,
            replayed_from
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(event.webhook_id)
    .bind(event.webhook_type)
    .bind(event.raw_payload)
    .bind(payload.as_deref())
    .bind(&headers)
    .bind(event.source_ip)
    .bind(event.status.as_str())
    .bind(&now)
    .bind(event.error_message)
    .bind(event.replayed_from.map(|id| id.to_string()))
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => Ok(InsertOutcome::Inserted(get_event(pool, id).await?)),
        Err(sqlx::Error::Database(db))
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
        {
            let existing = get_event_by_webhook_id(pool, event.webhook_id).await?;

            // A row parked as failed (bad signature, stale timestamp) does
            // not shadow a later delivery that validates; re-arm it.
            if existing.status == WebhookEventStatus::Failed
                && event.status == WebhookEventStatus::Received
            {
                sqlx::query(
                    r#"
                    UPDATE webhook_events
                    SET raw_payload = ?,
                        payload = ?,
                        headers = ?,
                        source_ip = ?,
                        status = 'received',
                        error_message = NULL,
                        received_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(event.raw_payload)
                .bind(payload.as_deref())
                .bind(&headers)
                .bind(event.source_ip)
                .bind(&now)
                .bind(existing.id.to_string())
                .execute(pool)
                .await?;
                return Ok(InsertOutcome::Inserted(get_event(pool, existing.id).await?));
            }

            Ok(InsertOutcome::Duplicate(existing))
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn get_event(pool: &SqlitePool, id: Uuid) -> Result<WebhookEvent, StoreError> {
    let row = sqlx::query_as::<_, EventRow>("SELECT * FROM webhook_events WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("event not found".to_string()))?;
    row.try_into()
}

pub async fn get_event_by_webhook_id(
    pool: &SqlitePool,
    webhook_id: &str,
) -> Result<WebhookEvent, StoreError> {
    let row = sqlx::query_as::<_, EventRow>("SELECT * FROM webhook_events WHERE webhook_id = ?")
        .bind(webhook_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("event not found".to_string()))?;
    row.try_into()
}

pub async fn link_fanout_job(
    pool: &SqlitePool,
    event_id: Uuid,
    job_id: i64,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_events
        SET status = 'processing',
            queue_job_id = ?
        WHERE id = ?
        "#,
    )
    .bind(job_id)
    .bind(event_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("event not found".to_string()));
    }
    Ok(())
}

pub async fn mark_event_completed(pool: &SqlitePool, event_id: Uuid) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_events
        SET status = 'completed',
            processed_at = ?,
            processing_attempts = processing_attempts + 1,
            error_message = NULL
        WHERE id = ?
        "#,
    )
    .bind(now_str())
    .bind(event_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("event not found".to_string()));
    }
    Ok(())
}

pub async fn mark_event_failed(
    pool: &SqlitePool,
    event_id: Uuid,
    error_message: &str,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_events
        SET status = 'failed',
            processing_attempts = processing_attempts + 1,
            error_message = ?
        WHERE id = ?
        "#,
    )
    .bind(error_message)
    .bind(event_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("event not found".to_string()));
    }
    Ok(())
}

/// Copies a stored event back into the intake path under a fresh
/// webhook_id, linking the copy to its source. The source row is marked
/// replayed.
pub async fn replay_event(pool: &SqlitePool, source_id: Uuid) -> Result<WebhookEvent, StoreError> {
    let source = get_event(pool, source_id).await?;

    let copy_id = Uuid::new_v4();
    let webhook_id = format!("{}:replay:{}", source.webhook_id, &copy_id.to_string()[..8]);
    let now = now_str();
    let headers = serde_json::to_string(&source.headers)
        .map_err(|err| StoreError::Parse(format!("invalid headers JSON: {err}")))?;
    let payload = match &source.payload {
        Some(value) => Some(
            serde_json::to_string(value)
                .map_err(|err| StoreError::Parse(format!("invalid payload JSON: {err}")))?,
        ),
        None => None,
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO webhook_events (
            id, webhook_id, webhook_type, raw_payload, payload, headers,
            source_ip, status, received_at, processing_attempts, replayed_from
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, 'received', ?, 0, ?)
        "#,
    )
    .bind(copy_id.to_string())
    .bind(&webhook_id)
    .bind(&source.webhook_type)
    .bind(&source.raw_payload)
    .bind(payload.as_deref())
    .bind(&headers)
    .bind(source.source_ip.as_deref())
    .bind(&now)
    .bind(source_id.to_string())
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE webhook_events SET status = 'replayed' WHERE id = ?")
        .bind(source_id.to_string())
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        UPDATE webhook_stats
        SET replayed_count = replayed_count + 1, updated_at = ?
        WHERE id = 1
        "#,
    )
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    get_event(pool, copy_id).await
}

/// Subscription + stats bookkeeping for an accepted delivery.
pub async fn bump_received(pool: &SqlitePool, webhook_type: &str) -> Result<(), StoreError> {
    let now = now_str();
    sqlx::query(
        r#"
        INSERT INTO webhook_subscriptions (webhook_type, events_received, last_event_at, active)
        VALUES (?, 1, ?, 1)
        ON CONFLICT(webhook_type) DO UPDATE SET
            events_received = events_received + 1,
            last_event_at = excluded.last_event_at
        "#,
    )
    .bind(webhook_type)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        UPDATE webhook_stats
        SET received_count = received_count + 1, updated_at = ?
        WHERE id = 1
        "#,
    )
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn bump_failure(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE webhook_stats
        SET failed_count = failed_count + 1, updated_at = ?
        WHERE id = 1
        "#,
    )
    .bind(now_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_success_health(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE webhook_health
        SET health_status = 'healthy',
            last_success_at = ?,
            consecutive_failures = 0
        WHERE id = 1
        "#,
    )
    .bind(now_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_failure_health(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE webhook_health
        SET consecutive_failures = consecutive_failures + 1,
            last_failure_at = ?,
            health_status = CASE
                WHEN consecutive_failures + 1 >= 5 THEN 'unhealthy'
                ELSE 'degraded'
            END
        WHERE id = 1
        "#,
    )
    .bind(now_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn last_event_age_s(pool: &SqlitePool) -> Result<Option<i64>, StoreError> {
    let latest: Option<String> =
        sqlx::query_scalar("SELECT MAX(received_at) FROM webhook_events")
            .fetch_one(pool)
            .await?;

    Ok(latest
        .as_deref()
        .and_then(parse_utc)
        .map(|dt| (Utc::now() - dt).num_seconds().max(0)))
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    webhook_id: String,
    webhook_type: String,
    raw_payload: String,
    payload: Option<String>,
    headers: String,
    source_ip: Option<String>,
    status: String,
    received_at: String,
    processed_at: Option<String>,
    processing_attempts: i64,
    error_message: Option<String>,
    queue_job_id: Option<i64>,
    replayed_from: Option<String>,
}

impl TryFrom<EventRow> for WebhookEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let status = WebhookEventStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Parse(format!("unknown status: {}", row.status)))?;
        let headers: BTreeMap<String, String> = serde_json::from_str(&row.headers)
            .map_err(|err| StoreError::Parse(format!("invalid headers JSON: {err}")))?;
        let payload = match row.payload.as_deref() {
            Some(raw) => Some(
                serde_json::from_str(raw)
                    .map_err(|err| StoreError::Parse(format!("invalid payload JSON: {err}")))?,
            ),
            None => None,
        };
        let replayed_from = match row.replayed_from.as_deref() {
            Some(raw) if !raw.is_empty() => Some(
                Uuid::parse_str(raw)
                    .map_err(|err| StoreError::Parse(format!("invalid replayed_from: {err}")))?,
            ),
            _ => None,
        };

        Ok(WebhookEvent {
            id: Uuid::parse_str(&row.id)
                .map_err(|err| StoreError::Parse(format!("invalid event id: {err}")))?,
            webhook_id: row.webhook_id,
            webhook_type: row.webhook_type,
            raw_payload: row.raw_payload,
            payload,
            headers,
            source_ip: row.source_ip,
            status,
            received_at: row.received_at,
            processed_at: row.processed_at,
            processing_attempts: row.processing_attempts,
            error_message: row.error_message,
            queue_job_id: row.queue_job_id,
            replayed_from,
        })
    }
}

use std::collections::BTreeMap;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::{map_config_error, map_queue_error, map_webhook_error};
use crate::config::flags;
use crate::error::ApiError;
use crate::extractors::ValidJson;
use crate::queue::store::{EnqueueParams, enqueue};
use crate::state::AppState;
use crate::types::{
    ApiData, JobType, ReplayedEvent, WebhookAckResponse, WebhookEventStatus,
    WebhookReplayRequest, WebhookReplayResponse, WebhookTestRequest, ok,
};
use crate::webhook::{self, InsertEvent, InsertOutcome, signature};

pub const WEBHOOK_ID_HEADER: &str = "x-ls-webhook-id";
pub const EVENT_TYPE_HEADER: &str = "x-ls-event-type";
pub const TIMESTAMP_HEADER: &str = "x-ls-timestamp";
pub const SIGNATURE_HEADER: &str = "x-ls-signature";
pub const ALT_SIGNATURE_HEADER: &str = "x-signature";

struct Delivery {
    webhook_id: String,
    webhook_type: String,
    timestamp: Option<String>,
    signature: Option<String>,
    raw_body: Vec<u8>,
    content_type: Option<String>,
    source_ip: Option<String>,
    headers: BTreeMap<String, String>,
}

pub async fn receive_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiData<WebhookAckResponse>>, ApiError> {
    if !state
        .config
        .get_bool(flags::WEBHOOK_ENABLED, true)
        .await
        .map_err(map_config_error)?
    {
        return Err(ApiError::forbidden("webhook intake disabled"));
    }

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let webhook_id = header(WEBHOOK_ID_HEADER)
        .ok_or_else(|| ApiError::invalid_input("missing X-LS-Webhook-Id header"))?;
    let webhook_type = header(EVENT_TYPE_HEADER)
        .ok_or_else(|| ApiError::invalid_input("missing X-LS-Event-Type header"))?;
    let timestamp = header(TIMESTAMP_HEADER);
    let provided_signature = signature::extract_signature(
        header(SIGNATURE_HEADER).as_deref(),
        header(ALT_SIGNATURE_HEADER).as_deref(),
    );

    let stored_headers: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect();
    let source_ip = header("x-forwarded-for")
        .map(|raw| raw.split(',').next().unwrap_or(&raw).trim().to_string());
    let content_type = header("content-type");

    let delivery = Delivery {
        webhook_id,
        webhook_type,
        timestamp,
        signature: provided_signature,
        raw_body: body.to_vec(),
        content_type,
        source_ip,
        headers: stored_headers,
    };

    let ack = intake(&state, delivery).await?;
    Ok(Json(ok(ack)))
}

/// Shared intake path for vendor deliveries, self-tests and replays:
/// verify, persist, fan out, count.
async fn intake(state: &AppState, delivery: Delivery) -> Result<WebhookAckResponse, ApiError> {
    let config = &state.config;

    let secret = config
        .get(flags::WEBHOOK_SECRET)
        .await
        .map_err(map_config_error)?
        .filter(|secret| !secret.is_empty());
    let hmac_required = config
        .get_bool(flags::WEBHOOK_HMAC_REQUIRED, true)
        .await
        .map_err(map_config_error)?;
    let open_mode = config
        .get_bool(flags::WEBHOOK_OPEN_MODE, false)
        .await
        .map_err(map_config_error)?
        && config
            .get_epoch(flags::WEBHOOK_OPEN_MODE_UNTIL)
            .await
            .map_err(map_config_error)?
            .is_some_and(|until| until > Utc::now().timestamp());

    let mut verified = false;
    if let (Some(provided), Some(secret)) = (delivery.signature.as_deref(), secret.as_deref()) {
        verified = signature::verify(
            secret,
            &delivery.raw_body,
            delivery.timestamp.as_deref(),
            provided,
        );

        if !verified {
            if let Some(previous) = live_previous_secret(state).await? {
                verified = signature::verify(
                    &previous,
                    &delivery.raw_body,
                    delivery.timestamp.as_deref(),
                    provided,
                );
            }
        }
    }

    if hmac_required && !verified && !open_mode {
        return Err(reject(state, &delivery, "signature verification failed").await);
    }

    let tolerance_s = config
        .get_i64(flags::WEBHOOK_TOLERANCE_S, flags::DEFAULT_TOLERANCE_S)
        .await
        .map_err(map_config_error)?;
    match delivery.timestamp.as_deref() {
        Some(raw) => {
            let Ok(ts) = raw.trim().parse::<i64>() else {
                return Err(reject(state, &delivery, "unparseable timestamp").await);
            };
            if (Utc::now().timestamp() - ts).abs() > tolerance_s {
                return Err(reject(state, &delivery, "timestamp outside tolerance").await);
            }
        }
        None => {
            if hmac_required && !open_mode {
                return Err(reject(state, &delivery, "missing timestamp").await);
            }
        }
    }

    let raw_payload = String::from_utf8_lossy(&delivery.raw_body).into_owned();
    let payload = parse_payload(&delivery);

    let outcome = webhook::insert_event(
        &state.pool,
        &InsertEvent {
            webhook_id: &delivery.webhook_id,
            webhook_type: &delivery.webhook_type,
            raw_payload: &raw_payload,
            payload: payload.as_ref(),
            headers: &delivery.headers,
            source_ip: delivery.source_ip.as_deref(),
            status: WebhookEventStatus::Received,
            error_message: None,
            replayed_from: None,
        },
    )
    .await
    .map_err(map_webhook_error)?;

    let event = match outcome {
        InsertOutcome::Duplicate(existing) => {
            info!(
                webhook_id = %delivery.webhook_id,
                "duplicate webhook delivery acknowledged"
            );
            return Ok(WebhookAckResponse {
                event_id: existing.id,
                webhook_id: existing.webhook_id,
                status: existing.status,
                duplicate: true,
                queue_job_id: existing.queue_job_id,
            });
        }
        InsertOutcome::Inserted(event) => event,
    };

    webhook::bump_received(&state.pool, &delivery.webhook_type)
        .await
        .map_err(map_webhook_error)?;
    webhook::record_success_health(&state.pool)
        .await
        .map_err(map_webhook_error)?;

    let fanout = config
        .get_bool(flags::WEBHOOK_FANOUT_ENABLED, true)
        .await
        .map_err(map_config_error)?;
    let mut queue_job_id = None;
    let mut status = event.status;

    if fanout {
        let key = format!("webhook:{}", delivery.webhook_id);
        let enqueued = enqueue(
            &state.pool,
            &EnqueueParams {
                job_type: JobType::WebhookEvent,
                payload: &json!({
                    "webhook_id": delivery.webhook_id,
                    "webhook_type": delivery.webhook_type,
                }),
                idempotency_key: Some(&key),
                priority: 5,
                max_attempts: flags::DEFAULT_MAX_ATTEMPTS,
            },
        )
        .await
        .map_err(map_queue_error)?;

        webhook::link_fanout_job(&state.pool, event.id, enqueued.job_id)
            .await
            .map_err(map_webhook_error)?;
        queue_job_id = Some(enqueued.job_id);
        status = WebhookEventStatus::Processing;
    }

    Ok(WebhookAckResponse {
        event_id: event.id,
        webhook_id: event.webhook_id,
        status,
        duplicate: false,
        queue_job_id,
    })
}

/// Parks the delivery as a failed row, degrades webhook health, and hands
/// back the 401 for the caller to return.
async fn reject(state: &AppState, delivery: &Delivery, reason: &str) -> ApiError {
    warn!(
        webhook_id = %delivery.webhook_id,
        webhook_type = %delivery.webhook_type,
        reason,
        "webhook delivery rejected"
    );

    let raw_payload = String::from_utf8_lossy(&delivery.raw_body).into_owned();
    let insert = webhook::insert_event(
        &state.pool,
        &InsertEvent {
            webhook_id: &delivery.webhook_id,
            webhook_type: &delivery.webhook_type,
            raw_payload: &raw_payload,
            payload: None,
            headers: &delivery.headers,
            source_ip: delivery.source_ip.as_deref(),
            status: WebhookEventStatus::Failed,
            error_message: Some(reason),
            replayed_from: None,
        },
    )
    .await;
    if let Err(err) = insert {
        warn!(?err, "failed to persist rejected delivery");
    }

    if let Err(err) = webhook::bump_failure(&state.pool).await {
        warn!(?err, "failed to bump webhook failure stats");
    }
    if let Err(err) = webhook::record_failure_health(&state.pool).await {
        warn!(?err, "failed to degrade webhook health");
    }

    ApiError::unauthorized(reason)
}

async fn live_previous_secret(state: &AppState) -> Result<Option<String>, ApiError> {
    let previous = state
        .config
        .get(flags::WEBHOOK_SECRET_PREV)
        .await
        .map_err(map_config_error)?
        .filter(|secret| !secret.is_empty());
    let expires_at = state
        .config
        .get_epoch(flags::WEBHOOK_SECRET_PREV_EXPIRES_AT)
        .await
        .map_err(map_config_error)?;

    let live = expires_at.is_some_and(|at| at > Utc::now().timestamp());
    Ok(previous.filter(|_| live))
}

/// Body is either JSON directly, or a form with the JSON under `payload=`.
fn parse_payload(delivery: &Delivery) -> Option<serde_json::Value> {
    let is_form = delivery
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("application/x-www-form-urlencoded"));

    if is_form {
        let fields: Vec<(String, String)> =
            serde_urlencoded::from_bytes(&delivery.raw_body).ok()?;
        let payload = fields
            .into_iter()
            .find(|(name, _)| name == "payload")
            .map(|(_, value)| value)?;
        serde_json::from_str(&payload).ok()
    } else {
        serde_json::from_slice(&delivery.raw_body).ok()
    }
}

/// Builds a signed synthetic delivery and pushes it through the normal
/// intake path, exercising signature, skew and dedup end to end.
pub async fn test_handler(
    State(state): State<AppState>,
    body: Option<ValidJson<WebhookTestRequest>>,
) -> Result<Json<ApiData<WebhookAckResponse>>, ApiError> {
    let req = body.map(|ValidJson(req)| req).unwrap_or_default();

    let webhook_id = format!("selftest:{}", Uuid::new_v4());
    let webhook_type = req
        .webhook_type
        .unwrap_or_else(|| "vendbridge.test".to_string());
    let payload = req.payload.unwrap_or_else(|| json!({ "ping": true }));
    let raw_body = serde_json::to_vec(&payload)
        .map_err(|err| ApiError::internal(format!("payload: {err}")))?;
    let timestamp = Utc::now().timestamp().to_string();

    let secret = state
        .config
        .get(flags::WEBHOOK_SECRET)
        .await
        .map_err(map_config_error)?
        .unwrap_or_default();
    let signed = signature::sign(&secret, &raw_body, Some(&timestamp));

    let mut headers = BTreeMap::new();
    headers.insert(WEBHOOK_ID_HEADER.to_string(), webhook_id.clone());
    headers.insert(EVENT_TYPE_HEADER.to_string(), webhook_type.clone());
    headers.insert(TIMESTAMP_HEADER.to_string(), timestamp.clone());
    headers.insert(SIGNATURE_HEADER.to_string(), signed.clone());

    let delivery = Delivery {
        webhook_id,
        webhook_type,
        timestamp: Some(timestamp),
        signature: Some(signed),
        raw_body,
        content_type: Some("application/json".to_string()),
        source_ip: None,
        headers,
    };

    let ack = intake(&state, delivery).await?;
    Ok(Json(ok(ack)))
}

/// Re-enqueues stored events: each source row is copied under a fresh
/// webhook_id and the copy fans out like a live delivery.
pub async fn replay_handler(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<WebhookReplayRequest>,
) -> Result<Json<ApiData<WebhookReplayResponse>>, ApiError> {
    if req.ids.is_empty() {
        return Err(ApiError::invalid_input("ids must be non-empty"));
    }
    if req.ids.len() > 100 {
        return Err(ApiError::invalid_input("at most 100 ids per replay"));
    }

    let fanout = state
        .config
        .get_bool(flags::WEBHOOK_FANOUT_ENABLED, true)
        .await
        .map_err(map_config_error)?;

    let mut replayed = Vec::with_capacity(req.ids.len());
    for source_id in req.ids {
        let copy = webhook::replay_event(&state.pool, source_id)
            .await
            .map_err(map_webhook_error)?;

        let mut queue_job_id = None;
        if fanout {
            let key = format!("webhook:{}", copy.webhook_id);
            let enqueued = enqueue(
                &state.pool,
                &EnqueueParams {
                    job_type: JobType::WebhookEvent,
                    payload: &json!({
                        "webhook_id": copy.webhook_id,
                        "webhook_type": copy.webhook_type,
                    }),
                    idempotency_key: Some(&key),
                    priority: 5,
                    max_attempts: flags::DEFAULT_MAX_ATTEMPTS,
                },
            )
            .await
            .map_err(map_queue_error)?;
            webhook::link_fanout_job(&state.pool, copy.id, enqueued.job_id)
                .await
                .map_err(map_webhook_error)?;
            queue_job_id = Some(enqueued.job_id);
        }

        replayed.push(ReplayedEvent {
            source_event_id: source_id,
            event_id: copy.id,
            queue_job_id,
        });
    }

    Ok(Json(ok(WebhookReplayResponse { replayed })))
}

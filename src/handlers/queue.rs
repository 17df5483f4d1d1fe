use std::collections::BTreeMap;

use axum::{Json, extract::State};
use tracing::warn;

use super::{map_config_error, map_queue_error};
use crate::config::flags;
use crate::error::ApiError;
use crate::extractors::{ValidJson, ValidQuery};
use crate::queue::{RunOptions, store};
use crate::state::AppState;
use crate::types::{
    ApiData, ConcurrencyUpdateRequest, DlqListResponse, DlqPurgeRequest, DlqPurgeResponse,
    DlqRedriveRequest, DlqRedriveResponse, EnqueueRequest, EnqueueResponse, JobType,
    PauseRequest, QueueStatusResponse, ReapRequest, ReapResponse, RunSummary,
    RunnerContinuousRequest, RunnerKickRequest, ok,
};

const REDRIVE_DEFAULT_DELAY_S: i64 = 60;
const EMERGENCY_REAP_OLDER_THAN_S: i64 = 60;

pub async fn enqueue_handler(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<EnqueueRequest>,
) -> Result<Json<ApiData<EnqueueResponse>>, ApiError> {
    let priority = req.priority.unwrap_or(5);
    if !(0..=9).contains(&priority) {
        return Err(ApiError::invalid_input("priority must be between 0 and 9"));
    }
    let max_attempts = req.max_attempts.unwrap_or(flags::DEFAULT_MAX_ATTEMPTS);
    if !(1..=20).contains(&max_attempts) {
        return Err(ApiError::invalid_input(
            "max_attempts must be between 1 and 20",
        ));
    }
    if !req.payload.is_object() {
        return Err(ApiError::invalid_input("payload must be an object"));
    }
    if let Some(key) = req.idempotency_key.as_deref() {
        if key.trim().is_empty() {
            return Err(ApiError::invalid_input("idempotency_key must be non-empty"));
        }
    }

    let outcome = store::enqueue(
        &state.pool,
        &store::EnqueueParams {
            job_type: req.job_type,
            payload: &req.payload,
            idempotency_key: req.idempotency_key.as_deref(),
            priority,
            max_attempts,
        },
    )
    .await
    .map_err(map_queue_error)?;

    let auto_kick = state
        .config
        .get_bool(flags::QUEUE_AUTO_KICK, false)
        .await
        .map_err(map_config_error)?;
    if auto_kick && !outcome.deduplicated {
        let runner = state.runner.clone();
        tokio::spawn(async move {
            if let Err(err) = runner
                .run(RunOptions {
                    limit: Some(25),
                    job_type: None,
                })
                .await
            {
                warn!(?err, "auto-kick runner burst failed");
            }
        });
    }

    Ok(Json(ok(EnqueueResponse {
        job_id: outcome.job_id,
        deduplicated: outcome.deduplicated,
    })))
}

pub async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiData<QueueStatusResponse>>, ApiError> {
    let counts = store::status_counts(&state.pool)
        .await
        .map_err(map_queue_error)?;
    let working_by_type = store::working_by_type(&state.pool)
        .await
        .map_err(map_queue_error)?;

    let mut paused_types = Vec::new();
    let mut concurrency_caps = BTreeMap::new();
    for ty in JobType::ALL {
        if state
            .config
            .get_bool(&flags::pause(ty), false)
            .await
            .map_err(map_config_error)?
        {
            paused_types.push(ty.as_str().to_string());
        }
        let cap = state
            .config
            .get_i64(&flags::max_concurrency(ty), flags::DEFAULT_MAX_CONCURRENCY)
            .await
            .map_err(map_config_error)?;
        concurrency_caps.insert(ty.as_str().to_string(), cap);
    }

    let breaker = state.vend.breaker().snapshot();
    let kill_all = state
        .config
        .get_bool(flags::QUEUE_KILL_ALL, false)
        .await
        .map_err(map_config_error)?;
    let runner_enabled = state
        .config
        .get_bool(flags::QUEUE_RUNNER_ENABLED, true)
        .await
        .map_err(map_config_error)?;
    let continuous = state
        .config
        .get_bool(flags::QUEUE_CONTINUOUS, false)
        .await
        .map_err(map_config_error)?;

    Ok(Json(ok(QueueStatusResponse {
        pending: counts.pending,
        working: counts.working,
        done: counts.done,
        dlq_depth: counts.dlq_depth,
        oldest_pending_age_s: counts.oldest_pending_age_s,
        working_by_type,
        paused_types,
        concurrency_caps,
        breaker_tripped: breaker.tripped,
        breaker_until: breaker.until,
        runner_enabled,
        kill_all,
        continuous,
    })))
}

pub async fn pause_handler(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<PauseRequest>,
) -> Result<Json<ApiData<serde_json::Value>>, ApiError> {
    state
        .config
        .set_bool(&flags::pause(req.job_type), true)
        .await
        .map_err(map_config_error)?;
    Ok(Json(ok(
        serde_json::json!({ "paused": req.job_type.as_str() }),
    )))
}

pub async fn resume_handler(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<PauseRequest>,
) -> Result<Json<ApiData<serde_json::Value>>, ApiError> {
    state
        .config
        .delete(&flags::pause(req.job_type))
        .await
        .map_err(map_config_error)?;
    Ok(Json(ok(
        serde_json::json!({ "resumed": req.job_type.as_str() }),
    )))
}

pub async fn concurrency_update_handler(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<ConcurrencyUpdateRequest>,
) -> Result<Json<ApiData<serde_json::Value>>, ApiError> {
    if !(0..=64).contains(&req.max_concurrency) {
        return Err(ApiError::invalid_input(
            "max_concurrency must be between 0 and 64",
        ));
    }
    state
        .config
        .set_i64(&flags::max_concurrency(req.job_type), req.max_concurrency)
        .await
        .map_err(map_config_error)?;
    Ok(Json(ok(serde_json::json!({
        "type": req.job_type.as_str(),
        "max_concurrency": req.max_concurrency,
    }))))
}

pub async fn dlq_redrive_handler(
    State(state): State<AppState>,
    body: Option<ValidJson<DlqRedriveRequest>>,
) -> Result<Json<ApiData<DlqRedriveResponse>>, ApiError> {
    let req = body.map(|ValidJson(req)| req).unwrap_or_default();
    let outcome = store::redrive_dlq(
        &state.pool,
        req.ids.as_deref(),
        req.count,
        req.delay_s.unwrap_or(REDRIVE_DEFAULT_DELAY_S).max(0),
    )
    .await
    .map_err(map_queue_error)?;

    Ok(Json(ok(DlqRedriveResponse {
        redriven: outcome.redriven,
        job_ids: outcome.job_ids,
    })))
}

#[derive(Debug, serde::Deserialize)]
pub struct DlqListQuery {
    limit: Option<i64>,
}

pub async fn dlq_list_handler(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<DlqListQuery>,
) -> Result<Json<ApiData<DlqListResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(100);
    if !(1..=500).contains(&limit) {
        return Err(ApiError::invalid_input("limit must be between 1 and 500"));
    }
    let entries = store::list_dlq(&state.pool, limit)
        .await
        .map_err(map_queue_error)?;
    Ok(Json(ok(DlqListResponse { entries })))
}

pub async fn dlq_purge_handler(
    State(state): State<AppState>,
    body: Option<ValidJson<DlqPurgeRequest>>,
) -> Result<Json<ApiData<DlqPurgeResponse>>, ApiError> {
    let req = body.map(|ValidJson(req)| req).unwrap_or_default();
    let purged = store::purge_dlq(&state.pool, req.ids.as_deref(), req.older_than_s)
        .await
        .map_err(map_queue_error)?;
    Ok(Json(ok(DlqPurgeResponse { purged })))
}

pub async fn runner_kick_handler(
    State(state): State<AppState>,
    body: Option<ValidJson<RunnerKickRequest>>,
) -> Result<Json<ApiData<RunSummary>>, ApiError> {
    let req = body.map(|ValidJson(req)| req).unwrap_or_default();
    let summary = state
        .runner
        .run(RunOptions {
            limit: req.limit,
            job_type: req.job_type,
        })
        .await
        .map_err(map_queue_error)?;
    Ok(Json(ok(summary)))
}

pub async fn runner_continuous_handler(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RunnerContinuousRequest>,
) -> Result<Json<ApiData<serde_json::Value>>, ApiError> {
    state
        .config
        .set_bool(flags::QUEUE_CONTINUOUS, req.enabled)
        .await
        .map_err(map_config_error)?;
    Ok(Json(ok(serde_json::json!({ "continuous": req.enabled }))))
}

pub async fn reap_handler(
    State(state): State<AppState>,
    body: Option<ValidJson<ReapRequest>>,
) -> Result<Json<ApiData<ReapResponse>>, ApiError> {
    let req = body.map(|ValidJson(req)| req).unwrap_or_default();
    let older_than_s = req
        .older_than_s
        .unwrap_or(flags::DEFAULT_REAP_OLDER_THAN_S)
        .max(1);
    let reaped = store::reap(&state.pool, older_than_s)
        .await
        .map_err(map_queue_error)?;
    Ok(Json(ok(ReapResponse { reaped })))
}

/// Reap with a much shorter threshold, for incident response.
pub async fn reap_emergency_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiData<ReapResponse>>, ApiError> {
    let reaped = store::reap(&state.pool, EMERGENCY_REAP_OLDER_THAN_S)
        .await
        .map_err(map_queue_error)?;
    Ok(Json(ok(ReapResponse { reaped })))
}

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use super::{map_config_error, map_queue_error};
use crate::config::flags;
use crate::error::ApiError;
use crate::extractors::ValidJson;
use crate::health;
use crate::state::AppState;
use crate::timeutil::format_utc;
use crate::types::{
    ApiData, GradeReport, HealthResponse, KeysRotateRequest, KeysRotateResponse, RotateTarget,
    ok,
};

pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiData<HealthResponse>>, ApiError> {
    let db_ok = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();

    let token_expires_at = state
        .config
        .get_epoch(flags::VEND_TOKEN_EXPIRES_AT)
        .await
        .map_err(map_config_error)?
        .and_then(|epoch| chrono::DateTime::from_timestamp(epoch, 0))
        .map(format_utc);

    let flag = |label: &'static str, default: bool| {
        let config = state.config.clone();
        async move { config.get_bool(label, default).await.map_err(map_config_error) }
    };

    Ok(Json(ok(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" }.to_string(),
        db_ok,
        token_expires_at,
        kill_all: flag(flags::QUEUE_KILL_ALL, false).await?,
        runner_enabled: flag(flags::QUEUE_RUNNER_ENABLED, true).await?,
        webhook_enabled: flag(flags::WEBHOOK_ENABLED, true).await?,
        fanout_enabled: flag(flags::WEBHOOK_FANOUT_ENABLED, true).await?,
        http_enabled: flag(flags::VEND_HTTP_ENABLED, true).await?,
        readonly: flag(flags::UI_READONLY, false).await?,
    })))
}

/// Plain-text metrics exposition: queue depths, ages, breaker state and
/// the vendor error rates the grader works from.
pub async fn metrics_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let metrics = health::collect_metrics(&state.pool, &state.config, state.vend.breaker())
        .await
        .map_err(map_queue_error)?;

    let mut out = String::new();
    let mut line = |name: &str, value: String| {
        out.push_str(name);
        out.push(' ');
        out.push_str(&value);
        out.push('\n');
    };

    line("vendbridge_jobs_pending", metrics.pending.to_string());
    line("vendbridge_jobs_working", metrics.working.to_string());
    line("vendbridge_jobs_done_1m", metrics.done_1m.to_string());
    line(
        "vendbridge_oldest_pending_age_seconds",
        metrics.oldest_pending_age_s.to_string(),
    );
    line(
        "vendbridge_stuck_working_15m",
        metrics.stuck_working_15m.to_string(),
    );
    line(
        "vendbridge_webhook_last_event_age_seconds",
        metrics
            .last_event_age_s
            .map_or_else(|| "-1".to_string(), |age| age.to_string()),
    );
    line(
        "vendbridge_http_rate_5xx_5m",
        format!("{:.4}", metrics.rate_5xx_5m),
    );
    line(
        "vendbridge_http_rate_429_5m",
        format!("{:.4}", metrics.rate_429_5m),
    );
    line(
        "vendbridge_breaker_tripped",
        i64::from(metrics.breaker_tripped).to_string(),
    );
    line(
        "vendbridge_vendor_config_ok",
        i64::from(metrics.vendor_config_ok).to_string(),
    );

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        out,
    )
        .into_response())
}

pub async fn watchdog_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiData<GradeReport>>, ApiError> {
    let report = health::run_watchdog(&state.pool, &state.config, state.vend.breaker())
        .await
        .map_err(map_queue_error)?;
    Ok(Json(ok(report)))
}

/// Rotates the admin bearer or webhook secret, shifting the current value
/// into its `*_prev` shadow with a bounded overlap window so in-flight
/// consumers keep working.
pub async fn keys_rotate_handler(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<KeysRotateRequest>,
) -> Result<Json<ApiData<KeysRotateResponse>>, ApiError> {
    let overlap_s = req
        .overlap_s
        .unwrap_or(flags::DEFAULT_ROTATE_OVERLAP_S)
        .clamp(0, 7 * 86_400);
    let prev_expires = Utc::now() + Duration::seconds(overlap_s);

    let generated = req.new_secret.is_none();
    let new_secret = match req.new_secret {
        Some(secret) if !secret.trim().is_empty() => secret,
        Some(_) => return Err(ApiError::invalid_input("new_secret must be non-empty")),
        None => format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()),
    };

    let (current_label, prev_label, prev_expires_label) = match req.target {
        RotateTarget::AdminBearer => (
            flags::ADMIN_BEARER_TOKEN,
            flags::ADMIN_BEARER_TOKEN_PREV,
            flags::ADMIN_BEARER_TOKEN_PREV_EXPIRES_AT,
        ),
        RotateTarget::WebhookSecret => (
            flags::WEBHOOK_SECRET,
            flags::WEBHOOK_SECRET_PREV,
            flags::WEBHOOK_SECRET_PREV_EXPIRES_AT,
        ),
    };

    let current = state
        .config
        .get(current_label)
        .await
        .map_err(map_config_error)?
        .filter(|secret| !secret.is_empty())
        .or_else(|| match req.target {
            RotateTarget::AdminBearer => state.admin_token_env.clone(),
            RotateTarget::WebhookSecret => None,
        });

    if let Some(current) = current {
        state
            .config
            .set(prev_label, &current)
            .await
            .map_err(map_config_error)?;
        state
            .config
            .set_i64(prev_expires_label, prev_expires.timestamp())
            .await
            .map_err(map_config_error)?;
    }

    state
        .config
        .set(current_label, &new_secret)
        .await
        .map_err(map_config_error)?;

    info!(target = ?req.target, overlap_s, "secret rotated");

    Ok(Json(ok(KeysRotateResponse {
        rotated: req.target,
        prev_expires_at: format_utc(prev_expires),
        new_secret: generated.then_some(new_secret),
    })))
}

use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::flags;
use crate::error::ApiError;
use crate::state::AppState;
use crate::vend::limiter::{self, RateDecision};

static OPEN_MODE_WARNED: AtomicBool = AtomicBool::new(false);

/// Admin middleware: per-route minute-bucket rate limit, then bearer
/// check against the current token or the previous one while its overlap
/// window is open. With no token configured anywhere the endpoints run
/// open for bootstrapping, loudly.
pub async fn admin_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let path = req.uri().path().to_string();
    let decision = limiter::try_acquire(
        &state.pool,
        &format!("route:{path}"),
        route_limit_per_min(&path),
    )
    .await
    .map_err(|_| ApiError::internal("rate limit store unavailable"))?;

    if let RateDecision::Denied { retry_after_s } = decision {
        return Err(ApiError::rate_limited(
            format!("too many requests to {path}"),
            retry_after_s,
        ));
    }

    let current = current_token(&state).await?;
    let Some(current) = current else {
        if !OPEN_MODE_WARNED.swap(true, Ordering::Relaxed) {
            warn!("no admin bearer token configured; admin endpoints are open");
        }
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| ApiError::unauthorized("missing or invalid Authorization header"))?;

    if constant_time_eq(current.as_bytes(), provided.as_bytes()) {
        return Ok(next.run(req).await);
    }

    if let Some(previous) = previous_token(&state).await? {
        if constant_time_eq(previous.as_bytes(), provided.as_bytes()) {
            return Ok(next.run(req).await);
        }
    }

    Err(ApiError::unauthorized("invalid token"))
}

/// Config-stored token (written by /keys.rotate) wins over the env
/// bootstrap value.
async fn current_token(state: &AppState) -> Result<Option<String>, ApiError> {
    let stored = state
        .config
        .get(flags::ADMIN_BEARER_TOKEN)
        .await
        .map_err(|_| ApiError::internal("config store unavailable"))?
        .filter(|token| !token.trim().is_empty());

    Ok(stored.or_else(|| state.admin_token_env.clone()))
}

async fn previous_token(state: &AppState) -> Result<Option<String>, ApiError> {
    let stored_prev = state
        .config
        .get(flags::ADMIN_BEARER_TOKEN_PREV)
        .await
        .map_err(|_| ApiError::internal("config store unavailable"))?
        .filter(|token| !token.trim().is_empty());
    let stored_expiry = state
        .config
        .get_epoch(flags::ADMIN_BEARER_TOKEN_PREV_EXPIRES_AT)
        .await
        .map_err(|_| ApiError::internal("config store unavailable"))?;

    let (previous, expires_at) = match stored_prev {
        Some(previous) => (Some(previous), stored_expiry),
        None => (
            state.admin_token_prev_env.clone(),
            state.admin_token_prev_expires_env,
        ),
    };

    let Some(previous) = previous else {
        return Ok(None);
    };
    let live = expires_at.is_some_and(|at| at > Utc::now().timestamp());
    Ok(live.then_some(previous))
}

fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Per-minute budgets for admin routes; read-mostly endpoints get more
/// headroom than the operational levers.
fn route_limit_per_min(path: &str) -> i64 {
    match path {
        "/job" | "/queue.status" => 1800,
        "/runner.kick" | "/webhook.test" => 600,
        _ => 300,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::bearer_token;

    #[test]
    fn bearer_extraction_is_lenient_about_case_and_whitespace() {
        assert_eq!(bearer_token("Bearer secret"), Some("secret"));
        assert_eq!(bearer_token("bearer secret"), Some("secret"));
        assert_eq!(bearer_token("BeArEr secret"), Some("secret"));
        assert_eq!(bearer_token("  Bearer secret  "), Some("secret"));
        assert_eq!(bearer_token("Basic dXNlcg=="), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("secret"), None);
    }
}

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use super::VendError;
use crate::config::{ConfigStore, flags};

#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds; a token without an expiry is treated as permanent.
    pub expires_at: Option<i64>,
}

pub async fn current(config: &ConfigStore) -> Result<Option<TokenSet>, VendError> {
    let access_token = config
        .get(flags::VEND_ACCESS_TOKEN)
        .await
        .map_err(|_| VendError::Config("config store unavailable".to_string()))?;

    let Some(access_token) = access_token.filter(|token| !token.trim().is_empty()) else {
        return Ok(None);
    };

    let refresh_token = config
        .get(flags::VEND_REFRESH_TOKEN)
        .await
        .map_err(|_| VendError::Config("config store unavailable".to_string()))?
        .filter(|token| !token.trim().is_empty());
    let expires_at = config
        .get_epoch(flags::VEND_TOKEN_EXPIRES_AT)
        .await
        .map_err(|_| VendError::Config("config store unavailable".to_string()))?;

    Ok(Some(TokenSet {
        access_token,
        refresh_token,
        expires_at,
    }))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires: Option<i64>,
}

/// Exchanges the stored refresh token for a fresh access token and writes
/// the result back to the store. A permanent token (no refresh material)
/// is returned unchanged; the caller's 401 then stands.
pub async fn refresh(
    http: &reqwest::Client,
    config: &ConfigStore,
) -> Result<TokenSet, VendError> {
    let existing = current(config)
        .await?
        .ok_or_else(|| VendError::Config("vend.access_token not configured".to_string()))?;

    let Some(refresh_token) = existing.refresh_token.clone() else {
        info!("access token has no refresh material; treating as permanent");
        return Ok(existing);
    };

    let api_base = config
        .get_string(flags::VEND_API_BASE, flags::DEFAULT_API_BASE)
        .await
        .map_err(|_| VendError::Config("config store unavailable".to_string()))?;
    let token_url = format!("{}/api/1.0/token", api_base.trim_end_matches('/'));

    let response = http
        .post(&token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ])
        .send()
        .await
        .map_err(|err| VendError::Auth(format!("token endpoint unreachable: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(VendError::Auth(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|err| VendError::Auth(format!("invalid token response: {err}")))?;

    let expires_at = parsed
        .expires
        .or_else(|| parsed.expires_in.map(|secs| Utc::now().timestamp() + secs));

    let refreshed = TokenSet {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token.or(Some(refresh_token)),
        expires_at,
    };

    persist(config, &refreshed).await;
    info!("vendor access token refreshed");
    Ok(refreshed)
}

async fn persist(config: &ConfigStore, token: &TokenSet) {
    if let Err(err) = config
        .set(flags::VEND_ACCESS_TOKEN, &token.access_token)
        .await
    {
        warn!(?err, "failed to persist refreshed access token");
    }
    if let Some(refresh_token) = token.refresh_token.as_deref() {
        if let Err(err) = config.set(flags::VEND_REFRESH_TOKEN, refresh_token).await {
            warn!(?err, "failed to persist refresh token");
        }
    }
    if let Some(expires_at) = token.expires_at {
        if let Err(err) = config
            .set_i64(flags::VEND_TOKEN_EXPIRES_AT, expires_at)
            .await
        {
            warn!(?err, "failed to persist token expiry");
        }
    }
}

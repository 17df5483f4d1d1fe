use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use reqwest::header::ACCEPT;
use tracing::{debug, warn};

use super::{CircuitBreaker, VendError, limiter};
use crate::config::{ConfigStore, flags};
use crate::vend::oauth;

pub const RATE_LIMIT_KEY: &str = "vend.http";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnRateLimit {
    /// Sleep until the next minute window opens, then retry the token.
    Wait,
    /// Fail fast with `VendError::RateLimited`.
    Fail,
}

#[derive(Debug, Clone)]
pub struct VendResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body, or the raw text wrapped in a JSON string when the
    /// vendor returns something unparseable.
    pub body: serde_json::Value,
}

/// Outbound vendor client. Every request runs the same policy pipeline:
/// kill switch, circuit breaker, rate-limit token, then a bounded retry
/// loop with 401-refresh and 429/5xx backoff.
#[derive(Clone)]
pub struct VendClient {
    http: reqwest::Client,
    config: ConfigStore,
    breaker: Arc<CircuitBreaker>,
}

impl VendClient {
    pub fn new(config: ConfigStore, breaker: Arc<CircuitBreaker>) -> Result<Self, VendError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|err| VendError::Config(format!("http client: {err}")))?;

        Ok(Self {
            http,
            config,
            breaker,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn get(&self, path: &str) -> Result<VendResponse, VendError> {
        self.request(Method::GET, path, None, None, OnRateLimit::Wait)
            .await
    }

    pub async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<VendResponse, VendError> {
        self.request(Method::POST, path, Some(body), idempotency_key, OnRateLimit::Wait)
            .await
    }

    pub async fn put(
        &self,
        path: &str,
        body: &serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<VendResponse, VendError> {
        self.request(Method::PUT, path, Some(body), idempotency_key, OnRateLimit::Wait)
            .await
    }

    pub async fn delete(
        &self,
        path: &str,
        idempotency_key: Option<&str>,
    ) -> Result<VendResponse, VendError> {
        self.request(Method::DELETE, path, None, idempotency_key, OnRateLimit::Wait)
            .await
    }

    pub async fn request(
        &self,
        method: Method,
        path_or_url: &str,
        body: Option<&serde_json::Value>,
        idempotency_key: Option<&str>,
        on_limit: OnRateLimit,
    ) -> Result<VendResponse, VendError> {
        if !self.flag(flags::VEND_HTTP_ENABLED, true).await? {
            return Err(VendError::Disabled);
        }

        self.breaker.check()?;
        self.take_rate_token(on_limit).await?;

        let url = self.resolve_url(path_or_url).await?;
        let timeout_s = self
            .config
            .get_i64(flags::VEND_TIMEOUT_S, flags::DEFAULT_TIMEOUT_S)
            .await
            .map_err(config_unavailable)?;
        let max_attempts = self
            .config
            .get_i64(flags::VEND_RETRY_ATTEMPTS, flags::DEFAULT_RETRY_ATTEMPTS)
            .await
            .map_err(config_unavailable)?
            .max(1);

        let mut token = oauth::current(&self.config)
            .await?
            .map(|set| set.access_token);
        let mut refresh_budget = 1;
        let mut attempt: i64 = 0;

        loop {
            attempt += 1;

            let mut request = self
                .http
                .request(method.clone(), &url)
                .timeout(Duration::from_secs(timeout_s.max(1) as u64))
                .header(ACCEPT, "application/json");
            if let Some(token) = token.as_deref() {
                request = request.bearer_auth(token);
            }
            if let Some(key) = idempotency_key {
                request = request.header("Idempotency-Key", key);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let started = Instant::now();
            let outcome = request.send().await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            self.observe(outcome.as_ref().ok().map(|resp| resp.status().as_u16()), elapsed_ms)
                .await;

            match outcome {
                Err(err) => {
                    self.breaker.record_failure(&self.config).await;
                    if attempt < max_attempts {
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }
                    return Err(if err.is_timeout() {
                        VendError::Timeout
                    } else {
                        VendError::Network(err.to_string())
                    });
                }
                Ok(response) => {
                    let status = response.status().as_u16();

                    if status == 401 && refresh_budget > 0 {
                        refresh_budget -= 1;
                        let refreshed = oauth::refresh(&self.http, &self.config).await?;
                        token = Some(refreshed.access_token);
                        // The replay after a refresh does not consume an
                        // attempt from the retry budget.
                        attempt -= 1;
                        continue;
                    }

                    if status == 429 || status >= 500 {
                        self.breaker.record_failure(&self.config).await;
                        if attempt < max_attempts {
                            tokio::time::sleep(retry_delay(attempt)).await;
                            continue;
                        }
                        let body = response.text().await.unwrap_or_default();
                        return Err(VendError::Status { status, body });
                    }

                    let headers = response
                        .headers()
                        .iter()
                        .filter_map(|(name, value)| {
                            value
                                .to_str()
                                .ok()
                                .map(|value| (name.to_string(), value.to_string()))
                        })
                        .collect::<BTreeMap<String, String>>();
                    let text = response
                        .text()
                        .await
                        .map_err(|err| VendError::Network(err.to_string()))?;

                    if (200..300).contains(&status) {
                        self.breaker.record_success(&self.config).await;
                    } else if status >= 400 {
                        return Err(VendError::Status { status, body: text });
                    }

                    debug!(%url, status, elapsed_ms, "vendor request finished");
                    let body = serde_json::from_str(&text)
                        .unwrap_or(serde_json::Value::String(text));
                    return Ok(VendResponse {
                        status,
                        headers,
                        body,
                    });
                }
            }
        }
    }

    async fn take_rate_token(&self, on_limit: OnRateLimit) -> Result<(), VendError> {
        let limit = self
            .config
            .get_i64(
                flags::VEND_RATE_LIMIT_PER_MIN,
                flags::DEFAULT_RATE_LIMIT_PER_MIN,
            )
            .await
            .map_err(config_unavailable)?;

        loop {
            let decision = limiter::try_acquire(self.config.pool(), RATE_LIMIT_KEY, limit)
                .await
                .map_err(|_| VendError::Config("rate limit store unavailable".to_string()))?;

            match decision {
                limiter::RateDecision::Allowed => return Ok(()),
                limiter::RateDecision::Denied { retry_after_s } => match on_limit {
                    OnRateLimit::Fail => {
                        return Err(VendError::RateLimited { retry_after_s });
                    }
                    OnRateLimit::Wait => {
                        debug!(retry_after_s, "local rate limit hit, waiting for next window");
                        tokio::time::sleep(Duration::from_secs(retry_after_s.max(1) as u64)).await;
                    }
                },
            }
        }
    }

    async fn resolve_url(&self, path_or_url: &str) -> Result<String, VendError> {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            return Ok(path_or_url.to_string());
        }
        let api_base = self
            .config
            .get_string(flags::VEND_API_BASE, flags::DEFAULT_API_BASE)
            .await
            .map_err(config_unavailable)?;
        Ok(format!(
            "{}/{}",
            api_base.trim_end_matches('/'),
            path_or_url.trim_start_matches('/')
        ))
    }

    async fn observe(&self, status: Option<u16>, elapsed_ms: u64) {
        let pool = self.config.pool();
        let keys = [
            Some(limiter::TOTAL_KEY.to_string()),
            Some(limiter::latency_bucket_key(elapsed_ms)),
            status.map(|status| limiter::status_class_key(status).to_string()),
        ];
        for key in keys.into_iter().flatten() {
            if let Err(err) = limiter::record(pool, &key).await {
                warn!(key, ?err, "failed to record http observation");
            }
        }
    }

    async fn flag(&self, label: &str, default: bool) -> Result<bool, VendError> {
        self.config
            .get_bool(label, default)
            .await
            .map_err(config_unavailable)
    }
}

fn config_unavailable<E>(_err: E) -> VendError {
    VendError::Config("config store unavailable".to_string())
}

/// `min(250ms * attempts + rand(0..250ms), 1200ms)`.
fn retry_delay(attempt: i64) -> Duration {
    let base = 250_u64.saturating_mul(attempt.max(1) as u64) + fastrand::u64(0..250);
    Duration::from_millis(base.min(1200))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::retry_delay;

    #[test]
    fn retry_delay_is_bounded() {
        for attempt in 1..10 {
            let delay = retry_delay(attempt);
            assert!(delay.as_millis() >= 250);
            assert!(delay.as_millis() <= 1200);
        }
    }
}

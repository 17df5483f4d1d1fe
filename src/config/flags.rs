//! Config labels and their defaults. All runtime switches live in the
//! `config_values` table and are read through `ConfigStore`'s typed
//! accessors; these constants are the only place label strings appear.

use crate::types::JobType;

pub const QUEUE_KILL_ALL: &str = "queue.kill_all";
pub const QUEUE_RUNNER_ENABLED: &str = "queue.runner.enabled";
pub const QUEUE_CONTINUOUS: &str = "vend.queue.continuous.enabled";
pub const QUEUE_AUTO_KICK: &str = "vend.queue.auto_kick.enabled";
pub const QUEUE_DISABLE_SINGLEFLIGHT: &str = "vend_queue_disable_singleflight";
pub const QUEUE_RUNTIME_BUSINESS_S: &str = "vend_queue_runtime_business";
pub const INVENTORY_KILL_ALL: &str = "inventory.kill_all";

pub const WEBHOOK_ENABLED: &str = "webhook.enabled";
pub const WEBHOOK_FANOUT_ENABLED: &str = "webhook.fanout.enabled";
pub const WEBHOOK_HMAC_REQUIRED: &str = "vend.webhook.hmac_required";
pub const WEBHOOK_TOLERANCE_S: &str = "vend.webhook.tolerance_s";
pub const WEBHOOK_OPEN_MODE: &str = "vend.webhook.open_mode";
pub const WEBHOOK_OPEN_MODE_UNTIL: &str = "vend.webhook.open_mode_until";
pub const WEBHOOK_SECRET: &str = "vend_webhook_secret";
pub const WEBHOOK_SECRET_PREV: &str = "vend_webhook_secret_prev";
pub const WEBHOOK_SECRET_PREV_EXPIRES_AT: &str = "vend_webhook_secret_prev_expires_at";

pub const ADMIN_BEARER_TOKEN: &str = "admin.bearer_token";
pub const ADMIN_BEARER_TOKEN_PREV: &str = "admin.bearer_token_prev";
pub const ADMIN_BEARER_TOKEN_PREV_EXPIRES_AT: &str = "admin.bearer_token_prev_expires_at";

pub const VEND_HTTP_ENABLED: &str = "vend.http.enabled";
pub const VEND_API_BASE: &str = "vend.api_base";
pub const VEND_TIMEOUT_S: &str = "vend.timeout_seconds";
pub const VEND_RETRY_ATTEMPTS: &str = "vend.retry_attempts";
pub const VEND_RATE_LIMIT_PER_MIN: &str = "vend.http.rate_limit_per_min";
pub const VEND_ACCESS_TOKEN: &str = "vend.access_token";
pub const VEND_REFRESH_TOKEN: &str = "vend.refresh_token";
pub const VEND_TOKEN_EXPIRES_AT: &str = "vend.token_expires_at";
pub const VEND_DOMAIN_PREFIX: &str = "vend.domain_prefix";

pub const CB_TRIPPED_UNTIL: &str = "vend.cb.tripped_until";
pub const CB_CONSECUTIVE_FAILURES: &str = "vend.cb.consecutive_failures";

pub const UI_READONLY: &str = "ui.readonly";
pub const UI_BANNER: &str = "ui.banner";

pub const DEFAULT_API_BASE: &str = "https://x-series-api.lightspeedhq.com";
pub const DEFAULT_TOLERANCE_S: i64 = 300;
pub const DEFAULT_RATE_LIMIT_PER_MIN: i64 = 120;
pub const DEFAULT_TIMEOUT_S: i64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: i64 = 3;
pub const DEFAULT_RUNTIME_BUSINESS_S: i64 = 120;
pub const DEFAULT_MAX_CONCURRENCY: i64 = 1;
pub const DEFAULT_MAX_ATTEMPTS: i64 = 6;
pub const DEFAULT_LEASE_TTL_S: i64 = 120;
pub const DEFAULT_HEARTBEAT_INTERVAL_S: i64 = 30;
pub const DEFAULT_REAP_OLDER_THAN_S: i64 = 900;
pub const DEFAULT_ROTATE_OVERLAP_S: i64 = 3600;

pub fn max_concurrency(ty: JobType) -> String {
    format!("vend.queue.max_concurrency.{}", ty.as_str())
}

pub fn pause(ty: JobType) -> String {
    format!("vend_queue_pause.{}", ty.as_str())
}

pub fn ui_disable(feature: &str) -> String {
    format!("ui.disable.{feature}")
}

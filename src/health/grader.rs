use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::{ConfigStore, flags};
use crate::queue::store::{self, StoreError};
use crate::timeutil::now_str;
use crate::types::{Grade, GradeReport, HealthMetrics, JobType};
use crate::vend::{CircuitBreaker, limiter};
use crate::webhook;

pub const WATCHDOG_INTERVAL_S: u64 = 60;

/// AMBER caps inventory.command fan-out at this concurrency.
const AMBER_INVENTORY_CAP: i64 = 2;

pub async fn collect_metrics(
    pool: &SqlitePool,
    config: &ConfigStore,
    breaker: &CircuitBreaker,
) -> Result<HealthMetrics, StoreError> {
    let counts = store::status_counts(pool).await?;
    let done_1m = store::done_since(pool, 60).await?;
    let stuck_working_15m = store::stuck_working(pool, 900).await?;
    let last_event_age_s = webhook::last_event_age_s(pool)
        .await
        .map_err(|err| match err {
            webhook::StoreError::Db(db) => StoreError::Db(db),
            _ => StoreError::Parse("webhook store".to_string()),
        })?;

    let total_5m = window(pool, limiter::TOTAL_KEY).await?;
    let n5xx_5m = window(pool, "vend.http.5xx").await?;
    let n429_5m = window(pool, "vend.http.429").await?;
    let rate = |n: i64| {
        if total_5m > 0 {
            n as f64 / total_5m as f64
        } else {
            0.0
        }
    };

    let http_enabled = config
        .get_bool(flags::VEND_HTTP_ENABLED, true)
        .await
        .map_err(config_store)?;
    let token_present = config
        .get(flags::VEND_ACCESS_TOKEN)
        .await
        .map_err(config_store)?
        .map(|token| !token.trim().is_empty())
        .unwrap_or(false);

    Ok(HealthMetrics {
        pending: counts.pending,
        working: counts.working,
        done_1m,
        oldest_pending_age_s: counts.oldest_pending_age_s.unwrap_or(0),
        stuck_working_15m,
        last_event_age_s,
        rate_5xx_5m: rate(n5xx_5m),
        rate_429_5m: rate(n429_5m),
        breaker_tripped: breaker.snapshot().tripped,
        vendor_config_ok: token_present || !http_enabled,
    })
}

/// RED triggers override AMBER; anything else is GREEN. The score starts
/// at 100 and loses 30 per RED reason, 10 per AMBER reason.
pub fn grade(metrics: &HealthMetrics) -> (Grade, Vec<String>, i64) {
    let mut red = Vec::new();
    let mut amber = Vec::new();

    if metrics.pending > 5000 {
        red.push("pending_gt_5000".to_string());
    }
    if metrics.oldest_pending_age_s > 1800 {
        red.push("oldest_pending_gt_1800s".to_string());
    }
    if metrics.done_1m == 0 && metrics.pending > 0 && metrics.oldest_pending_age_s > 600 {
        red.push("queue_stalled".to_string());
    }
    if metrics.rate_5xx_5m > 0.15 {
        red.push("rate_5xx_gt_15pct".to_string());
    }
    if metrics.rate_429_5m > 0.20 {
        red.push("rate_429_gt_20pct".to_string());
    }
    if metrics.last_event_age_s.is_some_and(|age| age > 900) {
        red.push("webhooks_silent_gt_900s".to_string());
    }
    if !metrics.vendor_config_ok {
        red.push("invalid_vendor_config".to_string());
    }

    if red.is_empty() {
        if metrics.pending > 1000 {
            amber.push("pending_gt_1000".to_string());
        }
        if metrics.oldest_pending_age_s > 600 {
            amber.push("oldest_pending_gt_600s".to_string());
        }
        if metrics.rate_5xx_5m > 0.05 {
            amber.push("rate_5xx_gt_5pct".to_string());
        }
        if metrics.rate_429_5m > 0.05 {
            amber.push("rate_429_gt_5pct".to_string());
        }
        if metrics.last_event_age_s.is_some_and(|age| age > 300) {
            amber.push("webhooks_silent_gt_300s".to_string());
        }
    }

    let score = (100 - 30 * red.len() as i64 - 10 * amber.len() as i64).max(0);
    if !red.is_empty() {
        (Grade::Red, red, score)
    } else if !amber.is_empty() {
        (Grade::Amber, amber, score)
    } else {
        (Grade::Green, amber, score)
    }
}

async fn apply(config: &ConfigStore, grade: Grade) -> Result<Vec<String>, StoreError> {
    let mut actions = Vec::new();
    let inventory_cap = flags::max_concurrency(JobType::InventoryCommand);

    match grade {
        Grade::Green => {
            config
                .set_bool(flags::UI_READONLY, false)
                .await
                .map_err(config_store)?;
            config
                .delete(flags::UI_BANNER)
                .await
                .map_err(config_store)?;
            config
                .set_bool(flags::QUEUE_KILL_ALL, false)
                .await
                .map_err(config_store)?;
            config
                .set_bool(flags::WEBHOOK_FANOUT_ENABLED, true)
                .await
                .map_err(config_store)?;
            config.delete(&inventory_cap).await.map_err(config_store)?;
            actions.push("cleared_degrade_flags".to_string());
        }
        Grade::Amber => {
            // Kill switches stay off at AMBER; a RED cycle may have set
            // them, so clear rather than leave them behind.
            config
                .set_bool(flags::UI_READONLY, false)
                .await
                .map_err(config_store)?;
            config
                .set_bool(flags::QUEUE_KILL_ALL, false)
                .await
                .map_err(config_store)?;
            config
                .set_bool(flags::WEBHOOK_FANOUT_ENABLED, true)
                .await
                .map_err(config_store)?;
            config
                .set(flags::UI_BANNER, "warning: queue under pressure")
                .await
                .map_err(config_store)?;
            config
                .set_i64(&inventory_cap, AMBER_INVENTORY_CAP)
                .await
                .map_err(config_store)?;
            actions.push("cleared_kill_switches".to_string());
            actions.push("set_warning_banner".to_string());
            actions.push(format!("capped_inventory_command_{AMBER_INVENTORY_CAP}"));
        }
        Grade::Red => {
            config
                .set_bool(flags::UI_READONLY, true)
                .await
                .map_err(config_store)?;
            config
                .set(flags::UI_BANNER, "danger: queue degraded, intake paused")
                .await
                .map_err(config_store)?;
            config
                .set_bool(flags::QUEUE_KILL_ALL, true)
                .await
                .map_err(config_store)?;
            config
                .set_bool(flags::WEBHOOK_FANOUT_ENABLED, false)
                .await
                .map_err(config_store)?;
            actions.push("set_readonly".to_string());
            actions.push("set_kill_all".to_string());
            actions.push("disabled_fanout".to_string());
        }
    }

    Ok(actions)
}

/// One watchdog cycle: measure, grade, apply safeguards, audit.
pub async fn run_watchdog(
    pool: &SqlitePool,
    config: &ConfigStore,
    breaker: &CircuitBreaker,
) -> Result<GradeReport, StoreError> {
    let metrics = collect_metrics(pool, config, breaker).await?;
    let (grade_value, reasons, score) = grade(&metrics);
    let actions = apply(config, grade_value).await?;

    let graded_at = now_str();
    let reasons_json = serde_json::to_string(&reasons)
        .map_err(|err| StoreError::Parse(format!("reasons: {err}")))?;
    let metrics_json = serde_json::to_string(&metrics)
        .map_err(|err| StoreError::Parse(format!("metrics: {err}")))?;
    let actions_json = serde_json::to_string(&actions)
        .map_err(|err| StoreError::Parse(format!("actions: {err}")))?;

    sqlx::query(
        r#"
        INSERT INTO health_audit (graded_at, grade, score, reasons, metrics, actions)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&graded_at)
    .bind(grade_value.as_str())
    .bind(score)
    .bind(&reasons_json)
    .bind(&metrics_json)
    .bind(&actions_json)
    .execute(pool)
    .await?;

    // Old minute buckets are useless past the grading windows.
    if let Err(err) = limiter::prune(pool, 60).await {
        warn!(?err, "failed to prune rate limit counters");
    }

    match grade_value {
        Grade::Green => info!(score, "watchdog grade GREEN"),
        Grade::Amber => warn!(score, ?reasons, "watchdog grade AMBER"),
        Grade::Red => warn!(score, ?reasons, "watchdog grade RED"),
    }

    Ok(GradeReport {
        grade: grade_value,
        score,
        reasons,
        metrics,
        actions,
        graded_at,
    })
}

async fn window(pool: &SqlitePool, key: &str) -> Result<i64, StoreError> {
    limiter::window_total(pool, key, 5)
        .await
        .map_err(|err| match err {
            crate::vend::StoreError::Db(db) => StoreError::Db(db),
        })
}

fn config_store(err: crate::config::StoreError) -> StoreError {
    match err {
        crate::config::StoreError::Db(db) => StoreError::Db(db),
    }
}

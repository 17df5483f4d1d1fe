use serde::{Deserialize, Serialize};
use specta::Type;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Grade {
    Green,
    Amber,
    Red,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Amber => "AMBER",
            Self::Red => "RED",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Type)]
pub struct HealthMetrics {
    pub pending: i64,
    pub working: i64,
    pub done_1m: i64,
    pub oldest_pending_age_s: i64,
    pub stuck_working_15m: i64,
    pub last_event_age_s: Option<i64>,
    /// Fraction of vendor responses in the last 5 minutes that were 5xx.
    pub rate_5xx_5m: f64,
    pub rate_429_5m: f64,
    pub breaker_tripped: bool,
    pub vendor_config_ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct GradeReport {
    pub grade: Grade,
    pub score: i64,
    pub reasons: Vec<String>,
    pub metrics: HealthMetrics,
    pub actions: Vec<String>,
    pub graded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct HealthResponse {
    pub status: String,
    pub db_ok: bool,
    pub token_expires_at: Option<String>,
    pub kill_all: bool,
    pub runner_enabled: bool,
    pub webhook_enabled: bool,
    pub fanout_enabled: bool,
    pub http_enabled: bool,
    pub readonly: bool,
}

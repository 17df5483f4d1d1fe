use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use specta::Type;

use super::{DlqEntry, JobType};

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct EnqueueRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub priority: Option<i64>,
    pub max_attempts: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct EnqueueResponse {
    pub job_id: i64,
    /// True when the idempotency key was already bound and the existing
    /// job id was returned without mutation.
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct QueueStatusResponse {
    pub pending: i64,
    pub working: i64,
    pub done: i64,
    pub dlq_depth: i64,
    pub oldest_pending_age_s: Option<i64>,
    pub working_by_type: BTreeMap<String, i64>,
    pub paused_types: Vec<String>,
    pub concurrency_caps: BTreeMap<String, i64>,
    pub breaker_tripped: bool,
    pub breaker_until: Option<String>,
    pub runner_enabled: bool,
    pub kill_all: bool,
    pub continuous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct PauseRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ConcurrencyUpdateRequest {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub max_concurrency: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type, Default)]
pub struct DlqRedriveRequest {
    pub ids: Option<Vec<i64>>,
    pub count: Option<i64>,
    pub delay_s: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct DlqRedriveResponse {
    pub redriven: i64,
    pub job_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type, Default)]
pub struct DlqPurgeRequest {
    pub ids: Option<Vec<i64>>,
    pub older_than_s: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct DlqPurgeResponse {
    pub purged: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct DlqListResponse {
    pub entries: Vec<DlqEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type, Default)]
pub struct ReapRequest {
    pub older_than_s: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ReapResponse {
    pub reaped: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type, Default)]
pub struct RunnerKickRequest {
    pub limit: Option<i64>,
    #[serde(rename = "type")]
    pub job_type: Option<JobType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct RunnerContinuousRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Type)]
pub struct RunSummary {
    pub claimed: i64,
    pub completed: i64,
    pub retried: i64,
    pub dead: i64,
    /// Set when the runner exited without claiming (kill switch, lock held
    /// by another instance, runner disabled).
    pub skipped: Option<String>,
    pub elapsed_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct KeysRotateRequest {
    pub target: RotateTarget,
    /// Generated server-side when absent.
    pub new_secret: Option<String>,
    pub overlap_s: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotateTarget {
    AdminBearer,
    WebhookSecret,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct KeysRotateResponse {
    pub rotated: RotateTarget,
    pub prev_expires_at: String,
    /// Only returned when the secret was generated server-side.
    pub new_secret: Option<String>,
}

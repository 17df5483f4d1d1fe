use serde::{Deserialize, Serialize};
use specta::Type;
use uuid::Uuid;

use super::WebhookEventStatus;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct WebhookAckResponse {
    pub event_id: Uuid,
    pub webhook_id: String,
    pub status: WebhookEventStatus,
    /// True when this delivery matched an already-stored webhook_id and
    /// was acknowledged without re-processing.
    pub duplicate: bool,
    pub queue_job_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type, Default)]
pub struct WebhookTestRequest {
    pub webhook_type: Option<String>,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct WebhookReplayRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct WebhookReplayResponse {
    pub replayed: Vec<ReplayedEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ReplayedEvent {
    pub source_event_id: Uuid,
    pub event_id: Uuid,
    pub queue_job_id: Option<i64>,
}

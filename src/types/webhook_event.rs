use serde::{Deserialize, Serialize};
use specta::Type;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct WebhookEvent {
    pub id: Uuid,
    /// Vendor-supplied event id; unique across all deliveries.
    pub webhook_id: String,
    pub webhook_type: String,
    pub raw_payload: String,
    pub payload: Option<serde_json::Value>,
    pub headers: BTreeMap<String, String>,
    pub source_ip: Option<String>,

    pub status: WebhookEventStatus,

    pub received_at: String,
    pub processed_at: Option<String>,
    pub processing_attempts: i64,
    pub error_message: Option<String>,

    pub queue_job_id: Option<i64>,
    pub replayed_from: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    Received,
    Processing,
    Completed,
    Failed,
    Replayed,
}

impl WebhookEventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Replayed => "replayed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "received" => Some(Self::Received),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "replayed" => Some(Self::Replayed),
            _ => None,
        }
    }
}

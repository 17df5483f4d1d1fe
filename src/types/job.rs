use serde::{Deserialize, Serialize};
use specta::Type;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct Job {
    pub id: i64,
    pub idempotency_key: Option<String>,
    pub job_type: JobType,
    pub priority: i64,
    pub payload: serde_json::Value,

    pub status: JobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,

    pub next_run_at: Option<String>,
    pub leased_until: Option<String>,
    pub leased_by: Option<String>,
    pub heartbeat_at: Option<String>,

    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Working,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Working => "working",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "working" => Some(Self::Working),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq, Hash)]
pub enum JobType {
    #[serde(rename = "create_consignment")]
    CreateConsignment,
    #[serde(rename = "update_consignment")]
    UpdateConsignment,
    #[serde(rename = "cancel_consignment")]
    CancelConsignment,
    #[serde(rename = "edit_consignment_lines")]
    EditConsignmentLines,
    #[serde(rename = "mark_transfer_partial")]
    MarkTransferPartial,
    #[serde(rename = "push_inventory_adjustment")]
    PushInventoryAdjustment,
    #[serde(rename = "push_product_update")]
    PushProductUpdate,
    #[serde(rename = "inventory.command")]
    InventoryCommand,
    #[serde(rename = "pull_products")]
    PullProducts,
    #[serde(rename = "pull_inventory")]
    PullInventory,
    #[serde(rename = "pull_consignments")]
    PullConsignments,
    #[serde(rename = "webhook.event")]
    WebhookEvent,
    #[serde(rename = "reconcile_discrepancies")]
    ReconcileDiscrepancies,
}

impl JobType {
    pub const ALL: [Self; 13] = [
        Self::CreateConsignment,
        Self::UpdateConsignment,
        Self::CancelConsignment,
        Self::EditConsignmentLines,
        Self::MarkTransferPartial,
        Self::PushInventoryAdjustment,
        Self::PushProductUpdate,
        Self::InventoryCommand,
        Self::PullProducts,
        Self::PullInventory,
        Self::PullConsignments,
        Self::WebhookEvent,
        Self::ReconcileDiscrepancies,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateConsignment => "create_consignment",
            Self::UpdateConsignment => "update_consignment",
            Self::CancelConsignment => "cancel_consignment",
            Self::EditConsignmentLines => "edit_consignment_lines",
            Self::MarkTransferPartial => "mark_transfer_partial",
            Self::PushInventoryAdjustment => "push_inventory_adjustment",
            Self::PushProductUpdate => "push_product_update",
            Self::InventoryCommand => "inventory.command",
            Self::PullProducts => "pull_products",
            Self::PullInventory => "pull_inventory",
            Self::PullConsignments => "pull_consignments",
            Self::WebhookEvent => "webhook.event",
            Self::ReconcileDiscrepancies => "reconcile_discrepancies",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.as_str() == value)
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct JobLog {
    pub id: i64,
    pub job_id: i64,
    pub level: String,
    pub message: String,
    pub correlation_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct DlqEntry {
    pub id: i64,
    pub job_id: i64,
    pub idempotency_key: Option<String>,
    pub job_type: JobType,
    pub priority: i64,
    pub payload: serde_json::Value,
    pub attempts: i64,
    pub max_attempts: i64,
    pub fail_code: String,
    pub fail_message: String,
    pub created_at: String,
    pub moved_at: String,
}

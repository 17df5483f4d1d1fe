pub mod api_error;
pub mod health;
pub mod job;
pub mod queue_api;
pub mod webhook_api;
pub mod webhook_event;

#[allow(unused_imports)]
pub use api_error::{ApiErrorBody, ApiErrorCode, ApiErrorResponse};
#[allow(unused_imports)]
pub use health::{Grade, GradeReport, HealthMetrics, HealthResponse};
#[allow(unused_imports)]
pub use job::{DlqEntry, Job, JobLog, JobStatus, JobType};
#[allow(unused_imports)]
pub use queue_api::{
    ConcurrencyUpdateRequest, DlqListResponse, DlqPurgeRequest, DlqPurgeResponse,
    DlqRedriveRequest, DlqRedriveResponse, EnqueueRequest, EnqueueResponse, KeysRotateRequest,
    KeysRotateResponse, PauseRequest, QueueStatusResponse, ReapRequest, ReapResponse,
    RotateTarget, RunSummary, RunnerContinuousRequest, RunnerKickRequest,
};
#[allow(unused_imports)]
pub use webhook_api::{
    ReplayedEvent, WebhookAckResponse, WebhookReplayRequest, WebhookReplayResponse,
    WebhookTestRequest,
};
#[allow(unused_imports)]
pub use webhook_event::{WebhookEvent, WebhookEventStatus};

use serde::Serialize;
use specta::Type;

/// Success half of the `{ok, data?, error?}` response envelope.
#[derive(Debug, Clone, Serialize, Type)]
pub struct ApiData<T> {
    pub ok: bool,
    pub data: T,
}

pub fn ok<T>(data: T) -> ApiData<T> {
    ApiData { ok: true, data }
}

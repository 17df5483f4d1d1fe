pub mod consignment;
pub mod fanout;
pub mod inventory;
pub mod pull;

use serde::de::DeserializeOwned;
use sqlx::SqlitePool;

use crate::config::ConfigStore;
use crate::types::{Job, JobType};
use crate::vend::{ErrorClass, VendClient, VendError, VendResponse};

pub struct JobContext<'a> {
    pub pool: &'a SqlitePool,
    pub config: &'a ConfigStore,
    pub vend: &'a VendClient,
    pub job: &'a Job,
}

/// Classified handler failure; the runner maps these onto the retry/DLQ
/// decision.
#[derive(Debug)]
pub enum JobError {
    Retry { code: String, message: String },
    Dead { code: String, message: String },
}

impl JobError {
    pub fn retry(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Retry {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn dead(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dead {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::dead("validation", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::retry("internal", message)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dead { .. })
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Retry { code, .. } | Self::Dead { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retry { message, .. } | Self::Dead { message, .. } => message,
        }
    }

    fn from_vend(err: &VendError) -> Self {
        match err.class() {
            // Duplicate is coerced to success by vendor_call(); one that
            // escapes here falls back to a retry.
            ErrorClass::Transient | ErrorClass::Duplicate => {
                Self::retry(err.code(), err.to_string())
            }
            ErrorClass::Fatal => Self::dead(err.code(), err.to_string()),
        }
    }
}

/// Folds the vendor's 409 replay detection into success: `Ok(None)` means
/// the vendor already saw this operation.
pub fn vendor_call(
    result: Result<VendResponse, VendError>,
) -> Result<Option<VendResponse>, JobError> {
    match result {
        Ok(response) => Ok(Some(response)),
        Err(err) if err.class() == ErrorClass::Duplicate => Ok(None),
        Err(err) => Err(JobError::from_vend(&err)),
    }
}

pub fn decode_payload<T: DeserializeOwned>(job: &Job) -> Result<T, JobError> {
    serde_json::from_value(job.payload.clone())
        .map_err(|err| JobError::validation(format!("payload rejected: {err}")))
}

/// Routes a claimed job to its type handler.
pub async fn dispatch(ctx: &JobContext<'_>) -> Result<(), JobError> {
    match ctx.job.job_type {
        JobType::CreateConsignment => consignment::create(ctx).await,
        JobType::UpdateConsignment => consignment::update(ctx).await,
        JobType::CancelConsignment => consignment::cancel(ctx).await,
        JobType::EditConsignmentLines => consignment::edit_lines(ctx).await,
        JobType::MarkTransferPartial => consignment::mark_transfer_partial(ctx).await,
        JobType::ReconcileDiscrepancies => consignment::reconcile_discrepancies(ctx).await,
        JobType::PushInventoryAdjustment => inventory::push_adjustment(ctx).await,
        JobType::PushProductUpdate => inventory::push_product_update(ctx).await,
        JobType::InventoryCommand => inventory::command(ctx).await,
        JobType::PullProducts => pull::run(ctx, pull::Entity::Products).await,
        JobType::PullInventory => pull::run(ctx, pull::Entity::Inventory).await,
        JobType::PullConsignments => pull::run(ctx, pull::Entity::Consignments).await,
        JobType::WebhookEvent => fanout::run(ctx).await,
    }
}

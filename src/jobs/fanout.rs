use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{JobContext, JobError, decode_payload};
use crate::config::flags;
use crate::queue::store::{EnqueueParams, append_log, enqueue};
use crate::types::JobType;
use crate::webhook;

#[derive(Debug, Deserialize)]
struct FanoutPayload {
    webhook_id: String,
    webhook_type: String,
}

/// Maps an inbound event type to the downstream job it spawns. One event
/// produces at most one job.
pub fn route(webhook_type: &str) -> Option<JobType> {
    match webhook_type {
        "inventory.update" => Some(JobType::PullInventory),
        "product.update" => Some(JobType::PullProducts),
        "consignment.send" | "consignment.receive" | "consignment.update" => {
            Some(JobType::PullConsignments)
        }
        _ => None,
    }
}

/// Turns a stored webhook event into its downstream job and closes out the
/// event row.
pub async fn run(ctx: &JobContext<'_>) -> Result<(), JobError> {
    let payload: FanoutPayload = decode_payload(ctx.job)?;

    let event = webhook::get_event_by_webhook_id(ctx.pool, &payload.webhook_id)
        .await
        .map_err(|_| {
            JobError::dead(
                "validation",
                format!("webhook event {} not found", payload.webhook_id),
            )
        })?;

    let downstream = route(&payload.webhook_type);
    match downstream {
        Some(job_type) => {
            let key = format!("webhook:{}:{}", payload.webhook_id, job_type.as_str());
            let outcome = match enqueue(
                ctx.pool,
                &EnqueueParams {
                    job_type,
                    payload: &json!({}),
                    idempotency_key: Some(&key),
                    priority: 5,
                    max_attempts: flags::DEFAULT_MAX_ATTEMPTS,
                },
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    let _ = webhook::mark_event_failed(
                        ctx.pool,
                        event.id,
                        "fanout enqueue failed",
                    )
                    .await;
                    return Err(JobError::internal("failed to enqueue downstream job"));
                }
            };

            append_log(
                ctx.pool,
                ctx.job.id,
                "info",
                &json!({
                    "event": "webhook.fanout",
                    "webhook_id": payload.webhook_id,
                    "webhook_type": payload.webhook_type,
                    "downstream_type": job_type.as_str(),
                    "downstream_job_id": outcome.job_id,
                    "deduplicated": outcome.deduplicated,
                }),
                None,
            )
            .await
            .map_err(|_| JobError::internal("failed to append job log"))?;
        }
        None => {
            info!(
                webhook_type = %payload.webhook_type,
                webhook_id = %payload.webhook_id,
                "no downstream route for webhook type"
            );
        }
    }

    webhook::mark_event_completed(ctx.pool, event.id)
        .await
        .map_err(|_| JobError::internal("failed to mark event completed"))?;

    Ok(())
}

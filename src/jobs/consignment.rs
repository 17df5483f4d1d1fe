use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{JobContext, JobError, decode_payload, vendor_call};
use crate::queue::store::append_log;
use crate::timeutil::now_str;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsignmentLine {
    pub product_id: String,
    pub count: f64,
}

#[derive(Debug, Deserialize)]
struct CreatePayload {
    transfer_pk: String,
    source_outlet_id: String,
    dest_outlet_id: String,
    lines: Vec<ConsignmentLine>,
    idempotency_key: Option<String>,
}

/// Creates a vendor consignment for a stock transfer and records the
/// vendor id against the transfer.
pub async fn create(ctx: &JobContext<'_>) -> Result<(), JobError> {
    let payload: CreatePayload = decode_payload(ctx.job)?;
    if payload.lines.is_empty() {
        return Err(JobError::validation("transfer has no lines"));
    }

    let body = json!({
        "type": "OUTLET",
        "outlet_id": payload.dest_outlet_id,
        "source_outlet_id": payload.source_outlet_id,
        "products": payload.lines,
        "reference": payload.transfer_pk,
    });
    let idempotency_key = payload
        .idempotency_key
        .clone()
        .or_else(|| ctx.job.idempotency_key.clone());

    let response = vendor_call(
        ctx.vend
            .post("api/2.0/consignments", &body, idempotency_key.as_deref())
            .await,
    )?;

    match response {
        Some(response) => {
            let consignment_id = extract_id(&response.body).ok_or_else(|| {
                JobError::retry("transient_vendor", "consignment response missing id")
            })?;
            link_transfer(ctx, &payload.transfer_pk, Some(consignment_id.as_str())).await?;
            append_log(
                ctx.pool,
                ctx.job.id,
                "info",
                &json!({
                    "event": "consignment.created",
                    "transfer_pk": payload.transfer_pk,
                    "consignment_id": consignment_id,
                }),
                None,
            )
            .await
            .map_err(|_| JobError::internal("failed to append job log"))?;
        }
        None => {
            info!(
                transfer_pk = %payload.transfer_pk,
                "vendor reported duplicate consignment create"
            );
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct UpdatePayload {
    consignment_id: String,
    status: String,
    #[serde(default)]
    lines: Vec<ConsignmentLine>,
}

/// Transitions a consignment (SENT/RECEIVED) or rewrites its lines. A 409
/// from the vendor means the transition already happened.
pub async fn update(ctx: &JobContext<'_>) -> Result<(), JobError> {
    let payload: UpdatePayload = decode_payload(ctx.job)?;

    let mut body = json!({ "status": payload.status });
    if !payload.lines.is_empty() {
        body["products"] = json!(payload.lines);
    }

    let path = format!("api/2.0/consignments/{}", payload.consignment_id);
    vendor_call(
        ctx.vend
            .put(&path, &body, ctx.job.idempotency_key.as_deref())
            .await,
    )?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CancelPayload {
    consignment_id: String,
}

pub async fn cancel(ctx: &JobContext<'_>) -> Result<(), JobError> {
    let payload: CancelPayload = decode_payload(ctx.job)?;
    let path = format!("api/2.0/consignments/{}", payload.consignment_id);
    vendor_call(
        ctx.vend
            .delete(&path, ctx.job.idempotency_key.as_deref())
            .await,
    )?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct EditLinesPayload {
    consignment_id: String,
    #[serde(default)]
    add: Vec<ConsignmentLine>,
    #[serde(default)]
    remove: Vec<LineRef>,
}

#[derive(Debug, Deserialize)]
struct LineRef {
    product_id: String,
}

/// Adds and removes consignment lines one vendor call per line, each with
/// its own idempotency key so a retried job skips the lines the vendor
/// already applied.
pub async fn edit_lines(ctx: &JobContext<'_>) -> Result<(), JobError> {
    let payload: EditLinesPayload = decode_payload(ctx.job)?;
    let base_key = ctx
        .job
        .idempotency_key
        .clone()
        .unwrap_or_else(|| format!("job:{}", ctx.job.id));

    for line in &payload.add {
        let path = format!("api/2.0/consignments/{}/products", payload.consignment_id);
        let key = format!("{base_key}:add:{}", line.product_id);
        vendor_call(ctx.vend.post(&path, &json!(line), Some(&key)).await)?;
    }

    for line in &payload.remove {
        let path = format!(
            "api/2.0/consignments/{}/products/{}",
            payload.consignment_id, line.product_id
        );
        let key = format!("{base_key}:remove:{}", line.product_id);
        vendor_call(ctx.vend.delete(&path, Some(&key)).await)?;
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct MarkPartialPayload {
    transfer_pk: String,
    outstanding_lines: Vec<ConsignmentLine>,
    #[serde(default)]
    sync_vendor: bool,
}

/// Records the lines still outstanding on a transfer; optionally tells the
/// vendor the consignment was only partially received.
pub async fn mark_transfer_partial(ctx: &JobContext<'_>) -> Result<(), JobError> {
    let payload: MarkPartialPayload = decode_payload(ctx.job)?;

    let outstanding = serde_json::to_string(&payload.outstanding_lines)
        .map_err(|err| JobError::validation(format!("outstanding_lines: {err}")))?;
    sqlx::query(
        r#"
        INSERT INTO transfer_links (transfer_pk, outstanding_lines, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(transfer_pk) DO UPDATE SET
            outstanding_lines = excluded.outstanding_lines,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&payload.transfer_pk)
    .bind(&outstanding)
    .bind(now_str())
    .execute(ctx.pool)
    .await
    .map_err(|err| JobError::internal(format!("transfer_links update: {err}")))?;

    if payload.sync_vendor {
        if let Some(consignment_id) = linked_consignment(ctx, &payload.transfer_pk).await? {
            let path = format!("api/2.0/consignments/{consignment_id}");
            let body = json!({ "status": "RECEIVED_PARTIAL" });
            vendor_call(
                ctx.vend
                    .put(&path, &body, ctx.job.idempotency_key.as_deref())
                    .await,
            )?;
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct ReconcilePayload {
    transfer_pk: String,
    #[serde(default = "default_strategy")]
    strategy: String,
}

fn default_strategy() -> String {
    "report".to_string()
}

/// Offline reconciliation over the recorded outstanding lines; writes its
/// findings to the job log and never calls the vendor.
pub async fn reconcile_discrepancies(ctx: &JobContext<'_>) -> Result<(), JobError> {
    let payload: ReconcilePayload = decode_payload(ctx.job)?;

    let outstanding: Option<String> = sqlx::query_scalar(
        "SELECT outstanding_lines FROM transfer_links WHERE transfer_pk = ?",
    )
    .bind(&payload.transfer_pk)
    .fetch_optional(ctx.pool)
    .await
    .map_err(|err| JobError::internal(format!("transfer_links read: {err}")))?
    .flatten();

    let lines: Vec<ConsignmentLine> = match outstanding.as_deref() {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| JobError::validation(format!("stored outstanding_lines: {err}")))?,
        None => Vec::new(),
    };
    let outstanding_total: f64 = lines.iter().map(|line| line.count).sum();

    append_log(
        ctx.pool,
        ctx.job.id,
        "info",
        &json!({
            "event": "reconcile.result",
            "transfer_pk": payload.transfer_pk,
            "strategy": payload.strategy,
            "outstanding_lines": lines.len(),
            "outstanding_total": outstanding_total,
        }),
        None,
    )
    .await
    .map_err(|_| JobError::internal("failed to append job log"))?;

    Ok(())
}

async fn link_transfer(
    ctx: &JobContext<'_>,
    transfer_pk: &str,
    consignment_id: Option<&str>,
) -> Result<(), JobError> {
    sqlx::query(
        r#"
        INSERT INTO transfer_links (transfer_pk, consignment_id, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(transfer_pk) DO UPDATE SET
            consignment_id = excluded.consignment_id,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(transfer_pk)
    .bind(consignment_id)
    .bind(now_str())
    .execute(ctx.pool)
    .await
    .map_err(|err| JobError::internal(format!("transfer_links update: {err}")))?;
    Ok(())
}

async fn linked_consignment(
    ctx: &JobContext<'_>,
    transfer_pk: &str,
) -> Result<Option<String>, JobError> {
    let consignment_id: Option<Option<String>> = sqlx::query_scalar(
        "SELECT consignment_id FROM transfer_links WHERE transfer_pk = ?",
    )
    .bind(transfer_pk)
    .fetch_optional(ctx.pool)
    .await
    .map_err(|err| JobError::internal(format!("transfer_links read: {err}")))?;
    Ok(consignment_id.flatten())
}

pub(super) fn extract_id(body: &serde_json::Value) -> Option<String> {
    body.get("data")
        .and_then(|data| data.get("id"))
        .or_else(|| body.get("id"))
        .and_then(|id| match id {
            serde_json::Value::String(id) => Some(id.clone()),
            serde_json::Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
}

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{JobContext, JobError, decode_payload, vendor_call};
use crate::config::flags;
use crate::queue::store::append_log;

/// Read-back verification polls once a second inside this window.
const VERIFY_MAX_ATTEMPTS: u32 = 10;
const VERIFY_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct AdjustmentPayload {
    product_id: String,
    outlet_id: serde_json::Value,
    count: f64,
    #[serde(default)]
    note: Option<String>,
}

/// Adjusts on-hand by a delta; the vendor deduplicates via the forwarded
/// idempotency key.
pub async fn push_adjustment(ctx: &JobContext<'_>) -> Result<(), JobError> {
    let payload: AdjustmentPayload = decode_payload(ctx.job)?;

    let body = json!({
        "product_id": payload.product_id,
        "outlet_id": payload.outlet_id,
        "count": payload.count,
        "note": payload.note,
    });
    vendor_call(
        ctx.vend
            .post("api/2.0/inventory", &body, ctx.job.idempotency_key.as_deref())
            .await,
    )?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProductUpdatePayload {
    product_id: String,
    data: serde_json::Value,
}

pub async fn push_product_update(ctx: &JobContext<'_>) -> Result<(), JobError> {
    let payload: ProductUpdatePayload = decode_payload(ctx.job)?;
    if !payload.data.is_object() {
        return Err(JobError::validation("data must be an object"));
    }

    let path = format!("api/2.0/products/{}", payload.product_id);
    vendor_call(
        ctx.vend
            .put(&path, &payload.data, ctx.job.idempotency_key.as_deref())
            .await,
    )?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CommandPayload {
    op: String,
    product_id: String,
    outlet_id: serde_json::Value,
    target: i64,
    #[serde(default)]
    trace_id: Option<String>,
}

/// Sets on-hand to an absolute target and verifies the vendor observed it
/// by polling the read-back endpoint.
pub async fn command(ctx: &JobContext<'_>) -> Result<(), JobError> {
    if ctx
        .config
        .get_bool(flags::INVENTORY_KILL_ALL, false)
        .await
        .map_err(|_| JobError::internal("config store unavailable"))?
    {
        append_log(
            ctx.pool,
            ctx.job.id,
            "warn",
            &json!({ "event": "inventory.command.skipped", "reason": "inventory.kill_all" }),
            None,
        )
        .await
        .map_err(|_| JobError::internal("failed to append job log"))?;
        return Ok(());
    }

    let payload: CommandPayload = decode_payload(ctx.job)?;
    if payload.op != "set" {
        return Err(JobError::validation(format!(
            "unsupported op: {}",
            payload.op
        )));
    }

    let body = json!({
        "product_id": payload.product_id,
        "outlet_id": payload.outlet_id,
        "on_hand": payload.target,
    });
    vendor_call(
        ctx.vend
            .put("api/2.0/inventory", &body, ctx.job.idempotency_key.as_deref())
            .await,
    )?;

    let outlet = id_text(&payload.outlet_id);
    let read_back = format!(
        "api/2.0/inventory?product_id={}&outlet_id={}",
        payload.product_id, outlet
    );

    let mut attempts = 0;
    let mut observed: Option<i64> = None;
    let mut verified = false;

    while attempts < VERIFY_MAX_ATTEMPTS {
        attempts += 1;
        let response = vendor_call(ctx.vend.get(&read_back).await)?;
        observed = response.as_ref().and_then(|resp| read_on_hand(&resp.body));

        if observed == Some(payload.target) {
            verified = true;
            break;
        }
        tokio::time::sleep(VERIFY_POLL_INTERVAL).await;
    }

    append_log(
        ctx.pool,
        ctx.job.id,
        if verified { "info" } else { "warn" },
        &json!({
            "event": "inventory.command.verify",
            "expected": payload.target,
            "observed": observed,
            "attempts": attempts,
            "verified": verified,
        }),
        payload.trace_id.as_deref(),
    )
    .await
    .map_err(|_| JobError::internal("failed to append job log"))?;

    if !verified {
        return Err(JobError::retry(
            "verify_failed",
            format!(
                "observed {observed:?} after {attempts} read-backs, expected {}",
                payload.target
            ),
        ));
    }

    info!(
        job_id = ctx.job.id,
        product_id = %payload.product_id,
        target = payload.target,
        attempts,
        "inventory command verified"
    );
    Ok(())
}

fn id_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(id) => id.clone(),
        other => other.to_string(),
    }
}

/// Pulls the observed on-hand count out of the read-back response; the
/// vendor nests it either as `data[0].inventory_level` or `data[0].on_hand`.
fn read_on_hand(body: &serde_json::Value) -> Option<i64> {
    let record = match body.get("data") {
        Some(serde_json::Value::Array(items)) => items.first()?,
        Some(other) => other,
        None => body,
    };
    record
        .get("inventory_level")
        .or_else(|| record.get("on_hand"))
        .and_then(|count| {
            count
                .as_i64()
                .or_else(|| count.as_f64().map(|count| count.round() as i64))
                .or_else(|| count.as_str().and_then(|raw| raw.parse::<i64>().ok()))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::read_on_hand;
    use serde_json::json;

    #[test]
    fn reads_on_hand_from_vendor_shapes() {
        assert_eq!(
            read_on_hand(&json!({"data": [{"inventory_level": 7}]})),
            Some(7)
        );
        assert_eq!(read_on_hand(&json!({"data": [{"on_hand": "3"}]})), Some(3));
        assert_eq!(read_on_hand(&json!({"data": [{"on_hand": 2.0}]})), Some(2));
        assert_eq!(read_on_hand(&json!({"data": []})), None);
    }
}

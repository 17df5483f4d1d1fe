use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;

use super::{JobContext, JobError, decode_payload, vendor_call};
use crate::queue::store::append_log;
use crate::timeutil::now_str;

pub const PAGE_SIZE: i64 = 200;

/// Upper bound on pages consumed by a single pull job; anything left is
/// picked up from the advanced cursor by the next run.
const MAX_PAGES: i64 = 50;

#[derive(Debug, Clone, Copy)]
pub enum Entity {
    Products,
    Inventory,
    Consignments,
}

impl Entity {
    fn cursor_name(self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Inventory => "inventory",
            Self::Consignments => "consignments",
        }
    }

    fn path(self) -> &'static str {
        match self {
            Self::Products => "api/2.0/products",
            Self::Inventory => "api/2.0/inventory",
            Self::Consignments => "api/2.0/consignments",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PullPayload {
    #[serde(default)]
    cursor: Option<String>,
}

/// Pages through the vendor's versioned listing, advancing the stored
/// cursor after each successfully consumed page.
pub async fn run(ctx: &JobContext<'_>, entity: Entity) -> Result<(), JobError> {
    let payload: PullPayload = decode_payload(ctx.job)?;

    let mut cursor = match payload.cursor {
        Some(cursor) => cursor,
        None => get_cursor(ctx.pool, entity.cursor_name())
            .await?
            .unwrap_or_else(|| "0".to_string()),
    };

    let mut pages = 0;
    let mut total = 0_usize;

    while pages < MAX_PAGES {
        pages += 1;
        let path = format!(
            "{}?after={}&page_size={}",
            entity.path(),
            cursor,
            PAGE_SIZE
        );
        let Some(response) = vendor_call(ctx.vend.get(&path).await)? else {
            break;
        };

        let items = response
            .body
            .get("data")
            .and_then(|data| data.as_array())
            .cloned()
            .unwrap_or_default();
        let next_cursor = response
            .body
            .get("version")
            .and_then(|version| version.get("max"))
            .map(version_text);

        if items.is_empty() {
            break;
        }
        total += items.len();

        append_log(
            ctx.pool,
            ctx.job.id,
            "info",
            &json!({
                "event": "pull.page",
                "entity": entity.cursor_name(),
                "count": items.len(),
                "cursor": cursor,
            }),
            None,
        )
        .await
        .map_err(|_| JobError::internal("failed to append job log"))?;

        let Some(next_cursor) = next_cursor.filter(|next| *next != cursor) else {
            break;
        };
        cursor = next_cursor;
        set_cursor(ctx.pool, entity.cursor_name(), &cursor).await?;

        if items.len() < PAGE_SIZE as usize {
            break;
        }
    }

    append_log(
        ctx.pool,
        ctx.job.id,
        "info",
        &json!({
            "event": "pull.finished",
            "entity": entity.cursor_name(),
            "pages": pages,
            "items": total,
            "cursor": cursor,
        }),
        None,
    )
    .await
    .map_err(|_| JobError::internal("failed to append job log"))?;

    Ok(())
}

fn version_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(version) => version.clone(),
        other => other.to_string(),
    }
}

pub async fn get_cursor(pool: &SqlitePool, entity: &str) -> Result<Option<String>, JobError> {
    sqlx::query_scalar("SELECT cursor FROM sync_cursors WHERE entity = ?")
        .bind(entity)
        .fetch_optional(pool)
        .await
        .map_err(|err| JobError::internal(format!("sync_cursors read: {err}")))
}

pub async fn set_cursor(pool: &SqlitePool, entity: &str, cursor: &str) -> Result<(), JobError> {
    sqlx::query(
        r#"
        INSERT INTO sync_cursors (entity, cursor, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(entity) DO UPDATE SET
            cursor = excluded.cursor,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(entity)
    .bind(cursor)
    .bind(now_str())
    .execute(pool)
    .await
    .map_err(|err| JobError::internal(format!("sync_cursors write: {err}")))?;
    Ok(())
}

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::fs;
use std::sync::Arc;

use sqlx::{
    Connection, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tempfile::NamedTempFile;
use vendbridge::config::{ConfigStore, flags};
use vendbridge::queue::{RUNNER_LOCK, RunOptions, Runner, lock, store};
use vendbridge::types::JobType;
use vendbridge::vend::{CircuitBreaker, VendClient};

struct TestEnv {
    pool: SqlitePool,
    config: ConfigStore,
    runner: Runner,
    _db_file: NamedTempFile,
}

async fn setup_env() -> TestEnv {
    let db_file = NamedTempFile::new().expect("create temp sqlite file");
    let options = SqliteConnectOptions::new()
        .filename(db_file.path())
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_millis(500));

    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .expect("connect sqlite for migrations");
    run_migrations_on_conn(&mut conn)
        .await
        .expect("run migrations");
    conn.close().await.expect("close migration conn");

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .expect("connect sqlite file");

    let config = ConfigStore::uncached(pool.clone());
    let breaker = Arc::new(CircuitBreaker::load(&config).await);
    let vend = VendClient::new(config.clone(), breaker).expect("vend client");
    let runner = Runner::new(
        pool.clone(),
        config.clone(),
        vend,
        "test-runner".to_string(),
    );

    TestEnv {
        pool,
        config,
        runner,
        _db_file: db_file,
    }
}

async fn run_migrations_on_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    let mut entries: Vec<_> = fs::read_dir("migrations")
        .map_err(sqlx::Error::Io)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("sql"))
        .collect();

    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let contents = fs::read_to_string(entry.path()).map_err(sqlx::Error::Io)?;
        for statement in contents.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&mut *conn).await?;
        }
    }

    Ok(())
}

async fn enqueue_reconcile(pool: &SqlitePool, key: &str) -> i64 {
    store::enqueue(
        pool,
        &store::EnqueueParams {
            job_type: JobType::ReconcileDiscrepancies,
            payload: &serde_json::json!({ "transfer_pk": key, "strategy": "report" }),
            idempotency_key: Some(key),
            priority: 5,
            max_attempts: 6,
        },
    )
    .await
    .expect("enqueue")
    .job_id
}

#[tokio::test]
async fn kill_all_stops_the_runner_before_claiming() {
    let env = setup_env().await;
    enqueue_reconcile(&env.pool, "k-1").await;

    env.config
        .set_bool(flags::QUEUE_KILL_ALL, true)
        .await
        .expect("set kill_all");

    let summary = env
        .runner
        .run(RunOptions::default())
        .await
        .expect("run");
    assert_eq!(summary.skipped.as_deref(), Some("queue.kill_all"));
    assert_eq!(summary.claimed, 0);

    let status: String = sqlx::query_scalar("SELECT status FROM jobs LIMIT 1")
        .fetch_one(&env.pool)
        .await
        .expect("status");
    assert_eq!(status, "pending", "nothing may be claimed under kill_all");
}

#[tokio::test]
async fn disabled_runner_exits_without_claiming() {
    let env = setup_env().await;
    enqueue_reconcile(&env.pool, "k-1").await;

    env.config
        .set_bool(flags::QUEUE_RUNNER_ENABLED, false)
        .await
        .expect("disable runner");

    let summary = env
        .runner
        .run(RunOptions::default())
        .await
        .expect("run");
    assert_eq!(summary.skipped.as_deref(), Some("runner_disabled"));
}

#[tokio::test]
async fn singleflight_yields_when_lock_held_elsewhere() {
    let env = setup_env().await;
    enqueue_reconcile(&env.pool, "k-1").await;

    assert!(
        lock::acquire(&env.pool, RUNNER_LOCK, "other-instance", 300)
            .await
            .expect("acquire lock")
    );

    let summary = env
        .runner
        .run(RunOptions::default())
        .await
        .expect("run");
    assert_eq!(summary.skipped.as_deref(), Some("singleflight"));

    // disabling singleflight lets the burst through despite the lock
    env.config
        .set_bool(flags::QUEUE_DISABLE_SINGLEFLIGHT, true)
        .await
        .expect("disable singleflight");
    let summary = env
        .runner
        .run(RunOptions::default())
        .await
        .expect("run unlocked");
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.completed, 1);
}

#[tokio::test]
async fn expired_lock_is_reclaimed() {
    let env = setup_env().await;
    enqueue_reconcile(&env.pool, "k-1").await;

    assert!(
        lock::acquire(&env.pool, RUNNER_LOCK, "dead-instance", 1)
            .await
            .expect("acquire lock")
    );
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let summary = env
        .runner
        .run(RunOptions::default())
        .await
        .expect("run");
    assert!(summary.skipped.is_none(), "expired lock must not block");
    assert_eq!(summary.completed, 1);
}

#[tokio::test]
async fn paused_type_is_excluded_from_claims() {
    let env = setup_env().await;
    enqueue_reconcile(&env.pool, "k-1").await;

    env.config
        .set_bool(&flags::pause(JobType::ReconcileDiscrepancies), true)
        .await
        .expect("pause type");

    let summary = env
        .runner
        .run(RunOptions::default())
        .await
        .expect("run");
    assert_eq!(summary.claimed, 0);

    let status: String = sqlx::query_scalar("SELECT status FROM jobs LIMIT 1")
        .fetch_one(&env.pool)
        .await
        .expect("status");
    assert_eq!(status, "pending");

    env.config
        .delete(&flags::pause(JobType::ReconcileDiscrepancies))
        .await
        .expect("resume type");
    let summary = env
        .runner
        .run(RunOptions::default())
        .await
        .expect("run resumed");
    assert_eq!(summary.completed, 1);
}

#[tokio::test]
async fn runner_drains_the_backlog_within_one_burst() {
    let env = setup_env().await;
    for n in 0..3 {
        enqueue_reconcile(&env.pool, &format!("k-{n}")).await;
    }

    let summary = env
        .runner
        .run(RunOptions::default())
        .await
        .expect("run");
    assert_eq!(summary.claimed, 3);
    assert_eq!(summary.completed, 3);

    let done: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'done'")
        .fetch_one(&env.pool)
        .await
        .expect("done count");
    assert_eq!(done, 3);
}

#[tokio::test]
async fn limit_bounds_a_burst() {
    let env = setup_env().await;
    for n in 0..3 {
        enqueue_reconcile(&env.pool, &format!("k-{n}")).await;
    }

    let summary = env
        .runner
        .run(RunOptions {
            limit: Some(2),
            job_type: None,
        })
        .await
        .expect("run");
    assert_eq!(summary.claimed, 2);

    let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'pending'")
        .fetch_one(&env.pool)
        .await
        .expect("pending count");
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn outbound_kill_switch_sends_vendor_jobs_to_dlq() {
    let env = setup_env().await;

    env.config
        .set_bool(flags::VEND_HTTP_ENABLED, false)
        .await
        .expect("disable outbound http");

    let id = store::enqueue(
        &env.pool,
        &store::EnqueueParams {
            job_type: JobType::PushInventoryAdjustment,
            payload: &serde_json::json!({ "product_id": "p1", "outlet_id": 1, "count": 2.0 }),
            idempotency_key: Some("adj-1"),
            priority: 5,
            max_attempts: 6,
        },
    )
    .await
    .expect("enqueue")
    .job_id;

    let summary = env
        .runner
        .run(RunOptions::default())
        .await
        .expect("run");
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.dead, 1);

    let fail_code: String = sqlx::query_scalar("SELECT fail_code FROM job_dlq WHERE job_id = ?")
        .bind(id)
        .fetch_one(&env.pool)
        .await
        .expect("dlq row");
    assert_eq!(fail_code, "http_disabled");
}

#[tokio::test]
async fn inventory_kill_switch_noops_commands_to_done() {
    let env = setup_env().await;

    env.config
        .set_bool(flags::INVENTORY_KILL_ALL, true)
        .await
        .expect("set inventory kill switch");

    let id = store::enqueue(
        &env.pool,
        &store::EnqueueParams {
            job_type: JobType::InventoryCommand,
            payload: &serde_json::json!({
                "op": "set",
                "product_id": "p1",
                "outlet_id": 42,
                "target": 7,
            }),
            idempotency_key: Some("invq:p1:42:7"),
            priority: 5,
            max_attempts: 6,
        },
    )
    .await
    .expect("enqueue")
    .job_id;

    let summary = env
        .runner
        .run(RunOptions::default())
        .await
        .expect("run");
    assert_eq!(summary.completed, 1);

    let status: String = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
        .bind(id)
        .fetch_one(&env.pool)
        .await
        .expect("status");
    assert_eq!(status, "done");

    let skipped: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM job_logs WHERE job_id = ? AND message LIKE '%inventory.command.skipped%'",
    )
    .bind(id)
    .fetch_one(&env.pool)
    .await
    .expect("log count");
    assert_eq!(skipped, 1);
}

#[tokio::test]
async fn malformed_payload_goes_straight_to_dlq() {
    let env = setup_env().await;

    let id = store::enqueue(
        &env.pool,
        &store::EnqueueParams {
            job_type: JobType::InventoryCommand,
            payload: &serde_json::json!({ "op": "set" }),
            idempotency_key: Some("bad-1"),
            priority: 5,
            max_attempts: 6,
        },
    )
    .await
    .expect("enqueue")
    .job_id;

    let summary = env
        .runner
        .run(RunOptions::default())
        .await
        .expect("run");
    assert_eq!(summary.dead, 1);

    let fail_code: String = sqlx::query_scalar("SELECT fail_code FROM job_dlq WHERE job_id = ?")
        .bind(id)
        .fetch_one(&env.pool)
        .await
        .expect("dlq row");
    assert_eq!(fail_code, "validation");
}

#[tokio::test]
async fn fanout_job_routes_event_into_downstream_pull() {
    let env = setup_env().await;

    // seed a stored webhook event the fanout job will close out
    let event_id = uuid::Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO webhook_events (
            id, webhook_id, webhook_type, raw_payload, payload, headers,
            status, received_at, processing_attempts
        )
        VALUES (?, 'WH1', 'inventory.update', '{}', '{}', '{}', 'processing', ?, 0)
        "#,
    )
    .bind(event_id.to_string())
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&env.pool)
    .await
    .expect("seed event");

    store::enqueue(
        &env.pool,
        &store::EnqueueParams {
            job_type: JobType::WebhookEvent,
            payload: &serde_json::json!({
                "webhook_id": "WH1",
                "webhook_type": "inventory.update",
            }),
            idempotency_key: Some("webhook:WH1"),
            priority: 5,
            max_attempts: 6,
        },
    )
    .await
    .expect("enqueue fanout");

    let summary = env
        .runner
        .run(RunOptions {
            limit: None,
            job_type: Some(JobType::WebhookEvent),
        })
        .await
        .expect("run");
    assert_eq!(summary.completed, 1);

    let downstream: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE job_type = 'pull_inventory' AND idempotency_key = 'webhook:WH1:pull_inventory'",
    )
    .fetch_one(&env.pool)
    .await
    .expect("downstream count");
    assert_eq!(downstream, 1, "one event spawns exactly one downstream job");

    let event_status: String =
        sqlx::query_scalar("SELECT status FROM webhook_events WHERE webhook_id = 'WH1'")
            .fetch_one(&env.pool)
            .await
            .expect("event status");
    assert_eq!(event_status, "completed");
}

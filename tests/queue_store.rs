#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;
use std::fs;

use chrono::{Duration, Utc};
use sqlx::{
    Connection, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tempfile::NamedTempFile;
use vendbridge::queue::store::{
    self, EnqueueParams, FailOutcome, backoff_delay_s,
};
use vendbridge::types::{JobStatus, JobType};

struct TestDb {
    pool: SqlitePool,
    _db_file: NamedTempFile,
}

async fn setup_db(max_connections: u32) -> TestDb {
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
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .expect("connect sqlite file");

    TestDb {
        pool,
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

async fn enqueue_simple(pool: &SqlitePool, job_type: JobType, key: Option<&str>) -> i64 {
    store::enqueue(
        pool,
        &EnqueueParams {
            job_type,
            payload: &serde_json::json!({ "transfer_pk": "t-1", "strategy": "report" }),
            idempotency_key: key,
            priority: 5,
            max_attempts: 6,
        },
    )
    .await
    .expect("enqueue")
    .job_id
}

#[tokio::test]
async fn enqueue_is_idempotent_on_key() {
    let db = setup_db(1).await;

    let first = enqueue_simple(&db.pool, JobType::ReconcileDiscrepancies, Some("k-1")).await;
    let second = store::enqueue(
        &db.pool,
        &EnqueueParams {
            job_type: JobType::ReconcileDiscrepancies,
            payload: &serde_json::json!({ "transfer_pk": "other" }),
            idempotency_key: Some("k-1"),
            priority: 2,
            max_attempts: 6,
        },
    )
    .await
    .expect("second enqueue");

    assert_eq!(second.job_id, first, "same key must bind to one row");
    assert!(second.deduplicated);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE idempotency_key = 'k-1'")
        .fetch_one(&db.pool)
        .await
        .expect("count");
    assert_eq!(count, 1);

    // the original payload is untouched by the duplicate submission
    let payload: String = sqlx::query_scalar("SELECT payload FROM jobs WHERE id = ?")
        .bind(first)
        .fetch_one(&db.pool)
        .await
        .expect("payload");
    assert!(payload.contains("t-1"));
}

#[tokio::test]
async fn claim_skips_future_and_working_rows() {
    let db = setup_db(1).await;

    let due = enqueue_simple(&db.pool, JobType::ReconcileDiscrepancies, None).await;
    let future = enqueue_simple(&db.pool, JobType::ReconcileDiscrepancies, None).await;

    let later = (Utc::now() + Duration::hours(1)).to_rfc3339();
    sqlx::query("UPDATE jobs SET next_run_at = ? WHERE id = ?")
        .bind(&later)
        .bind(future)
        .execute(&db.pool)
        .await
        .expect("push next_run_at out");

    let claimed = store::claim_batch(&db.pool, 10, None, "w-1", 120)
        .await
        .expect("claim");
    let ids: Vec<i64> = claimed.iter().map(|job| job.id).collect();
    assert_eq!(ids, vec![due]);

    let job = &claimed[0];
    assert_eq!(job.status, JobStatus::Working);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.leased_by.as_deref(), Some("w-1"));
    assert!(job.leased_until.is_some());
    assert!(job.started_at.is_some());

    // a second claim sees nothing: the row is leased, the other not due
    let again = store::claim_batch(&db.pool, 10, None, "w-2", 120)
        .await
        .expect("second claim");
    assert!(again.is_empty());
}

#[tokio::test]
async fn claim_orders_by_priority_then_age() {
    let db = setup_db(1).await;

    for (key, priority) in [("p9", 9), ("p1", 1), ("p5", 5)] {
        store::enqueue(
            &db.pool,
            &EnqueueParams {
                job_type: JobType::ReconcileDiscrepancies,
                payload: &serde_json::json!({ "transfer_pk": key }),
                idempotency_key: Some(key),
                priority,
                max_attempts: 6,
            },
        )
        .await
        .expect("enqueue");
    }

    let claimed = store::claim_batch(&db.pool, 1, None, "w-1", 120)
        .await
        .expect("claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].priority, 1, "lowest priority value wins");
    assert_eq!(claimed[0].idempotency_key.as_deref(), Some("p1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_claims_return_disjoint_sets() {
    let db = setup_db(2).await;
    let pool = db.pool;

    let total = 10;
    for n in 0..total {
        store::enqueue(
            &pool,
            &EnqueueParams {
                job_type: JobType::ReconcileDiscrepancies,
                payload: &serde_json::json!({ "n": n }),
                idempotency_key: None,
                priority: 5,
                max_attempts: 6,
            },
        )
        .await
        .expect("enqueue");
    }

    let barrier = std::sync::Arc::new(tokio::sync::Barrier::new(2));
    let barrier_a = barrier.clone();
    let barrier_b = barrier.clone();
    let pool_a = pool.clone();
    let pool_b = pool.clone();

    let (a, b) = tokio::join!(
        async move {
            barrier_a.wait().await;
            store::claim_batch(&pool_a, 6, None, "worker-a", 120)
                .await
                .expect("claim a")
        },
        async move {
            barrier_b.wait().await;
            store::claim_batch(&pool_b, 6, None, "worker-b", 120)
                .await
                .expect("claim b")
        }
    );

    let ids_a: HashSet<i64> = a.iter().map(|job| job.id).collect();
    let ids_b: HashSet<i64> = b.iter().map(|job| job.id).collect();
    let combined: HashSet<i64> = ids_a.union(&ids_b).copied().collect();

    assert_eq!(
        combined.len(),
        a.len() + b.len(),
        "duplicate claims detected across concurrent workers"
    );
    assert_eq!(combined.len(), total as usize);
}

#[tokio::test]
async fn complete_is_terminal() {
    let db = setup_db(1).await;

    let id = enqueue_simple(&db.pool, JobType::ReconcileDiscrepancies, Some("done-1")).await;
    let claimed = store::claim_batch(&db.pool, 1, None, "w-1", 120)
        .await
        .expect("claim");
    assert_eq!(claimed[0].id, id);

    store::complete(&db.pool, id, "w-1", None)
        .await
        .expect("complete");

    let (status, finished_at, leased_by): (String, Option<String>, Option<String>) =
        sqlx::query_as("SELECT status, finished_at, leased_by FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&db.pool)
            .await
            .expect("row");
    assert_eq!(status, "done");
    assert!(finished_at.is_some());
    assert!(leased_by.is_none());

    // a done row never reappears in a claim
    let again = store::claim_batch(&db.pool, 10, None, "w-2", 120)
        .await
        .expect("claim again");
    assert!(again.is_empty());

    // and the completion breadcrumb exists
    let logs: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM job_logs WHERE job_id = ? AND message LIKE '%job.completed%'",
    )
    .bind(id)
    .fetch_one(&db.pool)
    .await
    .expect("logs");
    assert_eq!(logs, 1);
}

#[tokio::test]
async fn complete_requires_lease_ownership() {
    let db = setup_db(1).await;

    let id = enqueue_simple(&db.pool, JobType::ReconcileDiscrepancies, None).await;
    store::claim_batch(&db.pool, 1, None, "w-1", 120)
        .await
        .expect("claim");

    let result = store::complete(&db.pool, id, "w-other", None).await;
    assert!(result.is_err(), "wrong worker must not complete the job");

    let status: String = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
        .bind(id)
        .fetch_one(&db.pool)
        .await
        .expect("status");
    assert_eq!(status, "working");
}

#[tokio::test]
async fn fail_retries_with_backoff_then_dlq() {
    let db = setup_db(1).await;

    let id = store::enqueue(
        &db.pool,
        &EnqueueParams {
            job_type: JobType::PushInventoryAdjustment,
            payload: &serde_json::json!({ "product_id": "p1", "outlet_id": 1, "count": 2.0 }),
            idempotency_key: Some("retry-1"),
            priority: 5,
            max_attempts: 2,
        },
    )
    .await
    .expect("enqueue")
    .job_id;

    // attempt 1: transient failure goes back to pending with a delay
    store::claim_batch(&db.pool, 1, None, "w-1", 120)
        .await
        .expect("claim 1");
    let outcome = store::fail(&db.pool, id, "w-1", "transient_vendor", "503", false)
        .await
        .expect("fail 1");
    assert!(matches!(outcome, FailOutcome::Retried { .. }));

    let (status, attempts, next_run_at, last_error): (String, i64, Option<String>, Option<String>) =
        sqlx::query_as("SELECT status, attempts, next_run_at, last_error FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&db.pool)
            .await
            .expect("row");
    assert_eq!(status, "pending");
    assert_eq!(attempts, 1);
    assert_eq!(last_error.as_deref(), Some("503"));
    let next = chrono::DateTime::parse_from_rfc3339(&next_run_at.expect("next_run_at"))
        .expect("parse next_run_at");
    assert!(next.with_timezone(&Utc) > Utc::now(), "backoff must delay");

    // make it due again, attempt 2 exhausts max_attempts and lands in DLQ
    sqlx::query("UPDATE jobs SET next_run_at = NULL WHERE id = ?")
        .bind(id)
        .execute(&db.pool)
        .await
        .expect("clear delay");
    store::claim_batch(&db.pool, 1, None, "w-1", 120)
        .await
        .expect("claim 2");
    let outcome = store::fail(&db.pool, id, "w-1", "transient_vendor", "503 again", false)
        .await
        .expect("fail 2");
    assert!(matches!(outcome, FailOutcome::MovedToDlq { .. }));

    let live: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE id = ?")
        .bind(id)
        .fetch_one(&db.pool)
        .await
        .expect("live count");
    assert_eq!(live, 0, "terminal row must leave the live table");

    let (fail_code, attempts): (String, i64) =
        sqlx::query_as("SELECT fail_code, attempts FROM job_dlq WHERE job_id = ?")
            .bind(id)
            .fetch_one(&db.pool)
            .await
            .expect("dlq row");
    assert_eq!(fail_code, "transient_vendor");
    assert_eq!(attempts, 2);
}

#[tokio::test]
async fn terminal_failure_skips_remaining_attempts() {
    let db = setup_db(1).await;

    let id = enqueue_simple(&db.pool, JobType::PushProductUpdate, Some("fatal-1")).await;
    store::claim_batch(&db.pool, 1, None, "w-1", 120)
        .await
        .expect("claim");

    let outcome = store::fail(&db.pool, id, "w-1", "validation", "422 rejected", true)
        .await
        .expect("fail");
    assert!(matches!(outcome, FailOutcome::MovedToDlq { .. }));

    let dlq: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_dlq WHERE job_id = ?")
        .bind(id)
        .fetch_one(&db.pool)
        .await
        .expect("dlq count");
    assert_eq!(dlq, 1, "fatal error must DLQ on first occurrence");
}

#[tokio::test]
async fn heartbeat_extends_lease_for_owner_only() {
    let db = setup_db(1).await;

    let id = enqueue_simple(&db.pool, JobType::ReconcileDiscrepancies, None).await;
    let claimed = store::claim_batch(&db.pool, 1, None, "w-1", 5)
        .await
        .expect("claim");
    let before = claimed[0].leased_until.clone().expect("leased_until");

    store::heartbeat(&db.pool, id, "w-1", 600)
        .await
        .expect("heartbeat");

    let after: Option<String> = sqlx::query_scalar("SELECT leased_until FROM jobs WHERE id = ?")
        .bind(id)
        .fetch_one(&db.pool)
        .await
        .expect("leased_until");
    let before = chrono::DateTime::parse_from_rfc3339(&before).expect("before");
    let after = chrono::DateTime::parse_from_rfc3339(&after.expect("set")).expect("after");
    assert!(after > before, "heartbeat must extend the lease");

    let denied = store::heartbeat(&db.pool, id, "w-other", 600).await;
    assert!(denied.is_err(), "non-owner heartbeat must be rejected");
}

#[tokio::test]
async fn reap_resets_expired_leases_without_touching_attempts() {
    let db = setup_db(1).await;

    let stuck = enqueue_simple(&db.pool, JobType::ReconcileDiscrepancies, Some("stuck")).await;
    let healthy = enqueue_simple(&db.pool, JobType::ReconcileDiscrepancies, Some("healthy")).await;
    store::claim_batch(&db.pool, 2, None, "w-dead", 120)
        .await
        .expect("claim both");

    // simulate a worker that died an hour ago
    let past = (Utc::now() - Duration::hours(1)).to_rfc3339();
    sqlx::query("UPDATE jobs SET leased_until = ?, heartbeat_at = ?, started_at = ? WHERE id = ?")
        .bind(&past)
        .bind(&past)
        .bind(&past)
        .bind(stuck)
        .execute(&db.pool)
        .await
        .expect("age the lease");

    let reaped = store::reap(&db.pool, 900).await.expect("reap");
    assert_eq!(reaped, 1);

    let (status, attempts, leased_by): (String, i64, Option<String>) =
        sqlx::query_as("SELECT status, attempts, leased_by FROM jobs WHERE id = ?")
            .bind(stuck)
            .fetch_one(&db.pool)
            .await
            .expect("row");
    assert_eq!(status, "pending");
    assert_eq!(attempts, 1, "reap must not change attempts");
    assert!(leased_by.is_none());

    let healthy_status: String = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
        .bind(healthy)
        .fetch_one(&db.pool)
        .await
        .expect("healthy status");
    assert_eq!(healthy_status, "working", "live leases are left alone");

    // the reaped row is claimable again
    let claimed = store::claim_batch(&db.pool, 10, None, "w-new", 120)
        .await
        .expect("reclaim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, stuck);
}

#[tokio::test]
async fn redrive_restores_exactly_one_live_row() {
    let db = setup_db(1).await;

    let id = store::enqueue(
        &db.pool,
        &EnqueueParams {
            job_type: JobType::PushInventoryAdjustment,
            payload: &serde_json::json!({ "product_id": "p1", "outlet_id": 1, "count": 1.0 }),
            idempotency_key: Some("redrive-1"),
            priority: 5,
            max_attempts: 1,
        },
    )
    .await
    .expect("enqueue")
    .job_id;

    store::claim_batch(&db.pool, 1, None, "w-1", 120)
        .await
        .expect("claim");
    store::fail(&db.pool, id, "w-1", "transient_vendor", "503", false)
        .await
        .expect("exhaust");

    let outcome = store::redrive_dlq(&db.pool, None, Some(10), 60)
        .await
        .expect("redrive");
    assert_eq!(outcome.redriven, 1);
    assert_eq!(outcome.job_ids.len(), 1);

    let dlq_left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_dlq")
        .fetch_one(&db.pool)
        .await
        .expect("dlq count");
    assert_eq!(dlq_left, 0);

    let (status, attempts, key): (String, i64, Option<String>) = sqlx::query_as(
        "SELECT status, attempts, idempotency_key FROM jobs WHERE id = ?",
    )
    .bind(outcome.job_ids[0])
    .fetch_one(&db.pool)
    .await
    .expect("redriven row");
    assert_eq!(status, "pending");
    assert_eq!(attempts, 0, "redrive refunds one attempt");
    assert_eq!(key.as_deref(), Some("redrive-1"));

    let live: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE idempotency_key = 'redrive-1'")
        .fetch_one(&db.pool)
        .await
        .expect("live count");
    assert_eq!(live, 1, "redrive must not duplicate the logical job");
}

#[tokio::test]
async fn redrive_does_not_duplicate_live_idempotency_keys() {
    let db = setup_db(1).await;

    // park a copy in the DLQ, then recreate a live row under the same key
    let id = store::enqueue(
        &db.pool,
        &EnqueueParams {
            job_type: JobType::PushInventoryAdjustment,
            payload: &serde_json::json!({ "product_id": "p1", "outlet_id": 1, "count": 1.0 }),
            idempotency_key: Some("dup-key"),
            priority: 5,
            max_attempts: 1,
        },
    )
    .await
    .expect("enqueue")
    .job_id;
    store::claim_batch(&db.pool, 1, None, "w-1", 120)
        .await
        .expect("claim");
    store::fail(&db.pool, id, "w-1", "transient_vendor", "503", false)
        .await
        .expect("exhaust");

    enqueue_simple(&db.pool, JobType::PushInventoryAdjustment, Some("dup-key")).await;

    let outcome = store::redrive_dlq(&db.pool, None, Some(10), 60)
        .await
        .expect("redrive");
    assert_eq!(outcome.redriven, 0, "live key must suppress the redrive");

    let live: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE idempotency_key = 'dup-key'")
            .fetch_one(&db.pool)
            .await
            .expect("live count");
    assert_eq!(live, 1);
}

#[test]
fn backoff_respects_base_and_cap() {
    for attempts in 1..=8 {
        let delay = backoff_delay_s(attempts);
        assert!(delay >= 10, "at least the base delay");
        assert!(delay <= 310, "cap plus jitter bound");
    }
}

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::fs;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use http_body_util::BodyExt;
use sqlx::{
    Connection, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tempfile::NamedTempFile;
use tower::ServiceExt;
use vendbridge::config::{ConfigStore, flags};
use vendbridge::queue::Runner;
use vendbridge::state::AppState;
use vendbridge::vend::{CircuitBreaker, VendClient};
use vendbridge::webhook::signature;

const SECRET: &str = "whsec-test";

struct TestApp {
    app: Router,
    pool: SqlitePool,
    config: ConfigStore,
    _db_file: NamedTempFile,
}

async fn setup_app() -> TestApp {
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
    config
        .set(flags::WEBHOOK_SECRET, SECRET)
        .await
        .expect("set webhook secret");

    let breaker = Arc::new(CircuitBreaker::load(&config).await);
    let vend = VendClient::new(config.clone(), breaker).expect("vend client");
    let runner = Runner::new(
        pool.clone(),
        config.clone(),
        vend.clone(),
        "test-runner".to_string(),
    );

    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        vend,
        runner,
        admin_token_env: None,
        admin_token_prev_env: None,
        admin_token_prev_expires_env: None,
    };

    TestApp {
        app: vendbridge::router(state),
        pool,
        config,
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

fn signed_request(webhook_id: &str, body: &str, timestamp: i64, secret: &str) -> Request<Body> {
    let ts = timestamp.to_string();
    let signed = signature::sign(secret, body.as_bytes(), Some(&ts));

    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("X-LS-Webhook-Id", webhook_id)
        .header("X-LS-Event-Type", "inventory.update")
        .header("X-LS-Timestamp", ts)
        .header("X-LS-Signature", signed)
        .body(Body::from(body.to_string()))
        .expect("build request")
}

async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn valid_delivery_is_stored_and_fanned_out() {
    let test = setup_app().await;

    let request = signed_request("WH1", r#"{"product_id":"p1"}"#, Utc::now().timestamp(), SECRET);
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["data"]["duplicate"], false);
    assert!(body["data"]["queue_job_id"].is_i64());

    let (status, job_id): (String, Option<i64>) =
        sqlx::query_as("SELECT status, queue_job_id FROM webhook_events WHERE webhook_id = 'WH1'")
            .fetch_one(&test.pool)
            .await
            .expect("event row");
    assert_eq!(status, "processing");
    assert!(job_id.is_some());

    let fanout_jobs: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE job_type = 'webhook.event' AND idempotency_key = 'webhook:WH1'",
    )
    .fetch_one(&test.pool)
    .await
    .expect("fanout job count");
    assert_eq!(fanout_jobs, 1);
}

#[tokio::test]
async fn duplicate_webhook_id_is_acknowledged_once() {
    let test = setup_app().await;
    let now = Utc::now().timestamp();

    let first = test
        .app
        .clone()
        .oneshot(signed_request("WH1", r#"{"n":1}"#, now, SECRET))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = test
        .app
        .clone()
        .oneshot(signed_request("WH1", r#"{"n":1}"#, now, SECRET))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let body = response_json(second).await;
    assert_eq!(body["data"]["duplicate"], true);

    let events: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM webhook_events WHERE webhook_id = 'WH1'")
            .fetch_one(&test.pool)
            .await
            .expect("event count");
    assert_eq!(events, 1, "one row per webhook_id");

    let jobs: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE idempotency_key = 'webhook:WH1'",
    )
    .fetch_one(&test.pool)
    .await
    .expect("job count");
    assert_eq!(jobs, 1, "one fanout job per webhook_id");
}

#[tokio::test]
async fn bad_signature_is_rejected_and_recorded() {
    let test = setup_app().await;

    let request = signed_request("WH2", r#"{"n":2}"#, Utc::now().timestamp(), "wrong-secret");
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, error): (String, Option<String>) = sqlx::query_as(
        "SELECT status, error_message FROM webhook_events WHERE webhook_id = 'WH2'",
    )
    .fetch_one(&test.pool)
    .await
    .expect("failed row");
    assert_eq!(status, "failed");
    assert!(error.is_some());

    let failed: i64 = sqlx::query_scalar("SELECT failed_count FROM webhook_stats WHERE id = 1")
        .fetch_one(&test.pool)
        .await
        .expect("stats");
    assert_eq!(failed, 1);

    let health: String =
        sqlx::query_scalar("SELECT health_status FROM webhook_health WHERE id = 1")
            .fetch_one(&test.pool)
            .await
            .expect("health");
    assert_ne!(health, "healthy");
}

#[tokio::test]
async fn body_only_digest_is_also_accepted() {
    let test = setup_app().await;
    let body = r#"{"n":3}"#;

    // signature over the raw body, without the timestamp prefix
    let signed = signature::sign(SECRET, body.as_bytes(), None);
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("X-LS-Webhook-Id", "WH3")
        .header("X-LS-Event-Type", "product.update")
        .header("X-LS-Timestamp", Utc::now().timestamp().to_string())
        .header("X-Signature", format!("signature={signed}, algorithm=HMAC-SHA256"))
        .body(Body::from(body))
        .expect("build request");

    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn timestamp_tolerance_boundary() {
    let test = setup_app().await;
    let now = Utc::now().timestamp();

    let fresh = signed_request("WH-fresh", "{}", now - 299, SECRET);
    let response = test.app.clone().oneshot(fresh).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK, "now-299 within tolerance");

    let stale = signed_request("WH-stale", "{}", now - 301, SECRET);
    let response = test.app.clone().oneshot(stale).await.unwrap();
    assert_eq!(
        response.status(),
        StatusCode::UNAUTHORIZED,
        "now-301 outside tolerance"
    );
}

#[tokio::test]
async fn previous_secret_is_honored_during_overlap() {
    let test = setup_app().await;
    let now = Utc::now().timestamp();

    // rotate: old secret moves into the prev slot with an hour of overlap
    test.config
        .set(flags::WEBHOOK_SECRET, "whsec-new")
        .await
        .expect("set new secret");
    test.config
        .set(flags::WEBHOOK_SECRET_PREV, SECRET)
        .await
        .expect("set prev secret");
    test.config
        .set_i64(flags::WEBHOOK_SECRET_PREV_EXPIRES_AT, now + 3600)
        .await
        .expect("set prev expiry");

    let old_signed = signed_request("WH-old", "{}", now, SECRET);
    let response = test.app.clone().oneshot(old_signed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK, "old secret inside overlap");

    let new_signed = signed_request("WH-new", "{}", now, "whsec-new");
    let response = test.app.clone().oneshot(new_signed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK, "new secret always works");

    // close the overlap window; the old secret dies with it
    test.config
        .set_i64(flags::WEBHOOK_SECRET_PREV_EXPIRES_AT, now - 1)
        .await
        .expect("expire prev");
    let old_signed = signed_request("WH-expired", "{}", now, SECRET);
    let response = test.app.clone().oneshot(old_signed).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn disabled_intake_returns_403() {
    let test = setup_app().await;
    test.config
        .set_bool(flags::WEBHOOK_ENABLED, false)
        .await
        .expect("disable intake");

    let request = signed_request("WH4", "{}", Utc::now().timestamp(), SECRET);
    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn open_mode_accepts_unsigned_submissions() {
    let test = setup_app().await;
    let now = Utc::now().timestamp();

    test.config
        .set_bool(flags::WEBHOOK_OPEN_MODE, true)
        .await
        .expect("open mode");
    test.config
        .set_i64(flags::WEBHOOK_OPEN_MODE_UNTIL, now + 600)
        .await
        .expect("open mode until");

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("X-LS-Webhook-Id", "WH-open")
        .header("X-LS-Event-Type", "inventory.update")
        .body(Body::from("{}"))
        .expect("build request");

    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn form_encoded_payload_field_is_parsed() {
    let test = setup_app().await;
    let body = "payload=%7B%22product_id%22%3A%22p9%22%7D";
    let ts = Utc::now().timestamp().to_string();
    let signed = signature::sign(SECRET, body.as_bytes(), Some(&ts));

    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("X-LS-Webhook-Id", "WH-form")
        .header("X-LS-Event-Type", "inventory.update")
        .header("X-LS-Timestamp", ts)
        .header("X-LS-Signature", signed)
        .body(Body::from(body))
        .expect("build request");

    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let payload: Option<String> =
        sqlx::query_scalar("SELECT payload FROM webhook_events WHERE webhook_id = 'WH-form'")
            .fetch_one(&test.pool)
            .await
            .expect("payload");
    assert_eq!(payload.as_deref(), Some(r#"{"product_id":"p9"}"#));
}

#[tokio::test]
async fn self_test_round_trips_through_intake() {
    let test = setup_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/webhook.test")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .expect("build request");

    let response = test.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["data"]["duplicate"], false);

    let events: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM webhook_events WHERE webhook_id LIKE 'selftest:%'",
    )
    .fetch_one(&test.pool)
    .await
    .expect("event count");
    assert_eq!(events, 1);
}

#[tokio::test]
async fn replay_creates_linked_copy_and_fanout() {
    let test = setup_app().await;
    let now = Utc::now().timestamp();

    let response = test
        .app
        .clone()
        .oneshot(signed_request("WH-src", r#"{"n":9}"#, now, SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let source_id = body["data"]["event_id"].as_str().expect("event id").to_string();

    let replay = Request::builder()
        .method("POST")
        .uri("/webhook.replay")
        .header("content-type", "application/json")
        .body(Body::from(format!(r#"{{"ids":["{source_id}"]}}"#)))
        .expect("build request");

    let response = test.app.clone().oneshot(replay).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["replayed"].as_array().unwrap().len(), 1);

    let (status,): (String,) =
        sqlx::query_as("SELECT status FROM webhook_events WHERE id = ?")
            .bind(&source_id)
            .fetch_one(&test.pool)
            .await
            .expect("source row");
    assert_eq!(status, "replayed");

    let copies: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM webhook_events WHERE replayed_from = ?",
    )
    .bind(&source_id)
    .fetch_one(&test.pool)
    .await
    .expect("copy count");
    assert_eq!(copies, 1);

    let replayed_count: i64 =
        sqlx::query_scalar("SELECT replayed_count FROM webhook_stats WHERE id = 1")
            .fetch_one(&test.pool)
            .await
            .expect("stats");
    assert_eq!(replayed_count, 1);
}

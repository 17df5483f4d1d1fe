pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod health;
pub mod jobs;
pub mod queue;
pub mod state;
pub mod timeutil;
pub mod types;
pub mod vend;
pub mod webhook;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::handlers::{ops, queue as queue_handlers, webhook as webhook_handlers};
use crate::state::AppState;

/// Full ingress surface: open probes and the vendor intake, plus the
/// bearer-guarded admin routes.
pub fn router(state: AppState) -> Router {
    let open = Router::new()
        .route("/health", get(ops::health_handler))
        .route("/metrics", get(ops::metrics_handler))
        .route(
            "/watchdog",
            get(ops::watchdog_handler).post(ops::watchdog_handler),
        )
        .route("/webhook", post(webhook_handlers::receive_handler));

    let admin = Router::new()
        .route("/job", post(queue_handlers::enqueue_handler))
        .route("/queue.status", get(queue_handlers::status_handler))
        .route("/queue.pause", post(queue_handlers::pause_handler))
        .route("/queue.resume", post(queue_handlers::resume_handler))
        .route(
            "/queue.concurrency.update",
            post(queue_handlers::concurrency_update_handler),
        )
        .route("/dlq.list", get(queue_handlers::dlq_list_handler))
        .route("/dlq.redrive", post(queue_handlers::dlq_redrive_handler))
        .route("/dlq.purge", post(queue_handlers::dlq_purge_handler))
        .route("/runner.kick", post(queue_handlers::runner_kick_handler))
        .route(
            "/runner.continuous",
            post(queue_handlers::runner_continuous_handler),
        )
        .route("/reap", post(queue_handlers::reap_handler))
        .route(
            "/reap.emergency",
            post(queue_handlers::reap_emergency_handler),
        )
        .route("/webhook.test", post(webhook_handlers::test_handler))
        .route("/webhook.replay", post(webhook_handlers::replay_handler))
        .route("/keys.rotate", post(ops::keys_rotate_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::admin_auth,
        ));

    Router::new().merge(open).merge(admin).with_state(state)
}

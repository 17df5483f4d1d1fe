use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use vendbridge::config::{ConfigStore, flags};
use vendbridge::health;
use vendbridge::queue::{RunOptions, Runner, store};
use vendbridge::state::AppState;
use vendbridge::vend::{CircuitBreaker, VendClient};

/// Cadence for the background runner tick; each tick is a full burst (or
/// a continuous window) guarded by the store-level singleflight lock.
const RUNNER_TICK: Duration = Duration::from_secs(5);
const REAPER_TICK: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:vendbridge.db".to_string());
    let bind_addr =
        std::env::var("BRIDGE_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3001".to_string());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&pool)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let config = ConfigStore::new(pool.clone());
    let breaker = Arc::new(CircuitBreaker::load(&config).await);
    let vend = VendClient::new(config.clone(), breaker)?;

    let worker_id = format!(
        "runner-{}-{}",
        std::process::id(),
        &Uuid::new_v4().simple().to_string()[..8]
    );
    let runner = Runner::new(pool.clone(), config.clone(), vend.clone(), worker_id);

    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        vend,
        runner: runner.clone(),
        admin_token_env: std::env::var("ADMIN_BEARER_TOKEN").ok(),
        admin_token_prev_env: std::env::var("ADMIN_BEARER_TOKEN_PREV").ok(),
        admin_token_prev_expires_env: std::env::var("ADMIN_BEARER_TOKEN_PREV_EXPIRES_AT")
            .ok()
            .and_then(|raw| raw.parse::<i64>().ok()),
    };

    spawn_runner_loop(runner);
    spawn_reaper_loop(pool.clone());
    spawn_watchdog_loop(state.clone());

    let addr: SocketAddr = bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, vendbridge::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn spawn_runner_loop(runner: Runner) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(RUNNER_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if let Err(err) = runner.run(RunOptions::default()).await {
                warn!(?err, "runner tick failed");
            }
        }
    });
}

fn spawn_reaper_loop(pool: sqlx::SqlitePool) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(REAPER_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            match store::reap(&pool, flags::DEFAULT_REAP_OLDER_THAN_S).await {
                Ok(0) => {}
                Ok(reaped) => info!(reaped, "reclaimed expired leases"),
                Err(err) => warn!(?err, "reaper tick failed"),
            }
        }
    });
}

fn spawn_watchdog_loop(state: AppState) {
    tokio::spawn(async move {
        let mut tick =
            tokio::time::interval(Duration::from_secs(health::WATCHDOG_INTERVAL_S));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if let Err(err) =
                health::run_watchdog(&state.pool, &state.config, state.vend.breaker()).await
            {
                warn!(?err, "watchdog tick failed");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to install ctrl-c handler");
    }
    info!("shutting down");
}

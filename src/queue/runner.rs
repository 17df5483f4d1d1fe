use std::time::{Duration, Instant};

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use super::lock;
use super::store::{self, FailOutcome, StoreError};
use crate::config::{ConfigStore, flags};
use crate::jobs::{self, JobContext, JobError};
use crate::types::{Job, JobType, RunSummary};
use crate::vend::VendClient;

pub const RUNNER_LOCK: &str = "ls_runner:all";
pub const DEFAULT_RUN_LIMIT: i64 = 200;

/// Idle sleep between claim cycles inside the continuous window.
const IDLE_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Clone, Copy)]
pub struct RunOptions {
    pub limit: Option<i64>,
    pub job_type: Option<JobType>,
}

/// Drains the queue: claims eligible rows under per-type concurrency caps,
/// dispatches them to handlers, and maps classified failures onto
/// retry/DLQ transitions. At most one runner instance claims at a time,
/// guarded by the store-level `ls_runner:all` lock.
#[derive(Clone)]
pub struct Runner {
    pool: SqlitePool,
    config: ConfigStore,
    vend: VendClient,
    worker_id: String,
}

impl Runner {
    pub fn new(pool: SqlitePool, config: ConfigStore, vend: VendClient, worker_id: String) -> Self {
        Self {
            pool,
            config,
            vend,
            worker_id,
        }
    }

    pub async fn run(&self, opts: RunOptions) -> Result<RunSummary, StoreError> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        if self.flag(flags::QUEUE_KILL_ALL, false).await? {
            summary.skipped = Some("queue.kill_all".to_string());
            return Ok(summary);
        }
        if !self.flag(flags::QUEUE_RUNNER_ENABLED, true).await? {
            summary.skipped = Some("runner_disabled".to_string());
            return Ok(summary);
        }

        let runtime_s = self
            .config
            .get_i64(
                flags::QUEUE_RUNTIME_BUSINESS_S,
                flags::DEFAULT_RUNTIME_BUSINESS_S,
            )
            .await
            .map_err(store_unavailable)?
            .clamp(5, 3600);

        let singleflight = !self
            .flag(flags::QUEUE_DISABLE_SINGLEFLIGHT, false)
            .await?;
        if singleflight
            && !lock::acquire(&self.pool, RUNNER_LOCK, &self.worker_id, runtime_s + 60).await?
        {
            debug!("runner lock held elsewhere, yielding");
            summary.skipped = Some("singleflight".to_string());
            return Ok(summary);
        }

        let continuous = self.flag(flags::QUEUE_CONTINUOUS, false).await?;
        let deadline = started + Duration::from_secs(runtime_s as u64);
        let limit = opts.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, 1000);
        let mut remaining = limit;

        let outcome: Result<(), StoreError> = async {
            loop {
                if self.flag(flags::QUEUE_KILL_ALL, false).await? {
                    break;
                }

                let claimed = self
                    .claim_cycle(opts.job_type, remaining, &mut summary)
                    .await?;
                remaining -= claimed;

                if remaining <= 0 {
                    break;
                }
                if claimed == 0 {
                    if !continuous || Instant::now() >= deadline {
                        break;
                    }
                    tokio::time::sleep(IDLE_POLL).await;
                } else if continuous && Instant::now() >= deadline {
                    break;
                }
            }
            Ok(())
        }
        .await;

        if singleflight {
            if let Err(err) = lock::release(&self.pool, RUNNER_LOCK, &self.worker_id).await {
                // The lock expires on its own TTL if the release is lost.
                warn!(?err, "failed to release runner lock");
            }
        }

        outcome?;
        summary.elapsed_ms = started.elapsed().as_millis() as i64;
        if summary.claimed > 0 {
            info!(
                claimed = summary.claimed,
                completed = summary.completed,
                retried = summary.retried,
                dead = summary.dead,
                elapsed_ms = summary.elapsed_ms,
                "runner burst finished"
            );
        }
        Ok(summary)
    }

    /// One pass over the due types, claiming up to the per-type headroom
    /// and processing each claim to completion.
    async fn claim_cycle(
        &self,
        type_filter: Option<JobType>,
        budget: i64,
        summary: &mut RunSummary,
    ) -> Result<i64, StoreError> {
        let candidates = match type_filter {
            Some(ty) => vec![ty],
            None => store::pending_types_due(&self.pool).await?,
        };
        if candidates.is_empty() {
            return Ok(0);
        }

        let working = store::working_by_type(&self.pool).await?;
        let mut claimed_total = 0;

        for ty in candidates {
            let headroom = budget - claimed_total;
            if headroom <= 0 {
                break;
            }
            if self.flag(&flags::pause(ty), false).await? {
                debug!(job_type = %ty, "type paused, skipping");
                continue;
            }

            let cap = self
                .config
                .get_i64(&flags::max_concurrency(ty), flags::DEFAULT_MAX_CONCURRENCY)
                .await
                .map_err(store_unavailable)?
                .max(0);
            let in_flight = working.get(ty.as_str()).copied().unwrap_or(0);
            let slots = (cap - in_flight).min(headroom);
            if slots <= 0 {
                continue;
            }

            let jobs = store::claim_batch(
                &self.pool,
                slots,
                Some(ty),
                &self.worker_id,
                flags::DEFAULT_LEASE_TTL_S,
            )
            .await?;

            for job in jobs {
                claimed_total += 1;
                summary.claimed += 1;
                self.process(&job, summary).await?;
            }
        }

        Ok(claimed_total)
    }

    async fn process(&self, job: &Job, summary: &mut RunSummary) -> Result<(), StoreError> {
        let result = self.execute_with_heartbeat(job).await;

        match result {
            Ok(()) => {
                store::complete(&self.pool, job.id, &self.worker_id, None).await?;
                summary.completed += 1;
            }
            Err(err) => {
                warn!(
                    job_id = job.id,
                    job_type = %job.job_type,
                    code = err.code(),
                    terminal = err.is_terminal(),
                    "job handler failed: {}",
                    err.message()
                );
                match store::fail(
                    &self.pool,
                    job.id,
                    &self.worker_id,
                    err.code(),
                    err.message(),
                    err.is_terminal(),
                )
                .await?
                {
                    FailOutcome::Retried { .. } => summary.retried += 1,
                    FailOutcome::MovedToDlq { .. } => summary.dead += 1,
                }
            }
        }
        Ok(())
    }

    /// Runs the handler while extending the lease on every heartbeat
    /// interval. A lost lease aborts the handler; the reaper or another
    /// worker owns the row now.
    async fn execute_with_heartbeat(&self, job: &Job) -> Result<(), JobError> {
        let ctx = JobContext {
            pool: &self.pool,
            config: &self.config,
            vend: &self.vend,
            job,
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(
            flags::DEFAULT_HEARTBEAT_INTERVAL_S as u64,
        ));
        ticker.tick().await;

        let handler = jobs::dispatch(&ctx);
        tokio::pin!(handler);

        loop {
            tokio::select! {
                result = &mut handler => return result,
                _ = ticker.tick() => {
                    if store::heartbeat(
                        &self.pool,
                        job.id,
                        &self.worker_id,
                        flags::DEFAULT_LEASE_TTL_S,
                    )
                    .await
                    .is_err()
                    {
                        return Err(JobError::retry(
                            "internal",
                            "lease lost during execution",
                        ));
                    }
                }
            }
        }
    }

    async fn flag(&self, label: &str, default: bool) -> Result<bool, StoreError> {
        self.config
            .get_bool(label, default)
            .await
            .map_err(store_unavailable)
    }
}

fn store_unavailable(err: crate::config::StoreError) -> StoreError {
    match err {
        crate::config::StoreError::Db(db) => StoreError::Db(db),
    }
}

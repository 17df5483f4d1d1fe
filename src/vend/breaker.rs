use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use super::VendError;
use crate::config::{ConfigStore, flags};
use crate::timeutil::{format_utc, parse_utc};

pub const DEFAULT_FAILURE_THRESHOLD: i64 = 5;
pub const DEFAULT_COOLDOWN_S: i64 = 60;

#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub tripped: bool,
    pub until: Option<String>,
    pub consecutive_failures: i64,
}

struct BreakerState {
    consecutive_failures: i64,
    tripped_until: Option<DateTime<Utc>>,
}

/// Consecutive-failure circuit breaker for the vendor API. State is
/// process-local and mirrored to the config store after every change so a
/// restarted process resumes where the fleet left off.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    threshold: i64,
    cooldown_s: i64,
}

impl CircuitBreaker {
    pub fn new(threshold: i64, cooldown_s: i64) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                tripped_until: None,
            }),
            threshold: threshold.max(1),
            cooldown_s: cooldown_s.max(1),
        }
    }

    /// Restores breaker state from the store; the store row is
    /// authoritative at startup.
    pub async fn load(config: &ConfigStore) -> Self {
        let breaker = Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN_S);

        let until = match config.get(flags::CB_TRIPPED_UNTIL).await {
            Ok(value) => value.as_deref().and_then(parse_utc),
            Err(_) => None,
        };
        let failures = config
            .get_i64(flags::CB_CONSECUTIVE_FAILURES, 0)
            .await
            .unwrap_or(0);

        if let Ok(mut state) = breaker.state.lock() {
            state.consecutive_failures = failures;
            state.tripped_until = until.filter(|dt| *dt > Utc::now());
        }
        breaker
    }

    /// Fast-fails while tripped; an expired trip window clears on the next
    /// check and lets a probe request through.
    pub fn check(&self) -> Result<(), VendError> {
        let Ok(mut state) = self.state.lock() else {
            return Ok(());
        };
        match state.tripped_until {
            Some(until) if until > Utc::now() => Err(VendError::BreakerOpen {
                until: format_utc(until),
            }),
            Some(_) => {
                state.tripped_until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn record_failure(&self, config: &ConfigStore) {
        let (failures, until) = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.consecutive_failures += 1;
            if state.consecutive_failures >= self.threshold {
                state.tripped_until = Some(Utc::now() + Duration::seconds(self.cooldown_s));
            }
            (state.consecutive_failures, state.tripped_until)
        };

        self.sync(config, failures, until).await;
    }

    pub async fn record_success(&self, config: &ConfigStore) {
        let had_state = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let dirty = state.consecutive_failures != 0 || state.tripped_until.is_some();
            state.consecutive_failures = 0;
            state.tripped_until = None;
            dirty
        };

        if had_state {
            self.sync(config, 0, None).await;
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let Ok(state) = self.state.lock() else {
            return BreakerSnapshot {
                tripped: false,
                until: None,
                consecutive_failures: 0,
            };
        };
        let tripped = state
            .tripped_until
            .map(|until| until > Utc::now())
            .unwrap_or(false);
        BreakerSnapshot {
            tripped,
            until: state.tripped_until.map(format_utc),
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Opportunistic store sync; a write failure leaves the in-memory
    /// state authoritative for this process.
    async fn sync(&self, config: &ConfigStore, failures: i64, until: Option<DateTime<Utc>>) {
        if let Err(err) = config
            .set_i64(flags::CB_CONSECUTIVE_FAILURES, failures)
            .await
        {
            warn!(?err, "failed to sync breaker failure count");
        }
        let result = match until {
            Some(until) => config.set(flags::CB_TRIPPED_UNTIL, &format_utc(until)).await,
            None => config.delete(flags::CB_TRIPPED_UNTIL).await,
        };
        if let Err(err) = result {
            warn!(?err, "failed to sync breaker trip window");
        }
    }
}

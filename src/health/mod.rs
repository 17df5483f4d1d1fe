mod grader;

pub use grader::{WATCHDOG_INTERVAL_S, collect_metrics, grade, run_watchdog};

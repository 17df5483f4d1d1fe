pub mod lock;
pub mod runner;
pub mod store;

pub use runner::{DEFAULT_RUN_LIMIT, RUNNER_LOCK, RunOptions, Runner};
pub use store::StoreError;

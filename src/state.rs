use sqlx::SqlitePool;

use crate::config::ConfigStore;
use crate::queue::Runner;
use crate::vend::VendClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: ConfigStore,
    pub vend: VendClient,
    pub runner: Runner,
    /// Env bootstrap values; config-stored tokens written by
    /// /keys.rotate take precedence.
    pub admin_token_env: Option<String>,
    pub admin_token_prev_env: Option<String>,
    pub admin_token_prev_expires_env: Option<i64>,
}

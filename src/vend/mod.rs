pub mod breaker;
mod client;
mod error;
pub mod limiter;
pub mod oauth;

pub use breaker::{BreakerSnapshot, CircuitBreaker};
pub use client::{OnRateLimit, VendClient, VendResponse};
pub use error::{ErrorClass, VendError};

#[derive(Debug)]
pub enum StoreError {
    Db(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err)
    }
}

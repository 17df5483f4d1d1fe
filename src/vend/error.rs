/// Outcome classes for a failed vendor interaction, mapped onto the
/// queue's retry/DLQ decision by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Requeue with backoff.
    Transient,
    /// Move to DLQ on first occurrence.
    Fatal,
    /// Vendor-side replay detection; coerced to success.
    Duplicate,
}

#[derive(Debug, thiserror::Error)]
pub enum VendError {
    #[error("outbound http disabled")]
    Disabled,

    #[error("circuit breaker open until {until}")]
    BreakerOpen { until: String },

    #[error("local rate limit exceeded, retry in {retry_after_s}s")]
    RateLimited { retry_after_s: i64 },

    #[error("vendor returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("token refresh failed: {0}")]
    Auth(String),

    #[error("vendor config: {0}")]
    Config(String),
}

impl VendError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Disabled => ErrorClass::Fatal,
            Self::BreakerOpen { .. }
            | Self::RateLimited { .. }
            | Self::Network(_)
            | Self::Timeout
            | Self::Auth(_)
            | Self::Config(_) => ErrorClass::Transient,
            Self::Status { status, .. } => match status {
                409 => ErrorClass::Duplicate,
                408 | 425 | 429 => ErrorClass::Transient,
                500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Disabled => "http_disabled",
            Self::BreakerOpen { .. } => "breaker_open",
            Self::RateLimited { .. } => "rate_limited",
            Self::Network(_) | Self::Timeout => "transient_vendor",
            Self::Auth(_) => "unauthorized",
            Self::Config(_) => "vendor_config",
            Self::Status { status, .. } => match status {
                401 => "unauthorized",
                409 => "duplicate",
                408 | 425 | 429 | 500..=599 => "transient_vendor",
                _ => "validation",
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{ErrorClass, VendError};

    #[test]
    fn classification_matches_retry_policy() {
        assert_eq!(
            VendError::Status {
                status: 503,
                body: String::new()
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(
            VendError::Status {
                status: 409,
                body: String::new()
            }
            .class(),
            ErrorClass::Duplicate
        );
        assert_eq!(
            VendError::Status {
                status: 422,
                body: String::new()
            }
            .class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            VendError::RateLimited { retry_after_s: 5 }.class(),
            ErrorClass::Transient
        );
        assert_eq!(VendError::Disabled.class(), ErrorClass::Fatal);
    }
}

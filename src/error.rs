use axum::{
    Json,
    http::{StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};

pub use crate::types::api_error::{ApiErrorBody, ApiErrorCode, ApiErrorResponse};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("rate limited: {message}")]
    RateLimited { message: String, retry_after_s: i64 },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("database error")]
    Db(#[from] sqlx::Error),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_s: i64) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_s,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    fn into_response_parts(self) -> (StatusCode, ApiErrorCode, String, Option<i64>) {
        match self {
            Self::InvalidInput { message } => (
                StatusCode::BAD_REQUEST,
                ApiErrorCode::InvalidInput,
                message,
                None,
            ),
            Self::Unauthorized { message } => (
                StatusCode::UNAUTHORIZED,
                ApiErrorCode::Unauthorized,
                message,
                None,
            ),
            Self::Forbidden { message } => (
                StatusCode::FORBIDDEN,
                ApiErrorCode::Forbidden,
                message,
                None,
            ),
            Self::RateLimited {
                message,
                retry_after_s,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                ApiErrorCode::RateLimited,
                message,
                Some(retry_after_s),
            ),
            Self::NotFound { message } => {
                (StatusCode::NOT_FOUND, ApiErrorCode::NotFound, message, None)
            }
            Self::Conflict { message } => {
                (StatusCode::CONFLICT, ApiErrorCode::Conflict, message, None)
            }
            Self::Db(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorCode::Database,
                "database error".to_string(),
                None,
            ),
            Self::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorCode::Internal,
                message,
                None,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, retry_after_s) = self.into_response_parts();
        let body = Json(ApiErrorResponse {
            ok: false,
            error: ApiErrorBody { code, message },
        });
        match retry_after_s {
            Some(secs) => (status, [(RETRY_AFTER, secs.to_string())], body).into_response(),
            None => (status, body).into_response(),
        }
    }
}

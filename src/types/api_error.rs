use serde::{Deserialize, Serialize};
use specta::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorCode {
    InvalidInput,
    Unauthorized,
    Forbidden,
    RateLimited,
    NotFound,
    Conflict,
    Database,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ApiErrorBody {
    pub code: ApiErrorCode,
    pub message: String,
}

/// Error half of the `{ok, data?, error?}` response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ApiErrorResponse {
    pub ok: bool,
    pub error: ApiErrorBody,
}

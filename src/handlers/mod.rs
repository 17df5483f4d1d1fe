pub mod ops;
pub mod queue;
pub mod webhook;

use crate::error::ApiError;

pub(crate) fn map_queue_error(err: crate::queue::StoreError) -> ApiError {
    use crate::queue::StoreError;
    match err {
        StoreError::Conflict(message) => ApiError::conflict(message),
        StoreError::Db(db) => ApiError::Db(db),
        StoreError::NotFound(message) => ApiError::not_found(message),
        StoreError::Parse(message) => ApiError::internal(message),
    }
}

pub(crate) fn map_webhook_error(err: crate::webhook::StoreError) -> ApiError {
    use crate::webhook::StoreError;
    match err {
        StoreError::Conflict(message) => ApiError::conflict(message),
        StoreError::Db(db) => ApiError::Db(db),
        StoreError::NotFound(message) => ApiError::not_found(message),
        StoreError::Parse(message) => ApiError::internal(message),
    }
}

pub(crate) fn map_config_error(err: crate::config::StoreError) -> ApiError {
    match err {
        crate::config::StoreError::Db(db) => ApiError::Db(db),
    }
}

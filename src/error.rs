use std::fmt;

use log::error;

use crate::protocol::ErrorCode;

#[derive(serde::Serialize, Debug, Clone)]
pub struct StoreError {
    pub code: ErrorCode,
    pub message: String,
}

impl StoreError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            message: msg.to_string(),
        }
    }
    pub fn auth_failed(msg: &str) -> Self {
        Self {
            code: ErrorCode::AuthFailed,
            message: msg.to_string(),
        }
    }
    pub fn not_found(msg: &str) -> Self {
        Self {
            code: ErrorCode::NotFound,
            message: msg.to_string(),
        }
    }
    pub fn forbidden(msg: &str) -> Self {
        Self {
            code: ErrorCode::AuthorizationDenied,
            message: msg.to_string(),
        }
    }
    pub fn spoofed_identity(id: &str) -> Self {
        Self {
            code: ErrorCode::SpoofedIdentity,
            message: format!("Caller id \"{}\" uses the reserved group prefix", id),
        }
    }
    /// Refused permissions filter. Wraps the reason it was refused.
    pub fn filter_failed(cause: StoreError) -> Self {
        Self {
            code: ErrorCode::FilterConstructionFailed,
            message: format!("Authorization error! {}", cause.message),
        }
    }
    pub fn unavailable(msg: &str) -> Self {
        Self {
            code: ErrorCode::Unavailable,
            message: msg.to_string(),
        }
    }
    pub fn unsupported(msg: &str) -> Self {
        Self {
            code: ErrorCode::Unsupported,
            message: msg.to_string(),
        }
    }
    pub fn internal(msg: &str) -> Self {
        Self {
            code: ErrorCode::InternalServerError,
            message: msg.to_string(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for StoreError {}

/// Utility function for mapping any error into an Internal Server Error
pub fn internal_error<E>(err: E) -> StoreError
where
    E: std::error::Error,
{
    error!("internal error: {:?}", err);
    StoreError::internal(&err.to_string())
}

/// Maps a failure to reach the search engine. Callers may retry these.
pub fn unavailable_error<E>(err: E) -> StoreError
where
    E: std::error::Error,
{
    error!("search engine unavailable: {:?}", err);
    StoreError::unavailable(&err.to_string())
}

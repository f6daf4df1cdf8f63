//! Crate-wide error type and the local/sync error taxonomies of §4.4/§7.

use thiserror::Error;

/// Top-level crate error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid thing or shadow name: {0}")]
    InvalidName(String),

    #[error("invalid payload: {0}")]
    InvalidJson(String),

    #[error("state nesting exceeds maximum depth of {max}")]
    TooDeep { max: usize },

    #[error("document exceeds size limit of {limit} bytes (was {actual})")]
    PayloadTooLarge { limit: usize, actual: usize },

    #[error("version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("unauthorized")]
    Unauthorized,

    #[error("shadow not found: {thing}/{shadow}")]
    ShadowNotFound { thing: String, shadow: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP-shaped status code, per §4.4's error taxonomy.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidName(_)
            | Error::InvalidJson(_)
            | Error::TooDeep { .. }
            | Error::Json(_) => 400,
            Error::Unauthorized => 401,
            Error::ShadowNotFound { .. } => 404,
            Error::VersionConflict { .. } => 409,
            Error::PayloadTooLarge { .. } => 413,
            Error::Storage(_) | Error::Sqlite(_) | Error::Internal(_) => 500,
        }
    }

    /// Stable error code string, mirrors what local IPC responses carry in `errorCode`.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidName(_) => "InvalidRequest",
            Error::InvalidJson(_) | Error::Json(_) => "InvalidJson",
            Error::TooDeep { .. } => "InvalidStateDepth",
            Error::Unauthorized => "Unauthorized",
            Error::ShadowNotFound { .. } => "ResourceNotFound",
            Error::VersionConflict { .. } => "VersionConflict",
            Error::PayloadTooLarge { .. } => "RequestEntityTooLarge",
            Error::Storage(_) | Error::Sqlite(_) | Error::Internal(_) => "InternalError",
        }
    }

    /// The `{errorCode, message}` body a rejected local IPC call returns.
    pub fn to_rejection(&self) -> Rejection {
        Rejection {
            error_code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Body of a rejected `accepted`/`rejected` response over the local IPC surface.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Rejection {
    #[serde(rename = "errorCode")]
    pub error_code: String,
    pub message: String,
}

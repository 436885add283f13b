use serde::{Deserialize, Serialize};

/// Error taxonomy surfaced to API users. The HTTP layer maps `kind` to a
/// status code; `message` is always safe to echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Validation,
    NotFound,
    Forbidden,
    UpstreamUnavailable,
}

impl ApiErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            ApiErrorKind::Validation => 400,
            ApiErrorKind::NotFound => 404,
            ApiErrorKind::Forbidden => 403,
            ApiErrorKind::UpstreamUnavailable => 503,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError {
            kind: ApiErrorKind::Validation,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError {
            kind: ApiErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError {
            kind: ApiErrorKind::Forbidden,
            message: message.into(),
        }
    }

    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        ApiError {
            kind: ApiErrorKind::UpstreamUnavailable,
            message: message.into(),
        }
    }
}

/// Terminal failures of the whole worker process. Everything recoverable is
/// handled per policy by the runner and never reaches this level.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    #[error("no credentials found for the scanned target")]
    NoCredentials,

    #[error("license manager did not allow the job: {reason}")]
    LmDenied { reason: String },

    #[error("{0}")]
    Internal(String),
}

pub const EXIT_CODE_SUCCESS: i32 = 0;
pub const EXIT_CODE_UNEXPECTED: i32 = 1;
pub const EXIT_CODE_LM_DENIED: i32 = 2;
/// Event-driven jobs that failed on invalid credentials may be retried by
/// the batch backend.
pub const EXIT_CODE_RECOVERABLE: i32 = 126;

impl ExecutorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutorError::LmDenied { .. } => EXIT_CODE_LM_DENIED,
            _ => EXIT_CODE_UNEXPECTED,
        }
    }
}

/// Per-policy failure classification recorded in job statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display, strum_macros::EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyErrorType {
    Skipped,
    Access,
    Credentials,
    Client,
    Internal,
}

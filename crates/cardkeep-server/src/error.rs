//! HTTP error type for the cardkeep server.
//!
//! Maps domain errors from `cardkeep-core` into HTTP responses. Every
//! variant produces a JSON body with a machine-readable `error` field and a
//! human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use cardkeep_core::error::{
    AuthError, BackupError, EntryHistoryError, HistoryError, SettingsError, StoreError,
    WhitelistError,
};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Not logged in, or bad credentials.
    Unauthorized(String),
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// The target already exists.
    Conflict(String),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Internal(msg) => {
                error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<SettingsError> for AppError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Invalid { .. } => Self::BadRequest(err.to_string()),
            SettingsError::Io { .. } | SettingsError::Parse { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

impl From<WhitelistError> for AppError {
    fn from(err: WhitelistError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::InvalidId { .. } | StoreError::InvalidDocument { .. } => {
                Self::BadRequest(err.to_string())
            }
            StoreError::Conflict { .. } => Self::Conflict(err.to_string()),
            StoreError::Io { .. } | StoreError::Parse { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<HistoryError> for AppError {
    fn from(err: HistoryError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<EntryHistoryError> for AppError {
    fn from(err: EntryHistoryError) -> Self {
        match err {
            EntryHistoryError::Store(inner) => inner.into(),
            EntryHistoryError::History(inner) => inner.into(),
        }
    }
}

impl From<BackupError> for AppError {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::NotFound { .. } => Self::NotFound(err.to_string()),
            BackupError::InvalidId { .. } | BackupError::InvalidSchedule { .. } => {
                Self::BadRequest(err.to_string())
            }
            BackupError::Settings(inner) => inner.into(),
            BackupError::Io { .. } | BackupError::Task { .. } => Self::Internal(err.to_string()),
        }
    }
}

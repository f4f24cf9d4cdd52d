//! Error types for `cardkeep-core`.
//!
//! Variants carry the id or path involved so a log line is enough to find
//! the offending file. Credentials and session tokens never appear in error
//! text.

use cardkeep_storage::StorageError;

/// Errors from loading or saving the JSON settings file.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read or written.
    #[error("settings file '{path}': {reason}")]
    Io { path: String, reason: String },

    /// The settings file is not valid JSON for the settings schema.
    #[error("invalid settings file '{path}': {reason}")]
    Parse { path: String, reason: String },

    /// A submitted value failed validation.
    #[error("invalid setting '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

/// Errors from login and session handling.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Username or password did not match.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// No session exists for the presented token.
    #[error("session not found")]
    InvalidSession,

    /// The session existed but has expired.
    #[error("session expired at {expired_at}")]
    SessionExpired { expired_at: String },
}

/// Errors from parsing IP whitelist rules.
#[derive(Debug, thiserror::Error)]
pub enum WhitelistError {
    /// The rule is not an IP address, CIDR block, or wildcard pattern.
    #[error("invalid whitelist rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}

/// Errors from the card, lorebook, UI metadata and resource stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested file does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The id or path is malformed or escapes its root directory.
    #[error("invalid id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    /// The submitted document is not acceptable.
    #[error("invalid document: {reason}")]
    InvalidDocument { reason: String },

    /// The target of a create or move already exists.
    #[error("already exists: {id}")]
    Conflict { id: String },

    /// A filesystem operation failed.
    #[error("io error on '{path}': {reason}")]
    Io { path: String, reason: String },

    /// A stored file is not valid JSON.
    #[error("failed to parse '{path}': {reason}")]
    Parse { path: String, reason: String },
}

/// Errors from the world-info entry history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// A stored record could not be encoded or decoded.
    #[error("history record serialization failed: {reason}")]
    Serialization { reason: String },

    /// The storage backend failed.
    #[error("history storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from reading one entry's history through its lorebook id.
#[derive(Debug, thiserror::Error)]
pub enum EntryHistoryError {
    /// The lorebook id is invalid.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The history backend failed.
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Errors from backup, restore and schedule operations.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// No backup with this id exists.
    #[error("backup not found: {id}")]
    NotFound { id: String },

    /// The backup id contains characters outside `[A-Za-z0-9_-]`.
    #[error("invalid backup id '{id}'")]
    InvalidId { id: String },

    /// The schedule update is not valid.
    #[error("invalid backup schedule: {reason}")]
    InvalidSchedule { reason: String },

    /// A filesystem operation failed.
    #[error("backup io error on '{path}': {reason}")]
    Io { path: String, reason: String },

    /// Persisting the schedule failed.
    #[error("backup settings error: {0}")]
    Settings(#[from] SettingsError),

    /// The blocking copy task did not complete.
    #[error("backup task failed: {reason}")]
    Task { reason: String },
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl BackupError {
    pub(crate) fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

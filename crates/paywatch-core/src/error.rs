//! Core error types for paywatch-core.
//!
//! This module defines the error hierarchy using thiserror. Errors never
//! escape a wake: the dispatcher folds them into the wake's report so the
//! host process keeps running.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for paywatch-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Durable store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Notification host errors
    #[error("Notification error: {0}")]
    Present(#[from] PresentError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing medium cannot be opened (missing, corrupted, or written
    /// by a newer schema). Callers skip the wake's notification work.
    #[error("Store unavailable at {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Store is locked")]
    Locked,

    /// A stored value could not be decoded
    #[error("Corrupt record {collection}/{key}: {message}")]
    CorruptRecord {
        collection: String,
        key: String,
        message: String,
    },

    /// A value could not be encoded for storage
    #[error("Failed to encode record {collection}/{key}: {message}")]
    EncodeFailed {
        collection: String,
        key: String,
        message: String,
    },
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Notification host errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresentError {
    /// The host cannot schedule notifications for a future time
    #[error("Host does not support scheduled notifications")]
    TriggerUnsupported,

    /// The host refused to show the notification
    #[error("Host rejected notification '{tag}': {message}")]
    Rejected { tag: String, message: String },

    /// The host's own bookkeeping failed
    #[error("Notification host failure: {0}")]
    HostFailure(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Due day outside 1..=31
    #[error("Invalid due day {0}: expected 1-31")]
    InvalidDueDay(u8),

    /// Malformed cycle string
    #[error("Invalid cycle '{0}': expected YYYY-MM")]
    InvalidCycle(String),

    /// Malformed daily check time
    #[error("Invalid time '{0}': expected HH:MM")]
    InvalidTime(String),

    /// Malformed dedup key
    #[error("Invalid dedup key '{0}'")]
    InvalidDedupKey(String),

    /// Malformed application message
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => match inner.code {
                rusqlite::ErrorCode::DatabaseLocked | rusqlite::ErrorCode::DatabaseBusy => {
                    StoreError::Locked
                }
                _ => StoreError::QueryFailed(err.to_string()),
            },
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

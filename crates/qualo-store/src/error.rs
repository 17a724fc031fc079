// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Repository error types.
//!
//! The split between transient and fatal matters: transient errors are
//! retried with backoff by the callers, fatal ones abort the current
//! activity.

use thiserror::Error;

/// Result type using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the repository layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not establish a session with the backend. Fatal.
    #[error("failed to connect to repository at '{url}': {details}")]
    ConnectFailed {
        /// The backend URL.
        url: String,
        /// Connection error details.
        details: String,
    },

    /// A retryable failure; the caller should back off and try again.
    #[error("transient repository error during '{operation}': {details}")]
    Transient {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A non-retryable failure; the current activity must abort.
    #[error("fatal repository error during '{operation}': {details}")]
    Fatal {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A stored record could not be decoded into the requested type.
    #[error("failed to decode stored object '{path}': {details}")]
    Decode {
        /// The repository path of the record.
        path: String,
        /// Decoder details.
        details: String,
    },
}

impl StoreError {
    /// Stable code string for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectFailed { .. } => "DATABASE_FATAL",
            Self::Transient { .. } => "DATABASE_TRANSIENT",
            Self::Fatal { .. } => "DATABASE_FATAL",
            Self::Decode { .. } => "DECODE_FAILURE",
        }
    }

    /// Whether retrying can help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Escalate a transient error to fatal after retries are exhausted.
    pub fn into_fatal(self) -> StoreError {
        match self {
            Self::Transient { operation, details } => Self::Fatal {
                operation,
                details: format!("retries exhausted: {}", details),
            },
            other => other,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                StoreError::Transient {
                    operation: "query".to_string(),
                    details: err.to_string(),
                }
            }
            sqlx::Error::Database(db) if db.message().contains("locked") => StoreError::Transient {
                operation: "query".to_string(),
                details: err.to_string(),
            },
            _ => StoreError::Fatal {
                operation: "query".to_string(),
                details: err.to_string(),
            },
        }
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Errors of the event-bus layer.

use thiserror::Error;

/// Result type using EventError
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors from consumers and the poller.
#[derive(Debug, Error)]
pub enum EventError {
    /// Poll was called before subscribing to a topic.
    #[error("consumer is not subscribed to any topic")]
    NotSubscribed,

    /// The bus rejected an operation.
    #[error("bus error during '{operation}': {details}")]
    Bus {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A record payload could not be decoded.
    ///
    /// The poller counts and skips these; they only surface when a caller
    /// decodes a single record directly.
    #[error("failed to decode record: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl EventError {
    /// Stable code string for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotSubscribed => "NOT_SUBSCRIBED",
            Self::Bus { .. } => "BUS_ERROR",
            Self::Decode(_) => "DECODE_FAILURE",
        }
    }
}

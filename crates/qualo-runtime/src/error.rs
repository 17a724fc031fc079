// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime error type.
//!
//! Wraps the layer errors and adds the lifecycle kinds the runners produce
//! themselves.

use qualo_core::CoreError;
use qualo_events::EventError;
use qualo_store::StoreError;
use thiserror::Error;

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors surfaced by the runtimes.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A core data-model error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A repository error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An event-bus error.
    #[error(transparent)]
    Event(#[from] EventError),

    /// Configuration is invalid beyond recovery.
    #[error("fatal configuration error: {details}")]
    FatalConfiguration {
        /// What was wrong.
        details: String,
    },

    /// A lifecycle phase exceeded its deadline.
    #[error("phase '{phase}' exceeded its deadline of {timeout_ms} ms")]
    PhaseTimeout {
        /// The phase that timed out.
        phase: String,
        /// The deadline that was exceeded.
        timeout_ms: u64,
    },

    /// A lifecycle message arrived in a state that does not accept it.
    #[error("invalid lifecycle transition: {details}")]
    InvalidTransition {
        /// What was attempted and in which state.
        details: String,
    },
}

impl RuntimeError {
    /// Stable code string for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Core(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Event(e) => e.error_code(),
            Self::FatalConfiguration { .. } => "FATAL_CONFIGURATION",
            Self::PhaseTimeout { .. } => "PHASE_TIMEOUT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }

    /// Shorthand for a fatal configuration error.
    pub fn fatal_config(details: impl Into<String>) -> Self {
        Self::FatalConfiguration {
            details: details.into(),
        }
    }
}

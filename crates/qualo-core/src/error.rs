// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error taxonomy for the qualo core.
//!
//! Every error kind carries a stable code string used by log sites and
//! failure counters across the runtimes.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors shared across the framework.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Configuration is invalid beyond recovery; the runtime must abort.
    FatalConfiguration {
        /// What was wrong with the configuration.
        details: String,
    },

    /// An object name is already registered with a different payload.
    DuplicatePublication {
        /// The local object name that clashed.
        name: String,
    },

    /// A named object or actor is not known to the registry asked.
    ObjectNotFound {
        /// The name that could not be resolved.
        name: String,
    },

    /// A configured reference object could not be retrieved.
    ReferenceNotFound {
        /// The repository path of the missing reference.
        path: String,
    },

    /// A record or payload could not be decoded; the record is skipped.
    DecodeFailure {
        /// Decoder context (bus record, payload snapshot, ...).
        context: String,
        /// Decoder error details.
        details: String,
    },

    /// Two merge classes met on the same publication path.
    InconsistentMergeHint {
        /// The publication path affected.
        path: String,
        /// The class already established for the path.
        expected: String,
        /// The class carried by the offending input.
        actual: String,
    },

    /// A lifecycle phase exceeded its deadline.
    PhaseTimeout {
        /// The phase that timed out.
        phase: String,
    },
}

impl CoreError {
    /// Stable code string for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::FatalConfiguration { .. } => "FATAL_CONFIGURATION",
            Self::DuplicatePublication { .. } => "DUPLICATE_PUBLICATION",
            Self::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            Self::ReferenceNotFound { .. } => "REFERENCE_NOT_FOUND",
            Self::DecodeFailure { .. } => "DECODE_FAILURE",
            Self::InconsistentMergeHint { .. } => "INCONSISTENT_MERGE_HINT",
            Self::PhaseTimeout { .. } => "PHASE_TIMEOUT",
        }
    }

    /// Whether the caller may recover locally (per the error policy table).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ObjectNotFound { .. } | Self::ReferenceNotFound { .. } | Self::DecodeFailure { .. }
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FatalConfiguration { details } => {
                write!(f, "Fatal configuration error: {}", details)
            }
            Self::DuplicatePublication { name } => {
                write!(f, "Object '{}' is already being published", name)
            }
            Self::ObjectNotFound { name } => {
                write!(f, "Object '{}' not found", name)
            }
            Self::ReferenceNotFound { path } => {
                write!(f, "Reference object '{}' not found", path)
            }
            Self::DecodeFailure { context, details } => {
                write!(f, "Failed to decode {}: {}", context, details)
            }
            Self::InconsistentMergeHint {
                path,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Inconsistent merge hint on '{}': expected '{}', got '{}'",
                    path, expected, actual
                )
            }
            Self::PhaseTimeout { phase } => {
                write!(f, "Phase '{}' exceeded its deadline", phase)
            }
        }
    }
}

impl std::error::Error for CoreError {}

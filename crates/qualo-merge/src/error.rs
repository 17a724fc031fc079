// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Errors produced while reducing monitor object streams.

use qualo_core::MergeClass;
use thiserror::Error;

/// Result type using MergeError
pub type Result<T> = std::result::Result<T, MergeError>;

/// Errors from the merge algorithm and the merger actor.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Two merge classes met on the same publication path. Fatal for the
    /// affected path, not for its neighbours.
    #[error("inconsistent merge hint on '{path}': expected '{expected}', got '{actual}'")]
    InconsistentMergeHint {
        /// The publication path affected.
        path: String,
        /// The class established by the first sample.
        expected: MergeClass,
        /// The class carried by the offending input.
        actual: MergeClass,
    },

    /// Histograms on the same path disagree on their axis definition.
    #[error("incompatible binning on '{path}'")]
    IncompatibleBinning {
        /// The publication path affected.
        path: String,
    },

    /// The payload class declares itself non-mergeable.
    #[error("payload on '{path}' is not mergeable")]
    NotMergeable {
        /// The publication path affected.
        path: String,
    },
}

impl MergeError {
    /// Stable code string for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InconsistentMergeHint { .. } => "INCONSISTENT_MERGE_HINT",
            Self::IncompatibleBinning { .. } => "INCOMPATIBLE_BINNING",
            Self::NotMergeable { .. } => "NOT_MERGEABLE",
        }
    }

    /// The publication path the error belongs to.
    pub fn path(&self) -> &str {
        match self {
            Self::InconsistentMergeHint { path, .. }
            | Self::IncompatibleBinning { path }
            | Self::NotMergeable { path } => path,
        }
    }
}

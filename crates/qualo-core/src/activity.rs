// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Activity descriptors and validity intervals.
//!
//! An [`Activity`] identifies a logical run (or another data-taking
//! partition) and its validity window. It is immutable once a task has
//! started; the SOR/EOR triggers fill unset fields from run-transition
//! events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Time interval in milliseconds since epoch.
///
/// A freshly created interval is inverted (`min > max`) and reported invalid
/// until the first sample arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityInterval {
    /// Start of the interval (inclusive), ms since epoch.
    pub min: u64,
    /// End of the interval (inclusive), ms since epoch.
    pub max: u64,
}

impl ValidityInterval {
    /// An interval that contains nothing.
    pub const INVALID: ValidityInterval = ValidityInterval {
        min: u64::MAX,
        max: 0,
    };

    /// Create an interval from explicit bounds.
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Whether the interval contains at least one instant.
    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    /// Grow the interval to include `timestamp`.
    pub fn update(&mut self, timestamp: u64) {
        self.min = self.min.min(timestamp);
        self.max = self.max.max(timestamp);
    }

    /// Grow the interval to include all of `other`.
    pub fn extend(&mut self, other: &ValidityInterval) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Whether `timestamp` falls inside the interval.
    pub fn contains(&self, timestamp: u64) -> bool {
        self.min <= timestamp && timestamp <= self.max
    }
}

impl Default for ValidityInterval {
    fn default() -> Self {
        Self::INVALID
    }
}

/// A logical run and its identity within the production system.
///
/// A zero `id` and an empty `partition_name` act as wildcards when matching
/// against run-transition events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Activity {
    /// Run number; `0` means "not bound to a run yet".
    pub id: u32,
    /// Run type, e.g. `PHYSICS`, `TECHNICAL`.
    #[serde(default)]
    pub kind: String,
    /// Environment / partition identifier; empty means unset.
    #[serde(default)]
    pub partition_name: String,
    /// Validity window of the data taken in this activity.
    #[serde(default)]
    pub validity: ValidityInterval,
    /// Beam type, e.g. `pp`, `PbPb`; empty means unset.
    #[serde(default)]
    pub beam_type: String,
    /// Reconstruction pass name; empty means unset.
    #[serde(default)]
    pub pass_name: String,
    /// Data-taking period name; empty means unset.
    #[serde(default)]
    pub period_name: String,
}

impl Activity {
    /// Create an activity bound to a run number and partition.
    pub fn new(id: u32, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Whether `(run_number, environment_id)` is consistent with this
    /// activity: an unset field matches anything, a set field must be equal.
    pub fn matches(&self, run_number: u32, environment_id: &str) -> bool {
        (self.id == 0 || self.id == run_number)
            && (self.partition_name.is_empty() || self.partition_name == environment_id)
    }

    /// Return a copy with unset identity fields filled from the given pair.
    pub fn filled_from(&self, run_number: u32, environment_id: &str) -> Activity {
        let mut filled = self.clone();
        if filled.id == 0 {
            filled.id = run_number;
        }
        if filled.partition_name.is_empty() {
            filled.partition_name = environment_id.to_string();
        }
        filled
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {} ({})", self.id, self.kind)?;
        if !self.partition_name.is_empty() {
            write!(f, " in {}", self.partition_name)?;
        }
        Ok(())
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quality objects: published check verdicts.
//!
//! A [`QualityObject`] is the persisted form of a check result - the quality
//! itself plus the provenance needed to trace it back: which check produced
//! it, over which input objects, during which activity.

use crate::activity::{Activity, ValidityInterval};
use crate::object::REPO_PATH_PREFIX;
use crate::quality::Quality;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Build the repository path for a published quality object.
pub fn quality_path(detector: &str, check_name: &str) -> String {
    format!("{}/{}/QO/{}", REPO_PATH_PREFIX, detector, check_name)
}

/// A check verdict published to the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityObject {
    /// Name of the check (or aggregator) that produced the verdict.
    pub check_name: String,
    /// Detector code the check belongs to.
    pub detector_name: String,
    /// The verdict itself.
    pub quality: Quality,
    /// Paths of the monitor objects the verdict was derived from.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// The activity the verdict applies to.
    pub activity: Activity,
    /// Validity window of the verdict.
    #[serde(default)]
    pub validity: ValidityInterval,
}

impl QualityObject {
    /// Create a quality object for a check.
    pub fn new(
        check_name: impl Into<String>,
        detector_name: impl Into<String>,
        quality: Quality,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            detector_name: detector_name.into(),
            quality,
            inputs: Vec::new(),
            activity: Activity::default(),
            validity: ValidityInterval::default(),
        }
    }

    /// The publication key of this quality object.
    pub fn path(&self) -> String {
        quality_path(&self.detector_name, &self.check_name)
    }
}

impl fmt::Display for QualityObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path(), self.quality)
    }
}

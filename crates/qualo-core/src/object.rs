// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Monitor objects: named, versioned statistical payloads.
//!
//! A [`MonitorObject`] couples a payload with its provenance (task,
//! detector, activity), free-form metadata and an optional attached
//! [`Quality`]. Its repository path is derived from provenance, so an object
//! cannot be published under a path that contradicts its owner.

use crate::activity::{Activity, ValidityInterval};
use crate::payload::{MergeClass, Payload};
use crate::quality::Quality;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved metadata keys understood by the dashboards and the merger.
pub mod metadata_keys {
    /// Default draw options for the object ("colz", "logy", ...).
    pub const DRAW_OPTIONS: &str = "drawOptions";
    /// Display hints for the layout engine.
    pub const DISPLAY_HINTS: &str = "displayHints";
    /// Run number the object was produced in.
    pub const RUN_NUMBER: &str = "RunNumber";
    /// Monotonic cycle counter stamped by the task runner.
    pub const CYCLE_NUMBER: &str = "cycleNumber";
    /// Number of warnings a check attached.
    pub const N_WARNINGS: &str = "nWarnings";
    /// Number of errors a check attached.
    pub const N_ERRORS: &str = "nErrors";
}

/// Prefix of every repository path published by the framework.
pub const REPO_PATH_PREFIX: &str = "qc";

/// Build the repository path for a published object.
pub fn object_path(detector: &str, task: &str, name: &str) -> String {
    format!("{}/{}/{}/{}", REPO_PATH_PREFIX, detector, task, name)
}

/// A named, versioned statistical payload under a repository path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorObject {
    /// Local label within the owning task.
    pub name: String,
    /// Name of the task that produces the object.
    pub task_name: String,
    /// Detector code, e.g. `TST`, `TOF`.
    pub detector_name: String,
    /// The statistical payload.
    pub payload: Payload,
    /// Free-form annotations surfaced to the dashboards.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// The activity the data belongs to.
    pub activity: Activity,
    /// Validity window of the accumulated data.
    #[serde(default)]
    pub validity: ValidityInterval,
    /// Quality attached by a check, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
}

impl MonitorObject {
    /// Create an object owned by `(detector, task)`.
    pub fn new(
        name: impl Into<String>,
        task_name: impl Into<String>,
        detector_name: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            name: name.into(),
            task_name: task_name.into(),
            detector_name: detector_name.into(),
            payload,
            metadata: BTreeMap::new(),
            activity: Activity::default(),
            validity: ValidityInterval::default(),
            quality: None,
        }
    }

    /// The publication key of this object.
    pub fn path(&self) -> String {
        object_path(&self.detector_name, &self.task_name, &self.name)
    }

    /// The merge class declared by the payload.
    pub fn merge_class(&self) -> MergeClass {
        self.payload.merge_class()
    }

    /// Add a metadata entry; an existing key is left untouched.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Set a metadata entry, overwriting a previous value.
    pub fn add_or_update_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Metadata value for `key`, if present.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Default draw options, empty if never set.
    pub fn draw_options(&self) -> &str {
        self.metadata(metadata_keys::DRAW_OPTIONS).unwrap_or("")
    }

    /// Bind the object to an activity and stamp the run number metadata.
    pub fn set_activity(&mut self, activity: &Activity) {
        self.activity = activity.clone();
        self.add_or_update_metadata(metadata_keys::RUN_NUMBER, activity.id.to_string());
    }

    /// Attach a quality, replacing a previous verdict.
    pub fn set_quality(&mut self, quality: Quality) {
        self.quality = Some(quality);
    }

    /// Discard accumulated statistics and the attached quality.
    pub fn reset(&mut self) {
        self.payload.reset();
        self.validity = ValidityInterval::default();
        self.quality = None;
    }
}

impl fmt::Display for MonitorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// An ordered snapshot of one task's published objects.
///
/// Produced by the objects manager at end of cycle and consumed by the
/// merger and the repository. Order is registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MonitorObjectCollection {
    /// Name of the producing task.
    pub task_name: String,
    /// The objects, in registration order.
    pub objects: Vec<MonitorObject>,
}

impl MonitorObjectCollection {
    /// Create an empty collection for `task_name`.
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            objects: Vec::new(),
        }
    }

    /// Find an object by its local name.
    pub fn find(&self, name: &str) -> Option<&MonitorObject> {
        self.objects.iter().find(|mo| mo.name == name)
    }

    /// Find an object by its local name, mutably.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut MonitorObject> {
        self.objects.iter_mut().find(|mo| mo.name == name)
    }

    /// Number of objects in the collection.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

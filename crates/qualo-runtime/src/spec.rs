// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Infrastructure specification reader.
//!
//! The runner binaries are configured by a JSON document naming the tasks,
//! checks, aggregators and post-processing entries of a deployment. The
//! reader only validates structure and policy/trigger vocabulary; wiring
//! the user implementations to the names is the binary's job.

use crate::error::{Result, RuntimeError};
use crate::policy::UpdatePolicy;
use qualo_core::CustomParameters;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

/// A task entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    /// Task name.
    pub name: String,
    /// Detector code.
    pub detector: String,
    /// Cycle duration in seconds.
    #[serde(default = "default_cycle_seconds")]
    pub cycle_duration_seconds: u64,
    /// Flat user tunables, bound to the default run and beam type.
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

fn default_cycle_seconds() -> u64 {
    10
}

/// A check entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckEntry {
    /// Check name.
    pub name: String,
    /// Detector code.
    pub detector: String,
    /// Readiness policy name.
    #[serde(default = "default_policy")]
    pub policy: String,
    /// Subscribed object paths.
    #[serde(default)]
    pub objects: Vec<String>,
    /// Subscribe to everything the runner sees.
    #[serde(default)]
    pub all_objects: bool,
    /// Hide objects that did not advance.
    #[serde(default)]
    pub only_updated: bool,
    /// Flat user tunables.
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

fn default_policy() -> String {
    "OnAny".to_string()
}

/// An aggregator entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorEntry {
    /// Aggregator name.
    pub name: String,
    /// Detector code.
    pub detector: String,
    /// Readiness policy name.
    #[serde(default = "default_policy")]
    pub policy: String,
    /// Source check names.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Flat user tunables.
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

/// A post-processing entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessingEntry {
    /// Task name.
    pub name: String,
    /// Detector code.
    pub detector: String,
    /// Trigger expressions starting an interval.
    #[serde(default)]
    pub init_triggers: Vec<String>,
    /// Trigger expressions producing updates.
    #[serde(default)]
    pub update_triggers: Vec<String>,
    /// Trigger expressions ending the interval.
    #[serde(default)]
    pub stop_triggers: Vec<String>,
    /// Flat user tunables.
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

/// The whole deployment description.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    /// Repository URL (database file or service endpoint).
    #[serde(default)]
    pub repository_url: String,
    /// Broker URL of the run-transition bus.
    #[serde(default)]
    pub bus_url: String,
    /// Topic carrying run transitions.
    #[serde(default)]
    pub bus_topic: String,
    /// Task entries.
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
    /// Check entries.
    #[serde(default)]
    pub checks: Vec<CheckEntry>,
    /// Aggregator entries.
    #[serde(default)]
    pub aggregators: Vec<AggregatorEntry>,
    /// Post-processing entries.
    #[serde(default)]
    pub post_processing: Vec<PostProcessingEntry>,
}

impl InfrastructureSpec {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: InfrastructureSpec = serde_json::from_str(json)
            .map_err(|e| RuntimeError::fatal_config(format!("invalid infrastructure spec: {}", e)))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Read and validate a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::fatal_config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<()> {
        for check in &self.checks {
            UpdatePolicy::from_str(&check.policy)?;
        }
        for aggregator in &self.aggregators {
            UpdatePolicy::from_str(&aggregator.policy)?;
        }
        for task in &self.tasks {
            if task.name.is_empty() {
                return Err(RuntimeError::fatal_config("task with an empty name"));
            }
            if task.cycle_duration_seconds == 0 {
                return Err(RuntimeError::fatal_config(format!(
                    "task '{}' has a zero cycle duration",
                    task.name
                )));
            }
        }
        Ok(())
    }
}

/// Turn a flat parameter map into default-bound custom parameters.
pub fn params_from_map(map: &HashMap<String, String>) -> CustomParameters {
    let mut params = CustomParameters::new();
    for (key, value) in map {
        params.set(key.clone(), value.clone());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"{
        "repositoryUrl": "qc.db",
        "busTopic": "run-transitions",
        "tasks": [
            {
                "name": "skeletonTask",
                "detector": "TST",
                "cycleDurationSeconds": 5,
                "customParameters": { "thresholdWarning": "0.7" }
            }
        ],
        "checks": [
            {
                "name": "skeletonCheck",
                "detector": "TST",
                "policy": "OnAnyNonZero",
                "objects": ["qc/TST/skeletonTask/hExample"],
                "onlyUpdated": true
            }
        ],
        "aggregators": [
            {
                "name": "detectorQuality",
                "detector": "TST",
                "sources": ["skeletonCheck"]
            }
        ],
        "postProcessing": [
            {
                "name": "skeletonPP",
                "detector": "TST",
                "initTriggers": ["sor"],
                "updateTriggers": ["10s"],
                "stopTriggers": ["eor"]
            }
        ]
    }"#;

    #[test]
    fn test_parses_a_full_spec() {
        let spec = InfrastructureSpec::from_json(SPEC).unwrap();
        assert_eq!(spec.tasks.len(), 1);
        assert_eq!(spec.tasks[0].cycle_duration_seconds, 5);
        assert_eq!(spec.checks[0].policy, "OnAnyNonZero");
        assert!(spec.checks[0].only_updated);
        assert_eq!(spec.aggregators[0].sources, vec!["skeletonCheck"]);
        assert_eq!(spec.post_processing[0].init_triggers, vec!["sor"]);

        let params = params_from_map(&spec.tasks[0].custom_parameters);
        assert_eq!(params.at_default("thresholdWarning"), Some("0.7"));
    }

    #[test]
    fn test_defaults_apply() {
        let spec = InfrastructureSpec::from_json(
            r#"{"tasks": [{"name": "t", "detector": "TST"}], "checks": [{"name": "c", "detector": "TST"}]}"#,
        )
        .unwrap();
        assert_eq!(spec.tasks[0].cycle_duration_seconds, 10);
        assert_eq!(spec.checks[0].policy, "OnAny");
        assert!(!spec.checks[0].all_objects);
    }

    #[test]
    fn test_unknown_policy_is_fatal() {
        let err = InfrastructureSpec::from_json(
            r#"{"checks": [{"name": "c", "detector": "TST", "policy": "OnSometimes"}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "FATAL_CONFIGURATION");
    }

    #[test]
    fn test_malformed_json_is_fatal() {
        let err = InfrastructureSpec::from_json("{not json").unwrap_err();
        assert_eq!(err.error_code(), "FATAL_CONFIGURATION");
    }

    #[test]
    fn test_zero_cycle_is_fatal() {
        let err = InfrastructureSpec::from_json(
            r#"{"tasks": [{"name": "t", "detector": "TST", "cycleDurationSeconds": 0}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "FATAL_CONFIGURATION");
    }
}

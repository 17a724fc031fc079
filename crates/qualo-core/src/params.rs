// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! User-provided tunables with activity-dependent fallback.
//!
//! A value can be bound to a specific run type and/or beam type; lookups
//! fall back from the most specific binding to the `default` one, and
//! finally to the caller's hard-coded default.

use crate::activity::Activity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The binding used when no run/beam-specific value exists.
pub const DEFAULT_BINDING: &str = "default";

/// Multimap of user tunables: run type -> beam type -> key -> value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomParameters {
    params: HashMap<String, HashMap<String, HashMap<String, String>>>,
}

impl CustomParameters {
    /// An empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value for the default run and beam type.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set_for(key, value, DEFAULT_BINDING, DEFAULT_BINDING);
    }

    /// Set a value for a specific run type and beam type.
    pub fn set_for(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        run_type: impl Into<String>,
        beam_type: impl Into<String>,
    ) {
        self.params
            .entry(run_type.into())
            .or_default()
            .entry(beam_type.into())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Value for `key` under exactly `(run_type, beam_type)`, no fallback.
    pub fn at_exact(&self, key: &str, run_type: &str, beam_type: &str) -> Option<&str> {
        self.params
            .get(run_type)?
            .get(beam_type)?
            .get(key)
            .map(String::as_str)
    }

    /// Value for `key` with the standard fallback chain:
    /// `(run, beam)` → `(run, default)` → `(default, beam)` → `(default, default)`.
    pub fn at(&self, key: &str, run_type: &str, beam_type: &str) -> Option<&str> {
        self.at_exact(key, run_type, beam_type)
            .or_else(|| self.at_exact(key, run_type, DEFAULT_BINDING))
            .or_else(|| self.at_exact(key, DEFAULT_BINDING, beam_type))
            .or_else(|| self.at_exact(key, DEFAULT_BINDING, DEFAULT_BINDING))
    }

    /// Value for `key` resolved against an activity's run and beam type.
    pub fn at_optional(&self, key: &str, activity: &Activity) -> Option<&str> {
        let run_type = if activity.kind.is_empty() {
            DEFAULT_BINDING
        } else {
            activity.kind.as_str()
        };
        let beam_type = if activity.beam_type.is_empty() {
            DEFAULT_BINDING
        } else {
            activity.beam_type.as_str()
        };
        self.at(key, run_type, beam_type)
    }

    /// Value for `key` under the default bindings.
    pub fn at_default(&self, key: &str) -> Option<&str> {
        self.at_exact(key, DEFAULT_BINDING, DEFAULT_BINDING)
    }

    /// Value for `key` under the default bindings, or the given default.
    pub fn at_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.at_default(key).unwrap_or(default)
    }

    /// Parse the value for `key` under an activity, falling back to `default`
    /// when the key is absent or unparsable.
    pub fn parsed_or<T: std::str::FromStr>(&self, key: &str, activity: &Activity, default: T) -> T {
        self.at_optional(key, activity)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Parse a comma-separated list value (e.g. `ChannelIDs`,
    /// `binsToIgnore`); an absent key yields an empty list and unparsable
    /// elements are skipped.
    pub fn parsed_list<T: std::str::FromStr>(&self, key: &str, activity: &Activity) -> Vec<T> {
        self.at_optional(key, activity)
            .map(|value| {
                value
                    .split(',')
                    .filter_map(|item| item.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether any value exists for `key` under the fallback chain.
    pub fn contains(&self, key: &str, run_type: &str, beam_type: &str) -> bool {
        self.at(key, run_type, beam_type).is_some()
    }
}

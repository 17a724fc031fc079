// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Closed registry of quality flags.
//!
//! Flag types are fixed at link time so that dashboards can rely on a finite
//! ontology. Each flag has a stable numeric id, a human-readable name and a
//! severity hint. Adding a flag is a code change: extend [`FlagType::ALL`]
//! and the associated constants together.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A flag type from the closed registry.
///
/// Instances are only obtainable through the associated constants or
/// [`FlagType::by_id`] / [`FlagType::by_name`], which keeps the registry
/// closed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlagType {
    id: u32,
    name: &'static str,
    /// Whether data carrying this flag should be considered unusable.
    bad: bool,
}

impl FlagType {
    /// Cause of the quality could not be determined.
    pub const UNKNOWN: FlagType = FlagType::new(1, "Unknown", true);
    /// The detector delivered no data at all.
    pub const NO_DETECTOR_DATA: FlagType = FlagType::new(10, "NoDetectorData", true);
    /// Part of the detector acceptance was missing.
    pub const LIMITED_ACCEPTANCE: FlagType = FlagType::new(11, "LimitedAcceptance", false);
    /// Tracking performance was out of bounds.
    pub const BAD_TRACKING: FlagType = FlagType::new(20, "BadTracking", true);
    /// Electromagnetic calorimetry was out of bounds.
    pub const BAD_EM_CALORIMETRY: FlagType = FlagType::new(21, "BadEMCalorimetry", true);
    /// Particle identification was out of bounds.
    pub const BAD_PID: FlagType = FlagType::new(22, "BadPID", true);
    /// A configured reference object could not be retrieved.
    pub const REFERENCE_NOT_FOUND: FlagType = FlagType::new(30, "ReferenceNotFound", false);
    /// Not enough statistics to decide.
    pub const INSUFFICIENT_STATISTICS: FlagType = FlagType::new(31, "InsufficientStatistics", false);

    /// Every flag in the registry, in id order.
    pub const ALL: &'static [FlagType] = &[
        Self::UNKNOWN,
        Self::NO_DETECTOR_DATA,
        Self::LIMITED_ACCEPTANCE,
        Self::BAD_TRACKING,
        Self::BAD_EM_CALORIMETRY,
        Self::BAD_PID,
        Self::REFERENCE_NOT_FOUND,
        Self::INSUFFICIENT_STATISTICS,
    ];

    const fn new(id: u32, name: &'static str, bad: bool) -> Self {
        Self { id, name, bad }
    }

    /// Stable numeric id of the flag.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Human-readable name of the flag.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this flag marks the data as unusable.
    pub fn is_bad(&self) -> bool {
        self.bad
    }

    /// Look up a flag by its stable id.
    pub fn by_id(id: u32) -> Option<FlagType> {
        Self::ALL.iter().copied().find(|f| f.id == id)
    }

    /// Look up a flag by its name.
    pub fn by_name(name: &str) -> Option<FlagType> {
        Self::ALL.iter().copied().find(|f| f.name == name)
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

// Flags serialize as their stable id; deserialization resolves through the
// registry so unknown ids are rejected instead of minting new flags.
impl Serialize for FlagType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.id)
    }
}

impl<'de> Deserialize<'de> for FlagType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = u32::deserialize(deserializer)?;
        FlagType::by_id(id).ok_or_else(|| D::Error::custom(format!("unknown flag id {}", id)))
    }
}

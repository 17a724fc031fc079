// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quality grades and their reduction lattice.
//!
//! A [`Quality`] is the graded verdict a check attaches to a monitor object:
//! a level from the total order `Null < Bad < Medium < Good`, a set of
//! commented flags and free-form string metadata. [`reduce`] combines many
//! qualities into one with worst-wins semantics.

use crate::error::{CoreError, Result};
use crate::flags::FlagType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Quality levels, ordered worst to best.
///
/// `Null` means "no verdict": a check that cannot decide emits `Null` with an
/// explanatory flag. It is the bottom of the order, so any reduction
/// containing a `Null` stays inconclusive rather than silently passing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "PascalCase")]
pub enum QualityLevel {
    /// No verdict could be produced.
    #[default]
    Null = 0,
    /// The data is not usable.
    Bad = 1,
    /// The data is usable with caveats.
    Medium = 2,
    /// The data is good.
    Good = 3,
}

impl QualityLevel {
    /// Numeric level, `0` for `Null` up to `3` for `Good`.
    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// Display name, also used as metadata key in the repository.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bad => "Bad",
            Self::Medium => "Medium",
            Self::Good => "Good",
        }
    }

    /// Resolve a level from its display name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "Null" => Ok(Self::Null),
            "Bad" => Ok(Self::Bad),
            "Medium" => Ok(Self::Medium),
            "Good" => Ok(Self::Good),
            other => Err(CoreError::ObjectNotFound {
                name: format!("quality level '{}'", other),
            }),
        }
    }
}

/// A flag with the reason it was raised.
pub type CommentedFlag = (FlagType, String);

/// The graded verdict of a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Quality {
    level: QualityLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    flags: Vec<CommentedFlag>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl Quality {
    /// A `Null` quality without flags.
    pub fn null() -> Self {
        Self::new(QualityLevel::Null)
    }

    /// A `Bad` quality without flags.
    pub fn bad() -> Self {
        Self::new(QualityLevel::Bad)
    }

    /// A `Medium` quality without flags.
    pub fn medium() -> Self {
        Self::new(QualityLevel::Medium)
    }

    /// A `Good` quality without flags.
    pub fn good() -> Self {
        Self::new(QualityLevel::Good)
    }

    /// Create a quality at the given level.
    pub fn new(level: QualityLevel) -> Self {
        Self {
            level,
            flags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// The level of this quality.
    pub fn level(&self) -> QualityLevel {
        self.level
    }

    /// The display name of the level.
    pub fn name(&self) -> &'static str {
        self.level.name()
    }

    /// Replace the level, keeping flags and metadata.
    pub fn set(&mut self, level: QualityLevel) {
        self.level = level;
    }

    /// True if this quality is strictly worse than `other`.
    pub fn is_worse_than(&self, other: &Quality) -> bool {
        self.level < other.level
    }

    /// True if this quality is strictly better than `other`.
    pub fn is_better_than(&self, other: &Quality) -> bool {
        self.level > other.level
    }

    /// Attach a flag with a reason. Duplicate `(flag, reason)` pairs collapse.
    pub fn add_flag(mut self, flag: FlagType, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if !self.flags.iter().any(|(f, r)| *f == flag && *r == reason) {
            self.flags.push((flag, reason));
        }
        self
    }

    /// The flags attached to this quality, in attachment order.
    pub fn flags(&self) -> &[CommentedFlag] {
        &self.flags
    }

    /// Add a metadata entry; an existing key is left untouched.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Overwrite a metadata entry; a missing key is ignored.
    pub fn update_metadata(&mut self, key: &str, value: impl Into<String>) {
        if let Some(slot) = self.metadata.get_mut(key) {
            *slot = value.into();
        }
    }

    /// Set a metadata entry unconditionally.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Metadata value for `key`.
    pub fn metadata(&self, key: &str) -> Result<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| CoreError::ObjectNotFound {
                name: format!("metadata key '{}'", key),
            })
    }

    /// Metadata value for `key`, or `default` when absent.
    pub fn metadata_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.metadata.get(key).map(String::as_str).unwrap_or(default)
    }

    /// Metadata value for `key`, if present.
    pub fn metadata_opt(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// The full metadata map.
    pub fn metadata_map(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quality::{}", self.level.name())?;
        for (flag, reason) in &self.flags {
            write!(f, " [{}: {}]", flag.name(), reason)?;
        }
        Ok(())
    }
}

/// Reduce a set of qualities with worst-wins semantics.
///
/// The result level is the minimum input level, flags accumulate under set
/// union and metadata folds left-to-right with last-writer-wins. The
/// operation is associative and commutative in level and flag content; an
/// empty input reduces to `Null`.
pub fn reduce<'a>(qualities: impl IntoIterator<Item = &'a Quality>) -> Quality {
    let mut result: Option<Quality> = None;
    for q in qualities {
        match result.as_mut() {
            None => result = Some(q.clone()),
            Some(acc) => {
                if q.level < acc.level {
                    acc.level = q.level;
                }
                for (flag, reason) in &q.flags {
                    if !acc.flags.iter().any(|(f, r)| f == flag && r == reason) {
                        acc.flags.push((*flag, reason.clone()));
                    }
                }
                for (k, v) in &q.metadata {
                    acc.metadata.insert(k.clone(), v.clone());
                }
            }
        }
    }
    result.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order() {
        assert!(Quality::null().is_worse_than(&Quality::bad()));
        assert!(Quality::bad().is_worse_than(&Quality::medium()));
        assert!(Quality::medium().is_worse_than(&Quality::good()));
        assert!(Quality::good().is_better_than(&Quality::null()));
        assert!(!Quality::good().is_worse_than(&Quality::good()));
        for q in [Quality::bad(), Quality::medium(), Quality::good()] {
            assert!(Quality::null().is_worse_than(&q));
        }
    }

    #[test]
    fn test_level_names_round_trip() {
        for level in [
            QualityLevel::Null,
            QualityLevel::Bad,
            QualityLevel::Medium,
            QualityLevel::Good,
        ] {
            assert_eq!(QualityLevel::from_name(level.name()).unwrap(), level);
        }
        assert!(QualityLevel::from_name("Great").is_err());
    }

    #[test]
    fn test_metadata_semantics() {
        let mut q = Quality::good();
        q.add_metadata("k", "v1");
        assert_eq!(q.metadata("k").unwrap(), "v1");
        // add does not overwrite
        q.add_metadata("k", "v2");
        assert_eq!(q.metadata("k").unwrap(), "v1");
        // update overwrites existing keys only
        q.update_metadata("k", "v2");
        assert_eq!(q.metadata("k").unwrap(), "v2");
        q.update_metadata("missing", "x");
        assert!(q.metadata_opt("missing").is_none());
        assert_eq!(q.metadata_or("missing", "fallback"), "fallback");
        assert!(q.metadata("missing").is_err());
    }

    #[test]
    fn test_reduce_worst_wins_with_flags() {
        let q1 = Quality::medium().add_flag(FlagType::UNKNOWN, "warn: rate low");
        let q2 = Quality::bad().add_flag(FlagType::BAD_TRACKING, "too few clusters");
        let reduced = reduce([&q1, &q2]);
        assert_eq!(reduced.level(), QualityLevel::Bad);
        let flags: Vec<_> = reduced.flags().iter().map(|(f, _)| *f).collect();
        assert_eq!(flags, vec![FlagType::UNKNOWN, FlagType::BAD_TRACKING]);
        assert!(
            reduced
                .flags()
                .iter()
                .any(|(_, r)| r == "warn: rate low")
        );
        assert!(
            reduced
                .flags()
                .iter()
                .any(|(_, r)| r == "too few clusters")
        );
    }

    #[test]
    fn test_reduce_is_idempotent_commutative_associative() {
        let a = Quality::good().add_flag(FlagType::LIMITED_ACCEPTANCE, "sector 3 off");
        let b = Quality::medium().add_flag(FlagType::UNKNOWN, "noise");
        let c = Quality::bad();

        assert_eq!(reduce([&a]), a);
        assert_eq!(reduce([&a, &b]).level(), reduce([&b, &a]).level());

        let left = reduce([&reduce([&a, &b]), &c]);
        let right = reduce([&a, &reduce([&b, &c])]);
        assert_eq!(left.level(), right.level());
        let mut lf: Vec<_> = left.flags().to_vec();
        let mut rf: Vec<_> = right.flags().to_vec();
        lf.sort_by_key(|(f, _)| f.id());
        rf.sort_by_key(|(f, _)| f.id());
        assert_eq!(lf, rf);
    }

    #[test]
    fn test_reduce_null_is_inconclusive() {
        let reduced = reduce([&Quality::good(), &Quality::null()]);
        assert_eq!(reduced.level(), QualityLevel::Null);
        assert_eq!(reduce([]).level(), QualityLevel::Null);
    }

    #[test]
    fn test_flag_dedup() {
        let q = Quality::bad()
            .add_flag(FlagType::BAD_PID, "dE/dx off")
            .add_flag(FlagType::BAD_PID, "dE/dx off")
            .add_flag(FlagType::BAD_PID, "different reason");
        assert_eq!(q.flags().len(), 2);
    }

    #[test]
    fn test_metadata_last_writer_wins_in_reduce() {
        let mut a = Quality::good();
        a.set_metadata("Comment", "first");
        let mut b = Quality::good();
        b.set_metadata("Comment", "second");
        assert_eq!(reduce([&a, &b]).metadata("Comment").unwrap(), "second");
    }
}

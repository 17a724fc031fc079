// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The skeleton checks.
//!
//! [`SkeletonCheck`] grades the example histogram against configurable
//! thresholds. [`ReferenceComparisonCheck`] compares the record counter
//! against a stored reference; a missing reference yields `Null` with a
//! flag, not an error.

use crate::task::{EXAMPLE_HISTOGRAM, RECORD_COUNTER};
use async_trait::async_trait;
use qualo_core::object::metadata_keys;
use qualo_core::{
    Activity, CustomParameters, FlagType, MonitorObject, Payload, Quality, QualityLevel,
};
use qualo_runtime::{missing_reference_quality, Check, ReferenceCache, Result, Services};
use std::collections::BTreeMap;
use tracing::{debug, warn};

// status box colors per level, surfaced as draw hints
fn status_color(level: QualityLevel) -> &'static str {
    match level {
        QualityLevel::Good => "green",
        QualityLevel::Medium => "orange",
        QualityLevel::Bad => "red",
        QualityLevel::Null => "grey",
    }
}

/// Grades the mean of the example histogram against two thresholds.
pub struct SkeletonCheck {
    threshold_warning: f64,
    threshold_error: f64,
    min_entries: u64,
    prefix_warning: String,
    prefix_error: String,
    label_pos: String,
}

impl Default for SkeletonCheck {
    fn default() -> Self {
        Self {
            threshold_warning: 5.0,
            threshold_error: 8.0,
            min_entries: 2,
            prefix_warning: "warn:".to_string(),
            prefix_error: "error:".to_string(),
            label_pos: "0.6,0.7,0.9,0.9".to_string(),
        }
    }
}

impl SkeletonCheck {
    /// Create the check with its defaults.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Check for SkeletonCheck {
    fn configure(&mut self, params: &CustomParameters) -> Result<()> {
        self.threshold_warning = params
            .at_or("thresholdWarning", "5.0")
            .parse()
            .unwrap_or(self.threshold_warning);
        self.threshold_error = params
            .at_or("thresholdError", "8.0")
            .parse()
            .unwrap_or(self.threshold_error);
        self.min_entries = params
            .at_or("minEntries", "2")
            .parse()
            .unwrap_or(self.min_entries);
        self.prefix_warning = params.at_or("messagePrefixWarning", "warn:").to_string();
        self.prefix_error = params.at_or("messagePrefixError", "error:").to_string();
        self.label_pos = params
            .at_or("labelPos", "0.6,0.7,0.9,0.9")
            .to_string();
        Ok(())
    }

    fn check(&mut self, mo_map: &BTreeMap<String, MonitorObject>) -> Quality {
        let Some(histo) = mo_map
            .values()
            .find(|mo| mo.name == EXAMPLE_HISTOGRAM)
            .and_then(|mo| match &mo.payload {
                Payload::Histo1d(h) => Some(h),
                _ => None,
            })
        else {
            return Quality::null().add_flag(FlagType::UNKNOWN, "example histogram not present");
        };

        if histo.entries() < self.min_entries {
            return Quality::null().add_flag(
                FlagType::INSUFFICIENT_STATISTICS,
                format!("{} entries, need {}", histo.entries(), self.min_entries),
            );
        }
        let Some(mean) = histo.mean() else {
            return Quality::null()
                .add_flag(FlagType::INSUFFICIENT_STATISTICS, "empty histogram");
        };

        debug!(mean, "Skeleton check evaluated the example histogram");
        if mean > self.threshold_error {
            let mut quality = Quality::bad().add_flag(
                FlagType::UNKNOWN,
                format!("{} mean {:.2} above {}", self.prefix_error, mean, self.threshold_error),
            );
            quality.set_metadata(metadata_keys::N_ERRORS, "1");
            quality
        } else if mean > self.threshold_warning {
            let mut quality = Quality::medium().add_flag(
                FlagType::UNKNOWN,
                format!(
                    "{} mean {:.2} above {}",
                    self.prefix_warning, mean, self.threshold_warning
                ),
            );
            quality.set_metadata(metadata_keys::N_WARNINGS, "1");
            quality
        } else {
            Quality::good()
        }
    }

    fn beautify(&self, mo: &mut MonitorObject, quality: &Quality) {
        mo.add_or_update_metadata("statusBox", status_color(quality.level()));
        mo.add_or_update_metadata("statusLabel", format!("Quality::{}", quality.name()));
        mo.add_or_update_metadata("labelPos", self.label_pos.clone());
    }

    fn is_object_checkable(&self, mo: &MonitorObject) -> bool {
        mo.name == EXAMPLE_HISTOGRAM
    }
}

/// Compares the record counter against a reference from a previous run.
pub struct ReferenceComparisonCheck {
    reference_path: String,
    tolerance: f64,
    // resolved once per activity; None means the reference is missing
    reference_count: Option<u64>,
}

impl ReferenceComparisonCheck {
    /// Create the check; the reference path comes from configuration.
    pub fn new() -> Self {
        Self {
            reference_path: String::new(),
            tolerance: 0.5,
            reference_count: None,
        }
    }
}

impl Default for ReferenceComparisonCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Check for ReferenceComparisonCheck {
    fn configure(&mut self, params: &CustomParameters) -> Result<()> {
        self.reference_path = params.at_or("pathReference", "").to_string();
        self.tolerance = params.at_or("tolerance", "0.5").parse().unwrap_or(0.5);
        Ok(())
    }

    async fn start_of_activity(
        &mut self,
        _activity: &Activity,
        services: &Services,
    ) -> Result<()> {
        // the reference resolves once per activity and stays cached
        self.reference_count = None;
        let Some(repository) = services.repository.clone() else {
            warn!("No repository configured, reference comparison disabled");
            return Ok(());
        };
        if self.reference_path.is_empty() {
            return Ok(());
        }
        let mut cache = ReferenceCache::new(repository);
        if let Some(reference) = cache.resolve(&self.reference_path, None).await
            && let Payload::Counter(c) = &reference.payload
        {
            self.reference_count = Some(c.count);
        }
        Ok(())
    }

    fn check(&mut self, mo_map: &BTreeMap<String, MonitorObject>) -> Quality {
        let Some(reference_count) = self.reference_count else {
            return missing_reference_quality(&self.reference_path);
        };
        let Some(current) = mo_map
            .values()
            .find(|mo| mo.name == RECORD_COUNTER)
            .and_then(|mo| match &mo.payload {
                Payload::Counter(c) => Some(c.count),
                _ => None,
            })
        else {
            return Quality::null().add_flag(FlagType::UNKNOWN, "record counter not present");
        };

        if reference_count == 0 {
            return Quality::null()
                .add_flag(FlagType::INSUFFICIENT_STATISTICS, "reference counter empty");
        }
        let deviation = (current as f64 - reference_count as f64).abs() / reference_count as f64;
        if deviation > self.tolerance {
            Quality::bad().add_flag(
                FlagType::UNKNOWN,
                format!("count deviates {:.0}% from reference", deviation * 100.0),
            )
        } else {
            Quality::good()
        }
    }

    fn beautify(&self, mo: &mut MonitorObject, quality: &Quality) {
        mo.add_or_update_metadata("statusBox", status_color(quality.level()));
        mo.add_or_update_metadata("statusLabel", format!("Quality::{}", quality.name()));
    }

    fn is_object_checkable(&self, mo: &MonitorObject) -> bool {
        mo.name == RECORD_COUNTER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualo_core::{Counter, Histo1d};
    use qualo_store::{MemoryRepository, Repository};
    use std::sync::Arc;

    fn histo_mo(fills: &[f64]) -> MonitorObject {
        let mut h = Histo1d::new(20, 0.0, 20.0);
        for x in fills {
            h.fill(*x);
        }
        MonitorObject::new(EXAMPLE_HISTOGRAM, "skeletonTask", "TST", Payload::Histo1d(h))
    }

    fn mo_map(mo: MonitorObject) -> BTreeMap<String, MonitorObject> {
        let mut map = BTreeMap::new();
        map.insert(mo.path(), mo);
        map
    }

    #[test]
    fn test_thresholds_grade_the_mean() {
        let mut check = SkeletonCheck::new();
        let mut params = CustomParameters::new();
        params.set("thresholdWarning", "5.0");
        params.set("thresholdError", "8.0");
        check.configure(&params).unwrap();

        // mean 2.5: good
        let q = check.check(&mo_map(histo_mo(&[2.0, 2.0])));
        assert_eq!(q.level(), QualityLevel::Good);

        // mean 6.5: medium with the warning prefix
        let q = check.check(&mo_map(histo_mo(&[6.0, 6.0])));
        assert_eq!(q.level(), QualityLevel::Medium);
        assert!(q.flags()[0].1.starts_with("warn:"));
        assert_eq!(q.metadata_opt(metadata_keys::N_WARNINGS), Some("1"));

        // mean 9.5: bad with the error prefix
        let q = check.check(&mo_map(histo_mo(&[9.0, 9.0])));
        assert_eq!(q.level(), QualityLevel::Bad);
        assert!(q.flags()[0].1.starts_with("error:"));
        assert_eq!(q.metadata_opt(metadata_keys::N_ERRORS), Some("1"));
    }

    #[test]
    fn test_insufficient_statistics_is_null_not_bad() {
        let mut check = SkeletonCheck::new();
        check.configure(&CustomParameters::new()).unwrap();
        let q = check.check(&mo_map(histo_mo(&[1.0])));
        assert_eq!(q.level(), QualityLevel::Null);
        assert_eq!(q.flags()[0].0, FlagType::INSUFFICIENT_STATISTICS);
    }

    #[test]
    fn test_beautify_sets_status_box() {
        let check = SkeletonCheck::new();
        let mut mo = histo_mo(&[1.0, 2.0]);
        check.beautify(&mut mo, &Quality::null());
        assert_eq!(mo.metadata("statusBox"), Some("grey"));
        assert_eq!(mo.metadata("statusLabel"), Some("Quality::Null"));
        check.beautify(&mut mo, &Quality::good());
        assert_eq!(mo.metadata("statusBox"), Some("green"));
    }

    #[tokio::test]
    async fn test_missing_reference_yields_null_with_flag() {
        // scenario: repository has no reference at the configured path
        let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let mut check = ReferenceComparisonCheck::new();
        let mut params = CustomParameters::new();
        params.set("pathReference", "qc/TST/ref/nRecords");
        check.configure(&params).unwrap();
        check
            .start_of_activity(&Activity::new(1, "PHYSICS"), &Services {
                repository: Some(repo),
            })
            .await
            .unwrap();

        let current =
            MonitorObject::new(RECORD_COUNTER, "skeletonTask", "TST", Payload::Counter(Counter { count: 5 }));
        let q = check.check(&mo_map(current));
        assert_eq!(q.level(), QualityLevel::Null);
        assert_eq!(q.flags()[0].0, FlagType::REFERENCE_NOT_FOUND);

        // beautify paints the grey status box for Null
        let mut mo = MonitorObject::new(
            RECORD_COUNTER,
            "skeletonTask",
            "TST",
            Payload::Counter(Counter { count: 5 }),
        );
        check.beautify(&mut mo, &q);
        assert_eq!(mo.metadata("statusBox"), Some("grey"));
        assert_eq!(mo.metadata("statusLabel"), Some("Quality::Null"));
    }

    #[tokio::test]
    async fn test_reference_comparison_grades_deviation() {
        let repo = Arc::new(MemoryRepository::new());
        let mut reference = MonitorObject::new(
            "nRecords",
            "refTask",
            "TST",
            Payload::Counter(Counter { count: 100 }),
        );
        reference.set_activity(&Activity::new(1, "PHYSICS"));
        repo.store_mo(&reference, 100).await.unwrap();

        let mut check = ReferenceComparisonCheck::new();
        let mut params = CustomParameters::new();
        params.set("pathReference", "qc/TST/refTask/nRecords");
        params.set("tolerance", "0.5");
        check.configure(&params).unwrap();
        check
            .start_of_activity(&Activity::new(2, "PHYSICS"), &Services {
                repository: Some(repo),
            })
            .await
            .unwrap();

        let close = MonitorObject::new(
            RECORD_COUNTER,
            "skeletonTask",
            "TST",
            Payload::Counter(Counter { count: 120 }),
        );
        assert_eq!(check.check(&mo_map(close)).level(), QualityLevel::Good);

        let far = MonitorObject::new(
            RECORD_COUNTER,
            "skeletonTask",
            "TST",
            Payload::Counter(Counter { count: 300 }),
        );
        assert_eq!(check.check(&mo_map(far)).level(), QualityLevel::Bad);
    }
}

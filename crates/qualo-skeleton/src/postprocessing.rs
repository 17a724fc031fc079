// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The skeleton post-processing task.
//!
//! Trends the mean of the example histogram: every update reads the latest
//! stored version, appends the mean to a trend payload and publishes it
//! back. The finalize hook publishes the trend one last time so the stored
//! object covers the whole interval.

use crate::task::EXAMPLE_HISTOGRAM;
use async_trait::async_trait;
use qualo_core::{object, CustomParameters, MonitorObject, Payload, StateSample};
use qualo_runtime::{now_ms, PostProcessingTask, Result, Services, Trigger};
use qualo_store::Repository as _;
use tracing::{debug, warn};

/// Task name the trend is published under.
pub const TREND_TASK: &str = "skeletonTrend";
/// Name of the published trend object.
pub const TREND_OBJECT: &str = "meanTrend";

/// Trends the example histogram's mean over a run.
pub struct SkeletonPostProcessing {
    source_path: String,
    detector: String,
    means: Vec<f64>,
}

impl SkeletonPostProcessing {
    /// Create the task for a detector.
    pub fn new(detector: impl Into<String>) -> Self {
        let detector = detector.into();
        Self {
            source_path: object::object_path(&detector, "skeletonTask", EXAMPLE_HISTOGRAM),
            detector,
            means: Vec::new(),
        }
    }

    async fn publish_trend(&self, trigger: &Trigger, services: &Services) -> Result<()> {
        let Some(repository) = services.repository.as_ref() else {
            return Ok(());
        };
        let sample = StateSample {
            value: serde_json::json!({ "means": self.means }),
            sampled_at: now_ms(),
        };
        let mut mo = MonitorObject::new(
            TREND_OBJECT,
            TREND_TASK,
            self.detector.clone(),
            Payload::State(sample),
        );
        mo.set_activity(&trigger.activity);
        mo.validity.update(now_ms());
        repository.store_mo(&mo, now_ms()).await?;
        Ok(())
    }
}

#[async_trait]
impl PostProcessingTask for SkeletonPostProcessing {
    fn configure(&mut self, params: &CustomParameters) -> Result<()> {
        if let Some(path) = params.at_default("sourcePath") {
            self.source_path = path.to_string();
        }
        Ok(())
    }

    async fn initialize(&mut self, trigger: &Trigger, _services: &Services) -> Result<()> {
        debug!(activity = %trigger.activity, "Trend interval starts");
        self.means.clear();
        Ok(())
    }

    async fn update(&mut self, trigger: &Trigger, services: &Services) -> Result<()> {
        let Some(repository) = services.repository.as_ref() else {
            warn!("No repository configured, trend update skipped");
            return Ok(());
        };
        let Some(mo) = repository.retrieve_mo(&self.source_path, None, None).await? else {
            debug!(path = %self.source_path, "Nothing stored yet, trend update skipped");
            return Ok(());
        };
        if let Payload::Histo1d(h) = &mo.payload
            && let Some(mean) = h.mean()
        {
            self.means.push(mean);
            self.publish_trend(trigger, services).await?;
        }
        Ok(())
    }

    async fn finalize(&mut self, trigger: &Trigger, services: &Services) -> Result<()> {
        self.publish_trend(trigger, services).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualo_core::{Activity, Histo1d};
    use qualo_runtime::TriggerKind;
    use qualo_store::{MemoryRepository, Repository};
    use std::sync::Arc;

    fn trigger() -> Trigger {
        Trigger::fired(TriggerKind::Periodic, Activity::new(1, "PHYSICS"))
    }

    #[tokio::test]
    async fn test_trend_accumulates_means() {
        let repo = Arc::new(MemoryRepository::new());
        let services = Services::with_repository(repo.clone());

        let mut source = Histo1d::new(10, 0.0, 10.0);
        source.fill(2.0);
        source.fill(4.0);
        let mo = MonitorObject::new(
            EXAMPLE_HISTOGRAM,
            "skeletonTask",
            "TST",
            Payload::Histo1d(source),
        );
        repo.store_mo(&mo, 100).await.unwrap();

        let mut pp = SkeletonPostProcessing::new("TST");
        pp.configure(&CustomParameters::new()).unwrap();
        pp.initialize(&trigger(), &services).await.unwrap();
        pp.update(&trigger(), &services).await.unwrap();
        pp.update(&trigger(), &services).await.unwrap();
        pp.finalize(&trigger(), &services).await.unwrap();

        let stored = repo
            .retrieve_mo("qc/TST/skeletonTrend/meanTrend", None, None)
            .await
            .unwrap()
            .unwrap();
        match &stored.payload {
            Payload::State(sample) => {
                let means = sample.value["means"].as_array().unwrap();
                assert_eq!(means.len(), 2);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(stored.activity.id, 1);
    }

    #[tokio::test]
    async fn test_update_without_source_is_quiet() {
        let repo = Arc::new(MemoryRepository::new());
        let services = Services::with_repository(repo.clone());
        let mut pp = SkeletonPostProcessing::new("TST");
        pp.initialize(&trigger(), &services).await.unwrap();
        pp.update(&trigger(), &services).await.unwrap();
        assert!(
            repo.retrieve_mo("qc/TST/skeletonTrend/meanTrend", None, None)
                .await
                .unwrap()
                .is_none()
        );
    }
}

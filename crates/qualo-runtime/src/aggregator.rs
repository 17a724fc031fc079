// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The aggregator runtime.
//!
//! An aggregator is a check over qualities instead of monitor objects: it
//! consumes the quality objects of its declared sources and derives
//! higher-level qualities from them. The worst-wins reduction is available
//! to user code and powers the built-in aggregator.

use crate::context::{now_ms, Services};
use crate::error::Result;
use crate::policy::{UpdatePolicy, UpdatePolicyManager};
use qualo_core::{reduce, Activity, CustomParameters, Quality, QualityObject};
use qualo_store::{with_retry, Repository as _, RetryPolicy};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// User-implemented aggregator.
pub trait Aggregator: Send {
    /// Read tunables; invoked once per activity.
    fn configure(&mut self, _params: &CustomParameters) -> Result<()> {
        Ok(())
    }

    /// Derive qualities from the filtered source qualities. Keys of the
    /// result become sub-names of the aggregator's published objects.
    fn aggregate(&mut self, qo_map: &BTreeMap<String, QualityObject>) -> BTreeMap<String, Quality>;
}

/// A source an aggregator consumes.
#[derive(Debug, Clone)]
pub struct AggregatorSource {
    /// The producing check or aggregator name.
    pub name: String,
    /// Specific quality objects of the source; empty accepts all of them.
    pub objects: Vec<String>,
}

impl AggregatorSource {
    /// Accept everything the producer publishes.
    pub fn all_of(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Vec::new(),
        }
    }
}

/// Subscription of an aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Aggregator name, unique within the runner.
    pub name: String,
    /// Detector code.
    pub detector: String,
    /// Readiness policy.
    pub policy: UpdatePolicy,
    /// The sources to consume.
    pub sources: Vec<AggregatorSource>,
    /// User tunables.
    pub params: CustomParameters,
}

struct AggregatorInstance {
    config: AggregatorConfig,
    aggregator: Box<dyn Aggregator>,
}

/// Counters surfaced by the aggregator runner.
#[derive(Debug, Default, Clone)]
pub struct AggregatorMetrics {
    /// `aggregate` invocations.
    pub aggregations_run: u64,
    /// Derived quality objects produced.
    pub qos_published: u64,
    /// Store attempts that ended fatal after retries.
    pub store_failures: u64,
}

/// Drives a set of aggregators over incoming quality objects.
pub struct AggregatorRunner {
    aggregators: Vec<AggregatorInstance>,
    upm: UpdatePolicyManager,
    services: Services,
    retry: RetryPolicy,
    activity: Activity,
    // latest quality object per check name
    cache: BTreeMap<String, QualityObject>,
    metrics: AggregatorMetrics,
}

impl AggregatorRunner {
    /// Create a runner over the given services.
    pub fn new(services: Services) -> Self {
        Self {
            aggregators: Vec::new(),
            upm: UpdatePolicyManager::new(),
            services,
            retry: RetryPolicy::default(),
            activity: Activity::default(),
            cache: BTreeMap::new(),
            metrics: AggregatorMetrics::default(),
        }
    }

    /// Register an aggregator and its subscription.
    pub fn register(&mut self, config: AggregatorConfig, aggregator: Box<dyn Aggregator>) {
        // subscribe to every object any source may produce; filtering per
        // source happens at dispatch
        self.upm
            .add_policy(config.name.clone(), config.policy, Vec::new(), true, false);
        info!(aggregator = %config.name, policy = %config.policy, "Registered aggregator");
        self.aggregators.push(AggregatorInstance { config, aggregator });
    }

    /// Current counters.
    pub fn metrics(&self) -> &AggregatorMetrics {
        &self.metrics
    }

    /// Begin an activity: configure every aggregator.
    pub fn start_of_activity(&mut self, activity: Activity) -> Result<()> {
        self.cache.clear();
        for instance in &mut self.aggregators {
            instance.aggregator.configure(&instance.config.params)?;
        }
        self.activity = activity;
        Ok(())
    }

    // keep a qo when its check name's first path token matches a source and
    // the source either lists it or accepts everything
    fn filter(config: &AggregatorConfig, cache: &BTreeMap<String, QualityObject>) -> BTreeMap<String, QualityObject> {
        let mut accepted = BTreeMap::new();
        for (name, qo) in cache {
            let token = name.split('/').next().unwrap_or(name.as_str());
            let Some(source) = config.sources.iter().find(|s| s.name == token) else {
                continue;
            };
            if source.objects.is_empty() || source.objects.iter().any(|o| o == name) {
                accepted.insert(name.clone(), qo.clone());
            }
        }
        accepted
    }

    /// Consume freshly produced quality objects and run the ready
    /// aggregators. Returns the derived quality objects.
    pub async fn on_quality_objects(&mut self, qos: &[QualityObject]) -> Result<Vec<QualityObject>> {
        for qo in qos {
            self.cache.insert(qo.check_name.clone(), qo.clone());
            self.upm.update_object_revision(&qo.path());
        }

        let mut produced = Vec::new();
        for idx in 0..self.aggregators.len() {
            let name = self.aggregators[idx].config.name.clone();
            if !self.upm.is_ready(&name)? {
                continue;
            }
            let accepted = Self::filter(&self.aggregators[idx].config, &self.cache);
            if accepted.is_empty() {
                self.upm.update_actor_revision(&name)?;
                continue;
            }

            let (derived, detector) = {
                let instance = &mut self.aggregators[idx];
                (
                    instance.aggregator.aggregate(&accepted),
                    instance.config.detector.clone(),
                )
            };
            self.metrics.aggregations_run += 1;
            debug!(aggregator = %name, derived = derived.len(), "Aggregation evaluated");

            for (sub_name, quality) in derived {
                let mut qo = QualityObject::new(
                    format!("{}/{}", name, sub_name),
                    detector.clone(),
                    quality,
                );
                qo.inputs = accepted.keys().cloned().collect();
                qo.activity = self.activity.clone();
                for source_qo in accepted.values() {
                    qo.validity.extend(&source_qo.validity);
                }
                self.publish(&qo).await;
                produced.push(qo);
            }
            self.upm.update_actor_revision(&name)?;
        }
        self.upm.update_global_revision();
        Ok(produced)
    }

    async fn publish(&mut self, qo: &QualityObject) {
        if let Some(repository) = self.services.repository.clone() {
            let timestamp = now_ms();
            let result = with_retry(self.retry, "store_qo", || {
                let repository = repository.clone();
                let qo = qo.clone();
                async move { repository.store_qo(&qo, timestamp).await }
            })
            .await;
            match result {
                Ok(()) => self.metrics.qos_published += 1,
                Err(e) => {
                    self.metrics.store_failures += 1;
                    error!(aggregator = %qo.check_name, error = %e, "Failed to store derived quality");
                }
            }
        } else {
            self.metrics.qos_published += 1;
        }
    }
}

/// The built-in aggregator: one derived quality, the worst-wins reduction of
/// every input.
pub struct WorstOfAggregator;

impl Aggregator for WorstOfAggregator {
    fn aggregate(&mut self, qo_map: &BTreeMap<String, QualityObject>) -> BTreeMap<String, Quality> {
        let reduced = reduce(qo_map.values().map(|qo| &qo.quality));
        let mut result = BTreeMap::new();
        result.insert("worst".to_string(), reduced);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualo_core::{FlagType, QualityLevel};

    fn qo(check: &str, quality: Quality) -> QualityObject {
        QualityObject::new(check, "TST", quality)
    }

    fn worst_of_config(name: &str, sources: &[&str]) -> AggregatorConfig {
        AggregatorConfig {
            name: name.to_string(),
            detector: "TST".to_string(),
            policy: UpdatePolicy::OnAny,
            sources: sources.iter().map(|s| AggregatorSource::all_of(*s)).collect(),
            params: CustomParameters::new(),
        }
    }

    #[tokio::test]
    async fn test_worst_wins_with_flag_union() {
        let mut runner = AggregatorRunner::new(Services::default());
        runner.register(
            worst_of_config("detectorQuality", &["checkA", "checkB"]),
            Box::new(WorstOfAggregator),
        );
        runner.start_of_activity(Activity::new(1, "PHYSICS")).unwrap();

        let inputs = vec![
            qo(
                "checkA",
                Quality::medium().add_flag(FlagType::UNKNOWN, "warn: rate low"),
            ),
            qo(
                "checkB",
                Quality::bad().add_flag(FlagType::BAD_TRACKING, "too few clusters"),
            ),
        ];
        let produced = runner.on_quality_objects(&inputs).await.unwrap();
        assert_eq!(produced.len(), 1);
        let derived = &produced[0];
        assert_eq!(derived.check_name, "detectorQuality/worst");
        assert_eq!(derived.quality.level(), QualityLevel::Bad);
        let flags: Vec<_> = derived.quality.flags().iter().map(|(f, _)| *f).collect();
        assert!(flags.contains(&FlagType::UNKNOWN));
        assert!(flags.contains(&FlagType::BAD_TRACKING));
    }

    #[tokio::test]
    async fn test_sources_filter_unrelated_checks() {
        let mut runner = AggregatorRunner::new(Services::default());
        runner.register(
            worst_of_config("detectorQuality", &["checkA"]),
            Box::new(WorstOfAggregator),
        );
        runner.start_of_activity(Activity::new(1, "PHYSICS")).unwrap();

        let produced = runner
            .on_quality_objects(&[qo("unrelatedCheck", Quality::bad())])
            .await
            .unwrap();
        // the update fired the policy, but the filter rejected the input
        assert!(produced.is_empty());

        let produced = runner
            .on_quality_objects(&[qo("checkA", Quality::good())])
            .await
            .unwrap();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].quality.level(), QualityLevel::Good);
    }

    #[tokio::test]
    async fn test_null_input_stays_inconclusive() {
        let mut runner = AggregatorRunner::new(Services::default());
        runner.register(
            worst_of_config("detectorQuality", &["checkA", "checkB"]),
            Box::new(WorstOfAggregator),
        );
        runner.start_of_activity(Activity::new(1, "PHYSICS")).unwrap();

        let produced = runner
            .on_quality_objects(&[
                qo("checkA", Quality::good()),
                qo("checkB", Quality::null().add_flag(FlagType::INSUFFICIENT_STATISTICS, "too early")),
            ])
            .await
            .unwrap();
        assert_eq!(produced[0].quality.level(), QualityLevel::Null);
    }

    #[tokio::test]
    async fn test_source_object_lists_restrict() {
        let mut runner = AggregatorRunner::new(Services::default());
        let config = AggregatorConfig {
            name: "agg".to_string(),
            detector: "TST".to_string(),
            policy: UpdatePolicy::OnAny,
            sources: vec![AggregatorSource {
                name: "checkA".to_string(),
                objects: vec!["checkA".to_string()],
            }],
            params: CustomParameters::new(),
        };
        runner.register(config, Box::new(WorstOfAggregator));
        runner.start_of_activity(Activity::new(1, "PHYSICS")).unwrap();

        // sub-objects of checkA that are not listed are rejected
        let mut sub = qo("checkA", Quality::bad());
        sub.check_name = "checkA/sub".to_string();
        let produced = runner.on_quality_objects(&[sub]).await.unwrap();
        assert!(produced.is_empty());

        let produced = runner
            .on_quality_objects(&[qo("checkA", Quality::medium())])
            .await
            .unwrap();
        assert_eq!(produced.len(), 1);
        assert_eq!(produced[0].quality.level(), QualityLevel::Medium);
    }
}

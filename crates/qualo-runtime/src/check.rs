// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The checker runtime.
//!
//! Checks grade monitor objects. The runner owns one update-policy manager:
//! incoming collections bump object revisions, ready checks run exactly once
//! per ready transition (once per updated object under `OnEachSeparately`),
//! the verdicts are attached to the checkable objects and published as
//! quality objects through the repository with retry.

use crate::context::{now_ms, Services};
use crate::error::Result;
use crate::policy::{UpdatePolicy, UpdatePolicyManager};
use async_trait::async_trait;
use qualo_core::{
    Activity, CustomParameters, MonitorObject, MonitorObjectCollection, PayloadKind, Quality,
    QualityObject,
};
use qualo_store::{with_retry, Repository as _, RetryPolicy};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// User-implemented check.
#[async_trait]
pub trait Check: Send {
    /// Read tunables; invoked once per activity, before the first `check`.
    fn configure(&mut self, _params: &CustomParameters) -> Result<()> {
        Ok(())
    }

    /// Invoked before `check` sees any object of the activity. May resolve
    /// references through the repository.
    async fn start_of_activity(
        &mut self,
        _activity: &Activity,
        _services: &Services,
    ) -> Result<()> {
        Ok(())
    }

    /// Grade the given objects. A check that cannot decide returns
    /// `Quality::null()` with an explanatory flag.
    fn check(&mut self, mo_map: &BTreeMap<String, MonitorObject>) -> Quality;

    /// Annotate a checked object's draw metadata. Must not change payload
    /// semantics.
    fn beautify(&self, _mo: &mut MonitorObject, _quality: &Quality) {}

    /// Payload kinds the check accepts; `None` accepts everything.
    fn accepted_kinds(&self) -> Option<&'static [PayloadKind]> {
        None
    }

    /// Whether the check wants its verdict attached to this object.
    ///
    /// The default consults [`Check::accepted_kinds`].
    fn is_object_checkable(&self, mo: &MonitorObject) -> bool {
        self.accepted_kinds()
            .is_none_or(|kinds| kinds.contains(&mo.payload.kind()))
    }
}

/// Subscription of a check.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Check name, unique within the runner.
    pub name: String,
    /// Detector code.
    pub detector: String,
    /// Readiness policy.
    pub policy: UpdatePolicy,
    /// Subscribed object paths.
    pub objects: Vec<String>,
    /// Subscribe to every object the runner sees.
    pub all_objects: bool,
    /// Hide objects that did not advance since the last evaluation.
    pub only_updated: bool,
    /// User tunables.
    pub params: CustomParameters,
}

impl CheckConfig {
    /// A configuration with the default `OnAny` policy.
    pub fn new(name: impl Into<String>, detector: impl Into<String>, objects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            detector: detector.into(),
            policy: UpdatePolicy::OnAny,
            objects,
            all_objects: false,
            only_updated: false,
            params: CustomParameters::new(),
        }
    }
}

struct CheckInstance {
    config: CheckConfig,
    check: Box<dyn Check>,
}

/// Counters surfaced by the check runner.
#[derive(Debug, Default, Clone)]
pub struct CheckMetrics {
    /// `check` invocations.
    pub checks_run: u64,
    /// Quality objects produced.
    pub qos_published: u64,
    /// Monitor objects rewritten to the repository.
    pub mos_published: u64,
    /// Store attempts that ended fatal after retries.
    pub store_failures: u64,
}

/// Drives a set of checks over incoming collections.
pub struct CheckRunner {
    checks: Vec<CheckInstance>,
    upm: UpdatePolicyManager,
    services: Services,
    retry: RetryPolicy,
    activity: Activity,
    // latest version of every object seen, keyed by path
    cache: BTreeMap<String, MonitorObject>,
    metrics: CheckMetrics,
}

impl CheckRunner {
    /// Create a runner over the given services.
    pub fn new(services: Services) -> Self {
        Self {
            checks: Vec::new(),
            upm: UpdatePolicyManager::new(),
            services,
            retry: RetryPolicy::default(),
            activity: Activity::default(),
            cache: BTreeMap::new(),
            metrics: CheckMetrics::default(),
        }
    }

    /// Register a check and its subscription.
    pub fn register(&mut self, config: CheckConfig, check: Box<dyn Check>) {
        self.upm.add_policy(
            config.name.clone(),
            config.policy,
            config.objects.clone(),
            config.all_objects,
            config.only_updated,
        );
        info!(check = %config.name, policy = %config.policy, "Registered check");
        self.checks.push(CheckInstance { config, check });
    }

    /// Current counters.
    pub fn metrics(&self) -> &CheckMetrics {
        &self.metrics
    }

    /// Begin an activity: configure every check, then let it resolve its
    /// references.
    pub async fn start_of_activity(&mut self, activity: Activity) -> Result<()> {
        self.cache.clear();
        for instance in &mut self.checks {
            instance.check.configure(&instance.config.params)?;
            instance
                .check
                .start_of_activity(&activity, &self.services)
                .await?;
        }
        self.activity = activity;
        Ok(())
    }

    /// Consume one merged collection, run the ready checks and publish their
    /// verdicts. Returns the quality objects produced.
    pub async fn on_collection(
        &mut self,
        collection: &MonitorObjectCollection,
    ) -> Result<Vec<QualityObject>> {
        for mo in &collection.objects {
            let path = mo.path();
            self.cache.insert(path.clone(), mo.clone());
            self.upm.update_object_revision(&path);
        }

        let mut produced = Vec::new();
        for idx in 0..self.checks.len() {
            let name = self.checks[idx].config.name.clone();
            if !self.upm.is_ready(&name)? {
                continue;
            }

            let updated = self.upm.ready_objects(&name)?;
            let policy = self.checks[idx].config.policy;
            let input_sets: Vec<Vec<String>> = if policy == UpdatePolicy::OnEachSeparately {
                // one invocation per triggering object
                updated.iter().map(|path| vec![path.clone()]).collect()
            } else if self.checks[idx].config.only_updated {
                vec![updated.clone()]
            } else {
                vec![self.upm.objects_of(&name)?]
            };

            for input_set in input_sets {
                let mo_map: BTreeMap<String, MonitorObject> = input_set
                    .iter()
                    .filter_map(|path| {
                        self.cache.get(path).map(|mo| (path.clone(), mo.clone()))
                    })
                    .collect();
                if mo_map.is_empty() {
                    continue;
                }
                let qo = self.run_check(idx, &mo_map).await?;
                produced.push(qo);
            }

            self.upm.update_actor_revision(&name)?;
        }
        self.upm.update_global_revision();

        // rewrite the received objects, now carrying their verdicts
        for mo in &collection.objects {
            self.store_mo(&mo.path()).await;
        }
        Ok(produced)
    }

    // persist the cached (graded) version of a received object
    async fn store_mo(&mut self, path: &str) {
        let Some(repository) = self.services.repository.clone() else {
            return;
        };
        let Some(mo) = self.cache.get(path) else {
            return;
        };
        let timestamp = now_ms();
        let result = with_retry(self.retry, "store_mo", || {
            let repository = repository.clone();
            let mo = mo.clone();
            async move { repository.store_mo(&mo, timestamp).await }
        })
        .await;
        match result {
            Ok(()) => self.metrics.mos_published += 1,
            Err(e) => {
                self.metrics.store_failures += 1;
                error!(path, error = %e, "Failed to store monitor object");
            }
        }
    }

    async fn run_check(
        &mut self,
        idx: usize,
        mo_map: &BTreeMap<String, MonitorObject>,
    ) -> Result<QualityObject> {
        let instance = &mut self.checks[idx];
        let quality = instance.check.check(mo_map);
        self.metrics.checks_run += 1;
        debug!(check = %instance.config.name, quality = %quality, "Check evaluated");

        // attach the verdict to every checkable input; flags and metadata
        // accumulate across evaluations
        let mut validity = qualo_core::ValidityInterval::default();
        for path in mo_map.keys() {
            if let Some(mo) = self.cache.get_mut(path) {
                validity.extend(&mo.validity);
                if !instance.check.is_object_checkable(mo) {
                    continue;
                }
                let mut attached = quality.clone();
                if let Some(previous) = &mo.quality {
                    for (flag, reason) in previous.flags() {
                        attached = attached.add_flag(*flag, reason.clone());
                    }
                    for (key, value) in previous.metadata_map() {
                        attached.add_metadata(key.clone(), value.clone());
                    }
                }
                instance.check.beautify(mo, &attached);
                mo.set_quality(attached);
            }
        }

        let mut qo = QualityObject::new(
            instance.config.name.clone(),
            instance.config.detector.clone(),
            quality,
        );
        qo.inputs = mo_map.keys().cloned().collect();
        qo.activity = self.activity.clone();
        qo.validity = validity;

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
                    // the attempt is dropped, the verdict is still returned
                    self.metrics.store_failures += 1;
                    error!(check = %qo.check_name, error = %e, "Failed to store quality object");
                }
            }
        } else {
            self.metrics.qos_published += 1;
        }
        Ok(qo)
    }

    /// The cached, graded version of an object, if the runner has seen it.
    pub fn cached_object(&self, path: &str) -> Option<&MonitorObject> {
        self.cache.get(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualo_core::{Counter, FlagType, Payload, QualityLevel};
    use qualo_store::Repository;
    use std::sync::Arc;

    /// Grades Bad when the counter exceeds a threshold, Good otherwise.
    struct ThresholdCheck {
        threshold: u64,
    }

    #[async_trait]
    impl Check for ThresholdCheck {
        fn check(&mut self, mo_map: &BTreeMap<String, MonitorObject>) -> Quality {
            for mo in mo_map.values() {
                if let Payload::Counter(c) = &mo.payload
                    && c.count > self.threshold
                {
                    return Quality::bad().add_flag(FlagType::UNKNOWN, "count above threshold");
                }
            }
            Quality::good()
        }

        fn beautify(&self, mo: &mut MonitorObject, quality: &Quality) {
            mo.add_or_update_metadata("checkLabel", quality.name());
        }
    }

    fn collection(objects: Vec<MonitorObject>) -> MonitorObjectCollection {
        MonitorObjectCollection {
            task_name: "task".to_string(),
            objects,
        }
    }

    fn counter_mo(name: &str, count: u64) -> MonitorObject {
        MonitorObject::new(name, "task", "TST", Payload::Counter(Counter { count }))
    }

    fn config(name: &str, objects: &[&str]) -> CheckConfig {
        CheckConfig::new(
            name,
            "TST",
            objects.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_check_runs_once_per_ready_transition() {
        let mut runner = CheckRunner::new(Services::default());
        runner.register(
            config("thresholdCheck", &["qc/TST/task/c"]),
            Box::new(ThresholdCheck { threshold: 10 }),
        );
        runner.start_of_activity(Activity::new(1, "PHYSICS")).await.unwrap();

        let qos = runner
            .on_collection(&collection(vec![counter_mo("c", 5)]))
            .await
            .unwrap();
        assert_eq!(qos.len(), 1);
        assert_eq!(qos[0].quality.level(), QualityLevel::Good);
        assert_eq!(qos[0].path(), "qc/TST/QO/thresholdCheck");

        // no new version: the check must not run again
        let qos = runner.on_collection(&collection(vec![])).await.unwrap();
        assert!(qos.is_empty());
        assert_eq!(runner.metrics().checks_run, 1);

        // a new version triggers another evaluation
        let qos = runner
            .on_collection(&collection(vec![counter_mo("c", 50)]))
            .await
            .unwrap();
        assert_eq!(qos.len(), 1);
        assert_eq!(qos[0].quality.level(), QualityLevel::Bad);
    }

    #[tokio::test]
    async fn test_quality_and_beautify_are_attached() {
        let mut runner = CheckRunner::new(Services::default());
        runner.register(
            config("thresholdCheck", &["qc/TST/task/c"]),
            Box::new(ThresholdCheck { threshold: 10 }),
        );
        runner.start_of_activity(Activity::new(1, "PHYSICS")).await.unwrap();
        runner
            .on_collection(&collection(vec![counter_mo("c", 99)]))
            .await
            .unwrap();

        let cached = runner.cached_object("qc/TST/task/c").unwrap();
        let quality = cached.quality.as_ref().unwrap();
        assert_eq!(quality.level(), QualityLevel::Bad);
        assert_eq!(cached.metadata("checkLabel"), Some("Bad"));
    }

    #[tokio::test]
    async fn test_flags_accumulate_across_evaluations() {
        struct FlagEachTime {
            n: u32,
        }

        #[async_trait]
        impl Check for FlagEachTime {
            fn check(&mut self, _mo_map: &BTreeMap<String, MonitorObject>) -> Quality {
                self.n += 1;
                Quality::medium().add_flag(FlagType::UNKNOWN, format!("pass {}", self.n))
            }
        }

        let mut runner = CheckRunner::new(Services::default());
        runner.register(
            config("flagCheck", &["qc/TST/task/c"]),
            Box::new(FlagEachTime { n: 0 }),
        );
        runner.start_of_activity(Activity::new(1, "PHYSICS")).await.unwrap();

        runner
            .on_collection(&collection(vec![counter_mo("c", 1)]))
            .await
            .unwrap();
        runner
            .on_collection(&collection(vec![counter_mo("c", 2)]))
            .await
            .unwrap();

        let cached = runner.cached_object("qc/TST/task/c").unwrap();
        let flags = cached.quality.as_ref().unwrap().flags();
        let reasons: Vec<_> = flags.iter().map(|(_, r)| r.as_str()).collect();
        assert!(reasons.contains(&"pass 1"));
        assert!(reasons.contains(&"pass 2"));
    }

    #[tokio::test]
    async fn test_on_each_separately_dispatches_per_object() {
        struct CountInvocations {
            seen: Vec<String>,
        }

        #[async_trait]
        impl Check for CountInvocations {
            fn check(&mut self, mo_map: &BTreeMap<String, MonitorObject>) -> Quality {
                assert_eq!(mo_map.len(), 1, "one object per invocation");
                self.seen.extend(mo_map.keys().cloned());
                Quality::good()
            }
        }

        let mut runner = CheckRunner::new(Services::default());
        let mut cfg = config("separately", &["qc/TST/task/a", "qc/TST/task/b"]);
        cfg.policy = UpdatePolicy::OnEachSeparately;
        runner.register(cfg, Box::new(CountInvocations { seen: Vec::new() }));
        runner.start_of_activity(Activity::new(1, "PHYSICS")).await.unwrap();

        let qos = runner
            .on_collection(&collection(vec![counter_mo("a", 1), counter_mo("b", 1)]))
            .await
            .unwrap();
        assert_eq!(qos.len(), 2);
        assert_eq!(runner.metrics().checks_run, 2);
    }

    #[tokio::test]
    async fn test_accepted_kinds_gate_attachment() {
        struct HistoOnly;

        #[async_trait]
        impl Check for HistoOnly {
            fn check(&mut self, _mo_map: &BTreeMap<String, MonitorObject>) -> Quality {
                Quality::good()
            }

            fn accepted_kinds(&self) -> Option<&'static [PayloadKind]> {
                Some(&[PayloadKind::Histo1d])
            }
        }

        let mut runner = CheckRunner::new(Services::default());
        runner.register(config("histoOnly", &["qc/TST/task/c"]), Box::new(HistoOnly));
        runner.start_of_activity(Activity::new(1, "PHYSICS")).await.unwrap();
        runner
            .on_collection(&collection(vec![counter_mo("c", 1)]))
            .await
            .unwrap();

        // the verdict was produced but not attached to the counter
        assert_eq!(runner.metrics().checks_run, 1);
        let cached = runner.cached_object("qc/TST/task/c").unwrap();
        assert!(cached.quality.is_none());
    }

    #[tokio::test]
    async fn test_qos_are_persisted() {
        let repo = Arc::new(qualo_store::MemoryRepository::new());
        let mut runner = CheckRunner::new(Services::with_repository(repo.clone()));
        runner.register(
            config("thresholdCheck", &["qc/TST/task/c"]),
            Box::new(ThresholdCheck { threshold: 10 }),
        );
        runner.start_of_activity(Activity::new(1, "PHYSICS")).await.unwrap();
        runner
            .on_collection(&collection(vec![counter_mo("c", 3)]))
            .await
            .unwrap();

        let stored = repo
            .retrieve_qo("qc/TST/QO/thresholdCheck", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.quality.level(), QualityLevel::Good);
        assert_eq!(stored.inputs, vec!["qc/TST/task/c"]);
        assert_eq!(stored.activity.id, 1);
    }

    #[tokio::test]
    async fn test_checked_mos_are_rewritten_with_their_verdict() {
        let repo = Arc::new(qualo_store::MemoryRepository::new());
        let mut runner = CheckRunner::new(Services::with_repository(repo.clone()));
        runner.register(
            config("thresholdCheck", &["qc/TST/task/c"]),
            Box::new(ThresholdCheck { threshold: 10 }),
        );
        runner.start_of_activity(Activity::new(1, "PHYSICS")).await.unwrap();
        runner
            .on_collection(&collection(vec![counter_mo("c", 99)]))
            .await
            .unwrap();

        assert_eq!(runner.metrics().mos_published, 1);
        let stored = repo
            .retrieve_mo("qc/TST/task/c", None, None)
            .await
            .unwrap()
            .unwrap();
        let quality = stored.quality.as_ref().expect("verdict travels with the object");
        assert_eq!(quality.level(), QualityLevel::Bad);
        assert_eq!(stored.metadata("checkLabel"), Some("Bad"));
    }
}

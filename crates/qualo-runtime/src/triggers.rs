// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The trigger engine.
//!
//! A trigger is a lazy source of [`Trigger`] values: each call to `next`
//! yields exactly one value, most of the time [`TriggerKind::No`]. Sources
//! never error from `next`; a failing collaborator logs, counts and yields
//! `No`, and an exceeded poll budget is also just `No`.

use crate::context::now_ms;
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use qualo_core::Activity;
use qualo_events::{
    end_of_run_activity, matches_end_of_run, matches_start_of_run, start_of_run_activity,
    BusConsumer, EventPoller, PollerConfig,
};
use qualo_store::Repository;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// What caused a trigger to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Nothing fired.
    No,
    /// The one-shot trigger fired.
    Once,
    /// The always-on trigger fired.
    Always,
    /// A wall-clock period elapsed.
    Periodic,
    /// The repository holds a newer version of a watched path.
    NewObject,
    /// A matching start-of-run transition arrived.
    StartOfRun,
    /// A matching end-of-run transition arrived.
    EndOfRun,
    /// The next object of a stored-object iteration.
    ForEachObject,
    /// The next object of a latest-version iteration.
    ForEachLatest,
    /// An out-of-band user or control request.
    UserOrControl,
}

/// One emission of a trigger source.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// What fired.
    pub kind: TriggerKind,
    /// When it fired, ms since epoch.
    pub timestamp: u64,
    /// The activity the firing applies to.
    pub activity: Activity,
    /// The stored object the firing refers to, for object-driven kinds.
    pub object_path: Option<String>,
}

impl Trigger {
    /// The non-firing value.
    pub fn no() -> Self {
        Self {
            kind: TriggerKind::No,
            timestamp: 0,
            activity: Activity::default(),
            object_path: None,
        }
    }

    /// A firing value stamped now.
    pub fn fired(kind: TriggerKind, activity: Activity) -> Self {
        Self {
            kind,
            timestamp: now_ms(),
            activity,
            object_path: None,
        }
    }

    /// Whether this value fired.
    pub fn is_fired(&self) -> bool {
        self.kind != TriggerKind::No
    }
}

/// A lazy source of trigger values.
#[async_trait]
pub trait TriggerSource: Send {
    /// Produce the next value. Never blocks past the source's budget.
    async fn next(&mut self) -> Trigger;
}

/// Fires once, then never again.
pub struct OnceTrigger {
    activity: Activity,
    fired: bool,
}

impl OnceTrigger {
    /// Create the one-shot source.
    pub fn new(activity: Activity) -> Self {
        Self {
            activity,
            fired: false,
        }
    }
}

#[async_trait]
impl TriggerSource for OnceTrigger {
    async fn next(&mut self) -> Trigger {
        if self.fired {
            Trigger::no()
        } else {
            self.fired = true;
            Trigger::fired(TriggerKind::Once, self.activity.clone())
        }
    }
}

/// Fires on every call.
pub struct AlwaysTrigger {
    activity: Activity,
}

impl AlwaysTrigger {
    /// Create the always-on source.
    pub fn new(activity: Activity) -> Self {
        Self { activity }
    }
}

#[async_trait]
impl TriggerSource for AlwaysTrigger {
    async fn next(&mut self) -> Trigger {
        Trigger::fired(TriggerKind::Always, self.activity.clone())
    }
}

/// Never fires.
pub struct NeverTrigger;

#[async_trait]
impl TriggerSource for NeverTrigger {
    async fn next(&mut self) -> Trigger {
        Trigger::no()
    }
}

/// Fires at most once per wall-clock period.
pub struct PeriodicTrigger {
    activity: Activity,
    period: Duration,
    deadline: tokio::time::Instant,
}

impl PeriodicTrigger {
    /// Create a periodic source; the first firing is one period from now.
    pub fn new(period: Duration, activity: Activity) -> Self {
        Self {
            activity,
            period,
            deadline: tokio::time::Instant::now() + period,
        }
    }
}

#[async_trait]
impl TriggerSource for PeriodicTrigger {
    async fn next(&mut self) -> Trigger {
        let now = tokio::time::Instant::now();
        if now < self.deadline {
            return Trigger::no();
        }
        // catch up when more than one period passed; one firing per call
        while self.deadline <= now {
            self.deadline += self.period;
        }
        Trigger::fired(TriggerKind::Periodic, self.activity.clone())
    }
}

/// Fires when the repository reports a newer version of a path.
pub struct NewObjectTrigger {
    repository: Arc<dyn Repository>,
    path: String,
    activity: Activity,
    budget: Duration,
    last_seen: Option<u64>,
    primed: bool,
}

impl NewObjectTrigger {
    /// Watch `path` in the repository.
    pub fn new(
        repository: Arc<dyn Repository>,
        path: impl Into<String>,
        activity: Activity,
        budget: Duration,
    ) -> Self {
        Self {
            repository,
            path: path.into(),
            activity,
            budget,
            last_seen: None,
            primed: false,
        }
    }
}

#[async_trait]
impl TriggerSource for NewObjectTrigger {
    async fn next(&mut self) -> Trigger {
        let lookup = tokio::time::timeout(self.budget, self.repository.latest_timestamp(&self.path));
        let latest = match lookup.await {
            Ok(Ok(latest)) => latest,
            Ok(Err(e)) => {
                warn!(path = %self.path, error = %e, "NewObject lookup failed");
                return Trigger::no();
            }
            Err(_) => {
                // budget exceeded is not an error
                return Trigger::no();
            }
        };

        if !self.primed {
            // versions present before the first poll do not fire
            self.primed = true;
            self.last_seen = latest;
            return Trigger::no();
        }

        match latest {
            Some(timestamp) if self.last_seen != Some(timestamp) => {
                self.last_seen = Some(timestamp);
                let mut trigger = Trigger::fired(TriggerKind::NewObject, self.activity.clone());
                trigger.timestamp = timestamp;
                trigger.object_path = Some(self.path.clone());
                trigger
            }
            _ => Trigger::no(),
        }
    }
}

/// Iterates the stored objects under a prefix, then stays quiet.
pub struct ForEachObjectTrigger {
    repository: Arc<dyn Repository>,
    prefix: String,
    activity: Activity,
    kind: TriggerKind,
    budget: Duration,
    queue: Option<VecDeque<String>>,
}

impl ForEachObjectTrigger {
    /// Iterate every object under `prefix`.
    pub fn each_object(
        repository: Arc<dyn Repository>,
        prefix: impl Into<String>,
        activity: Activity,
        budget: Duration,
    ) -> Self {
        Self {
            repository,
            prefix: prefix.into(),
            activity,
            kind: TriggerKind::ForEachObject,
            budget,
            queue: None,
        }
    }

    /// Iterate the latest version of every object under `prefix`.
    pub fn each_latest(
        repository: Arc<dyn Repository>,
        prefix: impl Into<String>,
        activity: Activity,
        budget: Duration,
    ) -> Self {
        Self {
            repository,
            prefix: prefix.into(),
            activity,
            kind: TriggerKind::ForEachLatest,
            budget,
            queue: None,
        }
    }
}

#[async_trait]
impl TriggerSource for ForEachObjectTrigger {
    async fn next(&mut self) -> Trigger {
        if self.queue.is_none() {
            let listing =
                tokio::time::timeout(self.budget, self.repository.list_objects(&self.prefix)).await;
            match listing {
                Ok(Ok(paths)) => self.queue = Some(paths.into()),
                Ok(Err(e)) => {
                    warn!(prefix = %self.prefix, error = %e, "Object listing failed");
                    return Trigger::no();
                }
                Err(_) => return Trigger::no(),
            }
        }

        match self.queue.as_mut().and_then(VecDeque::pop_front) {
            Some(path) => {
                let mut trigger = Trigger::fired(self.kind, self.activity.clone());
                trigger.object_path = Some(path);
                trigger
            }
            // terminal value: the iteration is exhausted
            None => Trigger::no(),
        }
    }
}

/// Fires on a matching start-of-run transition from the event bus.
pub struct StartOfRunTrigger<C> {
    poller: EventPoller<C>,
    activity: Activity,
}

impl<C: BusConsumer> StartOfRunTrigger<C> {
    /// Consume run transitions from a subscribed poller.
    pub fn new(poller: EventPoller<C>, activity: Activity) -> Self {
        Self { poller, activity }
    }
}

#[async_trait]
impl<C: BusConsumer> TriggerSource for StartOfRunTrigger<C> {
    async fn next(&mut self) -> Trigger {
        let events = match self.poller.poll().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "SOR poll failed");
                return Trigger::no();
            }
        };
        for event in events {
            if matches_start_of_run(&event, &self.activity) {
                let filled = start_of_run_activity(&event, &self.activity);
                return Trigger {
                    kind: TriggerKind::StartOfRun,
                    timestamp: event.timestamp,
                    activity: filled,
                    object_path: None,
                };
            }
        }
        Trigger::no()
    }
}

/// Fires on a matching end-of-run (or teardown) transition.
pub struct EndOfRunTrigger<C> {
    poller: EventPoller<C>,
    activity: Activity,
}

impl<C: BusConsumer> EndOfRunTrigger<C> {
    /// Consume run transitions from a subscribed poller.
    pub fn new(poller: EventPoller<C>, activity: Activity) -> Self {
        Self { poller, activity }
    }
}

#[async_trait]
impl<C: BusConsumer> TriggerSource for EndOfRunTrigger<C> {
    async fn next(&mut self) -> Trigger {
        let events = match self.poller.poll().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "EOR poll failed");
                return Trigger::no();
            }
        };
        for event in events {
            if matches_end_of_run(&event, &self.activity) {
                let filled = end_of_run_activity(&event, &self.activity);
                return Trigger {
                    kind: TriggerKind::EndOfRun,
                    timestamp: event.timestamp,
                    activity: filled,
                    object_path: None,
                };
            }
        }
        Trigger::no()
    }
}

/// Fires on requests arriving over an out-of-band control channel.
pub struct ControlTrigger {
    rx: mpsc::Receiver<Activity>,
}

/// Create a control trigger and its request handle.
pub fn user_or_control() -> (mpsc::Sender<Activity>, ControlTrigger) {
    let (tx, rx) = mpsc::channel(16);
    (tx, ControlTrigger { rx })
}

#[async_trait]
impl TriggerSource for ControlTrigger {
    async fn next(&mut self) -> Trigger {
        match self.rx.try_recv() {
            Ok(activity) => Trigger::fired(TriggerKind::UserOrControl, activity),
            Err(_) => Trigger::no(),
        }
    }
}

/// Everything the trigger factory may need to wire a source.
#[derive(Clone, Default)]
pub struct TriggerFactory {
    /// Repository handle for object-driven triggers.
    pub repository: Option<Arc<dyn Repository>>,
    /// In-process bus for SOR/EOR triggers.
    pub bus: Option<qualo_events::ChannelBus>,
    /// Topic carrying the run transitions.
    pub topic: String,
    /// The activity the triggers are bound to.
    pub activity: Activity,
    /// Per-call budget for sources that touch collaborators.
    pub budget: Option<Duration>,
}

const DEFAULT_BUDGET: Duration = Duration::from_secs(5);

impl TriggerFactory {
    fn budget(&self) -> Duration {
        self.budget.unwrap_or(DEFAULT_BUDGET)
    }

    fn repository(&self, expr: &str) -> Result<Arc<dyn Repository>> {
        self.repository.clone().ok_or_else(|| {
            RuntimeError::fatal_config(format!("trigger '{}' requires a repository", expr))
        })
    }

    /// Build a trigger source from a configuration expression.
    ///
    /// Recognised forms: `once`, `always`, `never`, a period
    /// (`500ms`, `30s`, `10min`, `2h`), `newobject:<path>`,
    /// `foreachobject:<prefix>`, `foreachlatest:<prefix>`,
    /// `sor`/`startofrun`, `eor`/`endofrun`. Anything else is a fatal
    /// configuration error.
    pub async fn from_config(&self, expr: &str) -> Result<Box<dyn TriggerSource>> {
        let lowered = expr.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "once" => return Ok(Box::new(OnceTrigger::new(self.activity.clone()))),
            "always" => return Ok(Box::new(AlwaysTrigger::new(self.activity.clone()))),
            "never" => return Ok(Box::new(NeverTrigger)),
            "sor" | "startofrun" => {
                let poller = self.subscribed_poller(expr).await?;
                return Ok(Box::new(StartOfRunTrigger::new(poller, self.activity.clone())));
            }
            "eor" | "endofrun" => {
                let poller = self.subscribed_poller(expr).await?;
                return Ok(Box::new(EndOfRunTrigger::new(poller, self.activity.clone())));
            }
            _ => {}
        }

        if let Some(path) = lowered.strip_prefix("newobject:") {
            return Ok(Box::new(NewObjectTrigger::new(
                self.repository(expr)?,
                path.to_string(),
                self.activity.clone(),
                self.budget(),
            )));
        }
        if let Some(prefix) = lowered.strip_prefix("foreachobject:") {
            return Ok(Box::new(ForEachObjectTrigger::each_object(
                self.repository(expr)?,
                prefix.to_string(),
                self.activity.clone(),
                self.budget(),
            )));
        }
        if let Some(prefix) = lowered.strip_prefix("foreachlatest:") {
            return Ok(Box::new(ForEachObjectTrigger::each_latest(
                self.repository(expr)?,
                prefix.to_string(),
                self.activity.clone(),
                self.budget(),
            )));
        }

        if let Some(period) = parse_period(&lowered) {
            return Ok(Box::new(PeriodicTrigger::new(period, self.activity.clone())));
        }

        Err(RuntimeError::fatal_config(format!(
            "unknown trigger '{}'",
            expr
        )))
    }

    async fn subscribed_poller(
        &self,
        expr: &str,
    ) -> Result<EventPoller<qualo_events::ChannelConsumer>> {
        let bus = self.bus.clone().ok_or_else(|| {
            RuntimeError::fatal_config(format!("trigger '{}' requires an event bus", expr))
        })?;
        if self.topic.is_empty() {
            return Err(RuntimeError::fatal_config(format!(
                "trigger '{}' requires a topic",
                expr
            )));
        }
        let mut poller = EventPoller::new(
            bus.consumer(),
            PollerConfig {
                budget: self.budget().min(Duration::from_millis(100)),
                ..Default::default()
            },
        );
        poller.subscribe(&self.topic).await?;
        Ok(poller)
    }
}

/// Parse a period expression: `500ms`, `30s`, `10min` or `2h`.
pub fn parse_period(expr: &str) -> Option<Duration> {
    let (digits, unit) = expr.split_at(expr.find(|c: char| !c.is_ascii_digit())?);
    let value: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" | "sec" | "seconds" => Some(Duration::from_secs(value)),
        "min" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualo_core::{Counter, MonitorObject, Payload};
    use qualo_events::proto::{
        event_to_record, Event, OpStatus, RunEvent, TRANSITION_START_ACTIVITY,
        TRANSITION_STOP_ACTIVITY,
    };
    use qualo_events::ChannelBus;
    use qualo_store::MemoryRepository;

    fn transition(kind: &str, env: &str, run: u32, timestamp: u64) -> Event {
        Event {
            timestamp,
            run_event: Some(RunEvent {
                transition: kind.to_string(),
                state: "RUNNING".to_string(),
                transition_status: OpStatus::Started as i32,
                environment_id: env.to_string(),
                run_number: run,
                error: String::new(),
            }),
        }
    }

    #[tokio::test]
    async fn test_once_fires_exactly_once() {
        let mut source = OnceTrigger::new(Activity::default());
        assert_eq!(source.next().await.kind, TriggerKind::Once);
        for _ in 0..3 {
            assert_eq!(source.next().await.kind, TriggerKind::No);
        }
    }

    #[tokio::test]
    async fn test_always_and_never() {
        let mut always = AlwaysTrigger::new(Activity::default());
        assert!(always.next().await.is_fired());
        assert!(always.next().await.is_fired());
        let mut never = NeverTrigger;
        assert!(!never.next().await.is_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_fires_at_most_once_per_period() {
        let mut source = PeriodicTrigger::new(Duration::from_secs(10), Activity::default());
        assert_eq!(source.next().await.kind, TriggerKind::No);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(source.next().await.kind, TriggerKind::Periodic);
        assert_eq!(source.next().await.kind, TriggerKind::No);
        // several missed periods still produce one firing per call
        tokio::time::advance(Duration::from_secs(35)).await;
        assert_eq!(source.next().await.kind, TriggerKind::Periodic);
        assert_eq!(source.next().await.kind, TriggerKind::No);
    }

    #[tokio::test]
    async fn test_new_object_fires_on_fresher_timestamp() {
        let repo = Arc::new(MemoryRepository::new());
        let mo = MonitorObject::new("hA", "task", "TST", Payload::Counter(Counter { count: 1 }));
        repo.store_mo(&mo, 100).await.unwrap();

        let mut source = NewObjectTrigger::new(
            repo.clone(),
            "qc/TST/task/hA",
            Activity::default(),
            Duration::from_secs(1),
        );
        // first call primes on the existing version
        assert_eq!(source.next().await.kind, TriggerKind::No);
        assert_eq!(source.next().await.kind, TriggerKind::No);

        repo.store_mo(&mo, 200).await.unwrap();
        let fired = source.next().await;
        assert_eq!(fired.kind, TriggerKind::NewObject);
        assert_eq!(fired.timestamp, 200);
        assert_eq!(fired.object_path.as_deref(), Some("qc/TST/task/hA"));
        assert_eq!(source.next().await.kind, TriggerKind::No);
    }

    #[tokio::test]
    async fn test_new_object_fires_on_first_appearance_when_absent_at_start() {
        let repo = Arc::new(MemoryRepository::new());
        let mut source = NewObjectTrigger::new(
            repo.clone(),
            "qc/TST/task/hA",
            Activity::default(),
            Duration::from_secs(1),
        );
        assert_eq!(source.next().await.kind, TriggerKind::No);

        let mo = MonitorObject::new("hA", "task", "TST", Payload::Counter(Counter { count: 1 }));
        repo.store_mo(&mo, 100).await.unwrap();
        assert_eq!(source.next().await.kind, TriggerKind::NewObject);
    }

    #[tokio::test]
    async fn test_for_each_object_iterates_then_terminates() {
        let repo = Arc::new(MemoryRepository::new());
        for name in ["hA", "hB"] {
            let mo = MonitorObject::new(name, "task", "TST", Payload::Counter(Counter { count: 1 }));
            repo.store_mo(&mo, 100).await.unwrap();
        }
        let mut source = ForEachObjectTrigger::each_object(
            repo,
            "qc/TST/task/",
            Activity::default(),
            Duration::from_secs(1),
        );
        let first = source.next().await;
        assert_eq!(first.kind, TriggerKind::ForEachObject);
        assert_eq!(first.object_path.as_deref(), Some("qc/TST/task/hA"));
        let second = source.next().await;
        assert_eq!(second.object_path.as_deref(), Some("qc/TST/task/hB"));
        assert_eq!(source.next().await.kind, TriggerKind::No);
    }

    #[tokio::test]
    async fn test_sor_trigger_fills_activity() {
        // scenario S5
        let bus = ChannelBus::new();
        let factory = TriggerFactory {
            bus: Some(bus.clone()),
            topic: "transitions".to_string(),
            activity: Activity::default(),
            ..Default::default()
        };
        let mut source = factory.from_config("sor").await.unwrap();
        assert_eq!(source.next().await.kind, TriggerKind::No);

        bus.publish(
            "transitions",
            event_to_record(&transition(TRANSITION_START_ACTIVITY, "E", 123, 1234)),
        )
        .await;

        let fired = source.next().await;
        assert_eq!(fired.kind, TriggerKind::StartOfRun);
        assert_eq!(fired.timestamp, 1234);
        assert_eq!(fired.activity.id, 123);
        assert_eq!(fired.activity.partition_name, "E");
        assert_eq!(fired.activity.validity.min, 1234);
    }

    #[tokio::test]
    async fn test_sor_trigger_respects_constraints() {
        let bus = ChannelBus::new();
        let mut constrained = Activity::new(123, "PHYSICS");
        constrained.partition_name = "E".to_string();
        let factory = TriggerFactory {
            bus: Some(bus.clone()),
            topic: "transitions".to_string(),
            activity: constrained,
            ..Default::default()
        };
        let mut source = factory.from_config("startofrun").await.unwrap();

        bus.publish(
            "transitions",
            event_to_record(&transition(TRANSITION_START_ACTIVITY, "E", 42, 1)),
        )
        .await;
        assert_eq!(source.next().await.kind, TriggerKind::No);

        bus.publish(
            "transitions",
            event_to_record(&transition(TRANSITION_START_ACTIVITY, "E", 123, 2)),
        )
        .await;
        assert_eq!(source.next().await.kind, TriggerKind::StartOfRun);
    }

    #[tokio::test]
    async fn test_eor_trigger_sets_validity_max() {
        let bus = ChannelBus::new();
        let factory = TriggerFactory {
            bus: Some(bus.clone()),
            topic: "transitions".to_string(),
            activity: Activity::default(),
            ..Default::default()
        };
        let mut source = factory.from_config("eor").await.unwrap();
        assert_eq!(source.next().await.kind, TriggerKind::No);

        bus.publish(
            "transitions",
            event_to_record(&transition(TRANSITION_STOP_ACTIVITY, "E", 123, 5555)),
        )
        .await;
        let fired = source.next().await;
        assert_eq!(fired.kind, TriggerKind::EndOfRun);
        assert_eq!(fired.activity.validity.max, 5555);
    }

    #[tokio::test]
    async fn test_control_channel() {
        let (tx, mut source) = user_or_control();
        assert_eq!(source.next().await.kind, TriggerKind::No);
        tx.send(Activity::new(7, "PHYSICS")).await.unwrap();
        let fired = source.next().await;
        assert_eq!(fired.kind, TriggerKind::UserOrControl);
        assert_eq!(fired.activity.id, 7);
    }

    #[tokio::test]
    async fn test_factory_parses_known_expressions() {
        let factory = TriggerFactory::default();
        assert!(factory.from_config("once").await.is_ok());
        assert!(factory.from_config("always").await.is_ok());
        assert!(factory.from_config("never").await.is_ok());
        assert!(factory.from_config("30s").await.is_ok());
        assert!(factory.from_config("10min").await.is_ok());
        let err = factory.from_config("onFullMoon").await.err().unwrap();
        assert_eq!(err.error_code(), "FATAL_CONFIGURATION");
        // object triggers without a repository are a configuration error
        let err = factory.from_config("newobject:qc/TST/task/hA").await.err().unwrap();
        assert_eq!(err.error_code(), "FATAL_CONFIGURATION");
        // sor without a bus is a configuration error
        let err = factory.from_config("sor").await.err().unwrap();
        assert_eq!(err.error_code(), "FATAL_CONFIGURATION");
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_period("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_period("10min"), Some(Duration::from_secs(600)));
        assert_eq!(parse_period("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_period("banana"), None);
        assert_eq!(parse_period("30"), None);
    }
}

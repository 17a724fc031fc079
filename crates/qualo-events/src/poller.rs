// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The bounded run-transition poller.
//!
//! Wraps a [`BusConsumer`] and turns raw records into decoded events:
//! bounded batches, per-record decode-failure isolation, and collapsing of
//! duplicate transitions within one poll cycle. Ordering within a partition
//! is preserved. The poller owns no scheduling policy; triggers drain it.

use crate::consumer::BusConsumer;
use crate::error::Result;
use crate::proto::{record_to_event, Event};
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Maximum records fetched per poll cycle.
    pub max_records: usize,
    /// Time budget per poll cycle.
    pub budget: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_records: 64,
            budget: Duration::from_millis(100),
        }
    }
}

/// Counters surfaced by the poller (the metrics hook).
#[derive(Debug, Default, Clone)]
pub struct PollerMetrics {
    /// Raw records consumed from the bus.
    pub records_polled: u64,
    /// Records that failed to decode and were skipped.
    pub decode_failures: u64,
    /// Duplicate transitions collapsed within a poll cycle.
    pub duplicates_collapsed: u64,
}

/// Decodes and deduplicates run-transition records.
pub struct EventPoller<C> {
    consumer: C,
    config: PollerConfig,
    metrics: PollerMetrics,
}

impl<C: BusConsumer> EventPoller<C> {
    /// Wrap a consumer; the consumer must already know its broker.
    pub fn new(consumer: C, config: PollerConfig) -> Self {
        Self {
            consumer,
            config,
            metrics: PollerMetrics::default(),
        }
    }

    /// Subscribe the underlying consumer.
    pub async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.consumer.subscribe(topic).await
    }

    /// Current counters.
    pub fn metrics(&self) -> &PollerMetrics {
        &self.metrics
    }

    /// One bounded poll cycle.
    ///
    /// Within the cycle, two records with identical
    /// `(run_number, environment_id, transition)` collapse to the first one.
    /// A record that fails to decode increments a counter and is skipped.
    pub async fn poll(&mut self) -> Result<Vec<Event>> {
        let records = self
            .consumer
            .poll(self.config.max_records, self.config.budget)
            .await?;
        self.metrics.records_polled += records.len() as u64;

        let mut seen: HashSet<(u32, String, String)> = HashSet::new();
        let mut events = Vec::new();
        for record in records {
            let event = match record_to_event(&record.payload) {
                Ok(event) => event,
                Err(e) => {
                    self.metrics.decode_failures += 1;
                    warn!(
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Skipping undecodable record"
                    );
                    continue;
                }
            };
            if let Some(run_event) = &event.run_event {
                let key = (
                    run_event.run_number,
                    run_event.environment_id.clone(),
                    run_event.transition.clone(),
                );
                if !seen.insert(key) {
                    self.metrics.duplicates_collapsed += 1;
                    continue;
                }
            }
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ChannelBus;
    use crate::proto::{event_to_record, OpStatus, RunEvent, TRANSITION_START_ACTIVITY, TRANSITION_STOP_ACTIVITY};

    fn transition_event(transition: &str, env: &str, run: u32) -> Event {
        Event {
            timestamp: 1234,
            run_event: Some(RunEvent {
                transition: transition.to_string(),
                state: "RUNNING".to_string(),
                transition_status: OpStatus::Started as i32,
                environment_id: env.to_string(),
                run_number: run,
                error: String::new(),
            }),
        }
    }

    async fn poller_on(bus: &ChannelBus, topic: &str) -> EventPoller<crate::consumer::ChannelConsumer> {
        let mut poller = EventPoller::new(
            bus.consumer(),
            PollerConfig {
                max_records: 64,
                budget: Duration::from_millis(50),
            },
        );
        poller.subscribe(topic).await.unwrap();
        poller
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_stop_polling() {
        let bus = ChannelBus::new();
        let mut poller = poller_on(&bus, "t").await;

        bus.publish("t", vec![0x12u8]).await; // garbage
        bus.publish("t", event_to_record(&transition_event(TRANSITION_START_ACTIVITY, "E", 1)))
            .await;

        let events = poller.poll().await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_start_of_run());
        assert_eq!(poller.metrics().decode_failures, 1);
        assert_eq!(poller.metrics().records_polled, 2);
    }

    #[tokio::test]
    async fn test_duplicate_transitions_collapse_within_cycle() {
        let bus = ChannelBus::new();
        let mut poller = poller_on(&bus, "t").await;

        let sor = transition_event(TRANSITION_START_ACTIVITY, "E", 123);
        bus.publish("t", event_to_record(&sor)).await;
        bus.publish("t", event_to_record(&sor)).await;
        // different transition for the same run is kept
        bus.publish(
            "t",
            event_to_record(&transition_event(TRANSITION_STOP_ACTIVITY, "E", 123)),
        )
        .await;

        let events = poller.poll().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(poller.metrics().duplicates_collapsed, 1);
    }

    #[tokio::test]
    async fn test_duplicates_across_cycles_are_not_collapsed() {
        let bus = ChannelBus::new();
        let mut poller = poller_on(&bus, "t").await;

        let sor = transition_event(TRANSITION_START_ACTIVITY, "E", 123);
        bus.publish("t", event_to_record(&sor)).await;
        assert_eq!(poller.poll().await.unwrap().len(), 1);

        bus.publish("t", event_to_record(&sor)).await;
        // dedup is per poll cycle, a later cycle sees the transition again
        assert_eq!(poller.poll().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_order_is_preserved() {
        let bus = ChannelBus::new();
        let mut poller = poller_on(&bus, "t").await;

        for run in 1..=3u32 {
            bus.publish(
                "t",
                event_to_record(&transition_event(TRANSITION_START_ACTIVITY, "E", run)),
            )
            .await;
        }
        let events = poller.poll().await.unwrap();
        let runs: Vec<u32> = events
            .iter()
            .filter_map(|e| e.run_event.as_ref().map(|re| re.run_number))
            .collect();
        assert_eq!(runs, vec![1, 2, 3]);
    }
}

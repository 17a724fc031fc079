// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The bus consumer seam.
//!
//! The real broker client is an external collaborator; the poller only sees
//! [`BusConsumer`]. The in-process [`ChannelBus`] implementation backs tests
//! and single-node runs. Every consumer owns an independent position, so one
//! trigger's consumption never starves another's.

use crate::error::{EventError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

/// A raw record as delivered by the bus.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Partition the record was read from.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// The record value.
    pub payload: Bytes,
}

/// An abstract bus consumer with bounded polling.
///
/// `poll` returns at most `max_records` records and never blocks past
/// `budget`; an empty return is normal.
#[async_trait]
pub trait BusConsumer: Send {
    /// Subscribe to a topic. Must be called before the first poll.
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Poll a bounded batch within a time budget.
    async fn poll(&mut self, max_records: usize, budget: Duration) -> Result<Vec<RawRecord>>;
}

const CHANNEL_CAPACITY: usize = 1024;

/// In-process bus with per-topic broadcast channels.
///
/// Each consumer receives every record published after it subscribed, at its
/// own pace, which models independent consumer groups.
#[derive(Clone, Default)]
pub struct ChannelBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<RawRecord>>>>,
}

impl ChannelBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    async fn topic_sender(&self, topic: &str) -> broadcast::Sender<RawRecord> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish a record value on a topic.
    ///
    /// Records published while no consumer is subscribed are dropped, like a
    /// broker with latest-offset consumers.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) {
        let sender = self.topic_sender(topic).await;
        let record = RawRecord {
            partition: 0,
            offset: -1,
            payload: payload.into(),
        };
        // send fails only when nobody listens
        let _ = sender.send(record);
    }

    /// Create a consumer with its own position.
    pub fn consumer(&self) -> ChannelConsumer {
        ChannelConsumer {
            bus: self.clone(),
            receiver: None,
        }
    }
}

/// A consumer over a [`ChannelBus`] topic.
pub struct ChannelConsumer {
    bus: ChannelBus,
    receiver: Option<broadcast::Receiver<RawRecord>>,
}

#[async_trait]
impl BusConsumer for ChannelConsumer {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let sender = self.bus.topic_sender(topic).await;
        self.receiver = Some(sender.subscribe());
        Ok(())
    }

    async fn poll(&mut self, max_records: usize, budget: Duration) -> Result<Vec<RawRecord>> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(EventError::NotSubscribed);
        };

        let mut records = Vec::new();
        let deadline = tokio::time::Instant::now() + budget;
        while records.len() < max_records {
            let next = tokio::time::timeout_at(deadline, receiver.recv()).await;
            match next {
                Ok(Ok(record)) => records.push(record),
                Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                    warn!(missed, "Consumer lagged, records dropped by the bus");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                // budget exhausted: hand back what we have
                Err(_) => break,
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_requires_subscription() {
        let bus = ChannelBus::new();
        let mut consumer = bus.consumer();
        assert!(
            consumer
                .poll(10, Duration::from_millis(1))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_publish_and_poll_bounded() {
        let bus = ChannelBus::new();
        let mut consumer = bus.consumer();
        consumer.subscribe("run-transitions").await.unwrap();

        for i in 0..5u8 {
            bus.publish("run-transitions", vec![i]).await;
        }
        let records = consumer
            .poll(3, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].payload.as_ref(), &[0]);

        let rest = consumer
            .poll(10, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn test_consumers_have_independent_positions() {
        let bus = ChannelBus::new();
        let mut a = bus.consumer();
        let mut b = bus.consumer();
        a.subscribe("t").await.unwrap();
        b.subscribe("t").await.unwrap();

        bus.publish("t", vec![1u8]).await;

        let got_a = a.poll(10, Duration::from_millis(50)).await.unwrap();
        let got_b = b.poll(10, Duration::from_millis(50)).await.unwrap();
        assert_eq!(got_a.len(), 1);
        assert_eq!(got_b.len(), 1, "one consumer's read must not starve the other");
    }

    #[tokio::test]
    async fn test_budget_bounds_the_poll() {
        let bus = ChannelBus::new();
        let mut consumer = bus.consumer();
        consumer.subscribe("t").await.unwrap();

        let start = std::time::Instant::now();
        let records = consumer
            .poll(10, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(records.is_empty());
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The merger actor.
//!
//! N parallel task replicas feed their snapshots into one mailbox; the
//! merger reduces them per task and publishes the reduced collection on a
//! flush cycle. Paths that hit an inconsistent merge hint are poisoned and
//! excluded from further merging without affecting their neighbours.

use crate::collection::merge_collections;
use qualo_core::MonitorObjectCollection;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info};

/// Merger configuration.
#[derive(Debug, Clone)]
pub struct MergerConfig {
    /// How often to publish the reduced collections.
    pub flush_interval: Duration,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10),
        }
    }
}

/// Counters surfaced by the merger.
#[derive(Debug, Default, Clone)]
pub struct MergerMetrics {
    /// Snapshots consumed from the input streams.
    pub inputs_merged: u64,
    /// Reduced collections published downstream.
    pub flushes: u64,
    /// Paths poisoned by an inconsistent merge hint.
    pub poisoned_paths: u64,
}

/// Reduces parallel snapshot streams into one publication per task.
pub struct Merger {
    input: mpsc::Receiver<MonitorObjectCollection>,
    output: mpsc::Sender<MonitorObjectCollection>,
    config: MergerConfig,
    shutdown: Arc<Notify>,
    // per-task accumulated target
    targets: HashMap<String, MonitorObjectCollection>,
    // tasks touched since the last flush
    dirty: HashSet<String>,
    poisoned: HashSet<String>,
    metrics: MergerMetrics,
}

impl Merger {
    /// Create a merger between an input stream and an output sink.
    pub fn new(
        input: mpsc::Receiver<MonitorObjectCollection>,
        output: mpsc::Sender<MonitorObjectCollection>,
        config: MergerConfig,
    ) -> Self {
        Self {
            input,
            output,
            config,
            shutdown: Arc::new(Notify::new()),
            targets: HashMap::new(),
            dirty: HashSet::new(),
            poisoned: HashSet::new(),
            metrics: MergerMetrics::default(),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the merger loop until shutdown or until all producers are gone.
    ///
    /// Returns the final metrics; pending accumulations are flushed once
    /// before returning.
    pub async fn run(mut self) -> MergerMetrics {
        info!(
            flush_interval_secs = self.config.flush_interval.as_secs(),
            "Merger started"
        );
        let mut flush_timer = tokio::time::interval(self.config.flush_interval);
        // the first tick completes immediately; skip it
        flush_timer.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Merger shutting down");
                    break;
                }
                _ = flush_timer.tick() => {
                    self.flush().await;
                }
                received = self.input.recv() => {
                    match received {
                        Some(collection) => self.consume(collection),
                        None => {
                            debug!("All producers closed, stopping merger");
                            break;
                        }
                    }
                }
            }
        }

        self.flush().await;
        self.metrics
    }

    fn consume(&mut self, mut collection: MonitorObjectCollection) {
        // poisoned paths are dropped on input so they cannot resurrect
        collection
            .objects
            .retain(|mo| !self.poisoned.contains(&mo.path()));

        self.dirty.insert(collection.task_name.clone());
        let target = self
            .targets
            .entry(collection.task_name.clone())
            .or_insert_with(|| MonitorObjectCollection::new(collection.task_name.clone()));

        let failures = merge_collections(target, &collection);
        for failure in failures {
            let path = failure.path().to_string();
            error!(path = %path, error = %failure, "Poisoning path after merge failure");
            target.objects.retain(|mo| mo.path() != path);
            if self.poisoned.insert(path) {
                self.metrics.poisoned_paths += 1;
            }
        }
        self.metrics.inputs_merged += 1;
    }

    // only tasks touched since the previous flush are republished
    async fn flush(&mut self) {
        let dirty = std::mem::take(&mut self.dirty);
        for task_name in dirty {
            let Some(target) = self.targets.get(&task_name) else {
                continue;
            };
            if target.is_empty() {
                continue;
            }
            if self.output.send(target.clone()).await.is_err() {
                error!(task = %target.task_name, "Merger output closed, dropping flush");
                return;
            }
            self.metrics.flushes += 1;
            debug!(task = %target.task_name, objects = target.len(), "Flushed merged collection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualo_core::{Counter, Histo1d, MonitorObject, Payload, RatioHisto1d};

    fn snapshot(task: &str, objects: Vec<MonitorObject>) -> MonitorObjectCollection {
        MonitorObjectCollection {
            task_name: task.to_string(),
            objects,
        }
    }

    fn counter(name: &str, count: u64) -> MonitorObject {
        MonitorObject::new(name, "task", "TST", Payload::Counter(Counter { count }))
    }

    #[tokio::test]
    async fn test_merges_parallel_streams_and_flushes_on_close() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let merger = Merger::new(
            in_rx,
            out_tx,
            MergerConfig {
                flush_interval: Duration::from_secs(3600),
            },
        );
        let handle = tokio::spawn(merger.run());

        in_tx.send(snapshot("task", vec![counter("c", 2)])).await.unwrap();
        in_tx.send(snapshot("task", vec![counter("c", 3)])).await.unwrap();
        drop(in_tx);

        let metrics = handle.await.unwrap();
        assert_eq!(metrics.inputs_merged, 2);
        assert_eq!(metrics.flushes, 1);

        let merged = out_rx.recv().await.unwrap();
        match &merged.find("c").unwrap().payload {
            Payload::Counter(c) => assert_eq!(c.count, 5),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poisoned_path_is_excluded_but_neighbours_survive() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let merger = Merger::new(
            in_rx,
            out_tx,
            MergerConfig {
                flush_interval: Duration::from_secs(3600),
            },
        );
        let handle = tokio::spawn(merger.run());

        in_tx
            .send(snapshot(
                "task",
                vec![
                    counter("good", 1),
                    MonitorObject::new(
                        "clash",
                        "task",
                        "TST",
                        Payload::Histo1d(Histo1d::new(2, 0.0, 2.0)),
                    ),
                ],
            ))
            .await
            .unwrap();
        in_tx
            .send(snapshot(
                "task",
                vec![
                    counter("good", 2),
                    MonitorObject::new(
                        "clash",
                        "task",
                        "TST",
                        Payload::RatioHisto1d(RatioHisto1d::new(2, 0.0, 2.0)),
                    ),
                ],
            ))
            .await
            .unwrap();
        drop(in_tx);

        let metrics = handle.await.unwrap();
        assert_eq!(metrics.poisoned_paths, 1);

        let merged = out_rx.recv().await.unwrap();
        assert!(merged.find("clash").is_none());
        match &merged.find("good").unwrap().payload {
            Payload::Counter(c) => assert_eq!(c.count, 3),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}

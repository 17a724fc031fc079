// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The task runtime.
//!
//! A task is a state machine over the activity lifecycle, driven by a
//! mailbox: data batches, cycle ticks and activity transitions all arrive as
//! messages, and `monitor_data` is the single dispatch point. The runner
//! owns the objects manager, snapshots it at end of cycle and ships the
//! snapshot to a collection sink (the merger input or the repository
//! writer).

use crate::context::{now_ms, Services};
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use bytes::Bytes;
use qualo_core::object::metadata_keys;
use qualo_core::{Activity, CustomParameters, MonitorObjectCollection, ObjectsManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

/// One input record handed to a task.
///
/// The framework does not interpret the payload; the dataflow router
/// labels it with its origin so the task can dispatch.
#[derive(Debug, Clone)]
pub struct InputRecord {
    /// Origin label, e.g. `digits`, `clusters`, `trackrofs`.
    pub origin: String,
    /// The raw record bytes.
    pub payload: Bytes,
}

/// A batch of input records for one `monitor_data` call.
#[derive(Debug, Clone, Default)]
pub struct DataBatch {
    /// The records of the batch.
    pub records: Vec<InputRecord>,
    /// Orbits spanned by the batch, for occupancy-to-rate normalisation.
    pub n_orbits: u64,
}

/// Context handed to the blocking-allowed lifecycle phases.
pub struct TaskContext<'a> {
    /// The task's object registry.
    pub objects: &'a mut ObjectsManager,
    /// The task's tunables.
    pub params: &'a CustomParameters,
    /// External collaborators; only usable in phases that may block.
    pub services: &'a Services,
}

/// User-implemented detector task.
///
/// `initialize` and `start_of_activity` may block on I/O; the cycle phases
/// must not.
#[async_trait]
pub trait Task: Send {
    /// One-time setup: read tunables, register objects.
    async fn initialize(&mut self, ctx: &mut TaskContext<'_>) -> Result<()>;

    /// Per-activity reset; published objects have already been reset.
    async fn start_of_activity(&mut self, ctx: &mut TaskContext<'_>, activity: &Activity)
        -> Result<()>;

    /// Start of a monitoring cycle.
    fn start_of_cycle(&mut self, _objects: &mut ObjectsManager) {}

    /// Consume one batch of input records. Must not block.
    fn monitor_data(&mut self, objects: &mut ObjectsManager, batch: &DataBatch);

    /// End of a monitoring cycle, before the snapshot is taken.
    fn end_of_cycle(&mut self, _objects: &mut ObjectsManager) {}

    /// End of the activity.
    fn end_of_activity(&mut self, _objects: &mut ObjectsManager) {}

    /// Discard all accumulated statistics.
    fn reset(&mut self, objects: &mut ObjectsManager) {
        objects.reset_objects();
    }
}

/// Lifecycle states of a task runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Constructed, not initialized.
    Created,
    /// `initialize` completed.
    Initialized,
    /// Inside an activity, between cycles.
    ActivityStarted,
    /// Inside a monitoring cycle.
    CycleStarted,
    /// The activity ended; a new one may start.
    ActivityEnded,
}

/// Messages accepted by the task mailbox.
#[derive(Debug)]
pub enum TaskMessage {
    /// Begin an activity.
    StartActivity(Activity),
    /// A batch of input records.
    Data(DataBatch),
    /// Close the current cycle now (the cycle timer posts this too).
    EndOfCycle,
    /// End the current activity.
    EndActivity,
    /// Discard accumulated statistics and fall back to `Initialized`.
    Reset,
    /// Stop the runner.
    Stop,
}

/// Task runner configuration.
#[derive(Debug, Clone)]
pub struct TaskRunnerConfig {
    /// Task name, unique within the detector.
    pub task_name: String,
    /// Detector code.
    pub detector: String,
    /// Cycle duration.
    pub cycle_period: Duration,
    /// Deadline for the blocking-allowed phases.
    pub phase_timeout: Duration,
    /// User tunables.
    pub params: CustomParameters,
}

impl TaskRunnerConfig {
    /// A configuration with the standard periods.
    pub fn new(task_name: impl Into<String>, detector: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            detector: detector.into(),
            cycle_period: Duration::from_secs(10),
            phase_timeout: Duration::from_secs(30),
            params: CustomParameters::new(),
        }
    }
}

/// Counters surfaced by the task runner.
#[derive(Debug, Default, Clone)]
pub struct TaskMetrics {
    /// Batches dispatched to `monitor_data`.
    pub batches: u64,
    /// Cycles completed.
    pub cycles: u64,
    /// Messages refused because of the lifecycle state.
    pub invalid_transitions: u64,
    /// Phases aborted on deadline.
    pub phase_timeouts: u64,
}

/// Drives one task instance through its lifecycle.
pub struct TaskRunner {
    task: Box<dyn Task>,
    config: TaskRunnerConfig,
    services: Services,
    manager: ObjectsManager,
    state: TaskState,
    mailbox: mpsc::Receiver<TaskMessage>,
    snapshots: mpsc::Sender<MonitorObjectCollection>,
    shutdown: Arc<Notify>,
    cycle_number: u64,
    metrics: TaskMetrics,
}

impl TaskRunner {
    /// Create a runner; snapshots go to `snapshots` at each end of cycle.
    pub fn new(
        task: Box<dyn Task>,
        config: TaskRunnerConfig,
        services: Services,
        mailbox: mpsc::Receiver<TaskMessage>,
        snapshots: mpsc::Sender<MonitorObjectCollection>,
    ) -> Self {
        let manager = ObjectsManager::new(&config.task_name, &config.detector);
        Self {
            task,
            config,
            services,
            manager,
            state: TaskState::Created,
            mailbox,
            snapshots,
            shutdown: Arc::new(Notify::new()),
            cycle_number: 0,
            metrics: TaskMetrics::default(),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run to completion. Returns the final metrics.
    pub async fn run(mut self) -> Result<TaskMetrics> {
        self.initialize().await?;
        info!(task = %self.config.task_name, "Task runner started");

        let mut cycle_timer = tokio::time::interval(self.config.cycle_period);
        cycle_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        cycle_timer.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(task = %self.config.task_name, "Task runner shutting down");
                    break;
                }
                _ = cycle_timer.tick() => {
                    if self.state == TaskState::CycleStarted {
                        self.finish_cycle().await;
                        self.task.start_of_cycle(&mut self.manager);
                        self.state = TaskState::CycleStarted;
                    }
                }
                message = self.mailbox.recv() => {
                    match message {
                        Some(TaskMessage::Stop) | None => break,
                        Some(message) => {
                            if let Err(e) = self.dispatch(message).await {
                                match e {
                                    RuntimeError::InvalidTransition { .. } => {
                                        self.metrics.invalid_transitions += 1;
                                        warn!(task = %self.config.task_name, error = %e, "Message refused");
                                    }
                                    RuntimeError::PhaseTimeout { .. } => {
                                        self.metrics.phase_timeouts += 1;
                                        error!(task = %self.config.task_name, error = %e, "Phase timed out, resetting task");
                                        self.task.reset(&mut self.manager);
                                        self.state = TaskState::Initialized;
                                    }
                                    other => return Err(other),
                                }
                            }
                        }
                    }
                }
            }
        }

        if self.state == TaskState::CycleStarted {
            self.finish_cycle().await;
            self.task.end_of_activity(&mut self.manager);
        }
        Ok(self.metrics)
    }

    async fn initialize(&mut self) -> Result<()> {
        let mut ctx = TaskContext {
            objects: &mut self.manager,
            params: &self.config.params,
            services: &self.services,
        };
        let phase = tokio::time::timeout(self.config.phase_timeout, self.task.initialize(&mut ctx));
        match phase.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RuntimeError::PhaseTimeout {
                    phase: "initialize".to_string(),
                    timeout_ms: self.config.phase_timeout.as_millis() as u64,
                });
            }
        }
        self.state = TaskState::Initialized;
        debug!(task = %self.config.task_name, objects = self.manager.len(), "Task initialized");
        Ok(())
    }

    async fn dispatch(&mut self, message: TaskMessage) -> Result<()> {
        match message {
            TaskMessage::StartActivity(activity) => self.start_activity(activity).await,
            TaskMessage::Data(batch) => {
                if self.state != TaskState::CycleStarted {
                    return Err(RuntimeError::InvalidTransition {
                        details: format!("data batch in state {:?}", self.state),
                    });
                }
                self.task.monitor_data(&mut self.manager, &batch);
                self.metrics.batches += 1;
                Ok(())
            }
            TaskMessage::EndOfCycle => {
                if self.state != TaskState::CycleStarted {
                    return Err(RuntimeError::InvalidTransition {
                        details: format!("end of cycle in state {:?}", self.state),
                    });
                }
                self.finish_cycle().await;
                self.task.start_of_cycle(&mut self.manager);
                self.state = TaskState::CycleStarted;
                Ok(())
            }
            TaskMessage::EndActivity => {
                if self.state != TaskState::CycleStarted && self.state != TaskState::ActivityStarted
                {
                    return Err(RuntimeError::InvalidTransition {
                        details: format!("end of activity in state {:?}", self.state),
                    });
                }
                if self.state == TaskState::CycleStarted {
                    self.finish_cycle().await;
                }
                self.task.end_of_activity(&mut self.manager);
                self.state = TaskState::ActivityEnded;
                info!(task = %self.config.task_name, "Activity ended");
                Ok(())
            }
            TaskMessage::Reset => {
                self.task.reset(&mut self.manager);
                self.cycle_number = 0;
                self.state = TaskState::Initialized;
                Ok(())
            }
            TaskMessage::Stop => Ok(()),
        }
    }

    async fn start_activity(&mut self, activity: Activity) -> Result<()> {
        match self.state {
            TaskState::Initialized | TaskState::ActivityEnded => {}
            other => {
                return Err(RuntimeError::InvalidTransition {
                    details: format!("start of activity in state {:?}", other),
                });
            }
        }
        self.manager.reset_objects();
        self.manager.set_activity(activity.clone());
        self.cycle_number = 0;

        let mut ctx = TaskContext {
            objects: &mut self.manager,
            params: &self.config.params,
            services: &self.services,
        };
        let phase = tokio::time::timeout(
            self.config.phase_timeout,
            self.task.start_of_activity(&mut ctx, &activity),
        );
        match phase.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RuntimeError::PhaseTimeout {
                    phase: "start_of_activity".to_string(),
                    timeout_ms: self.config.phase_timeout.as_millis() as u64,
                });
            }
        }

        info!(task = %self.config.task_name, activity = %activity, "Activity started");
        self.task.start_of_cycle(&mut self.manager);
        self.state = TaskState::CycleStarted;
        Ok(())
    }

    async fn finish_cycle(&mut self) {
        self.task.end_of_cycle(&mut self.manager);
        self.cycle_number += 1;
        let timestamp = now_ms();
        let cycle = self.cycle_number.to_string();
        for mo in self.manager.iter_mut() {
            mo.add_or_update_metadata(metadata_keys::CYCLE_NUMBER, cycle.clone());
            mo.validity.update(timestamp);
        }
        let snapshot = self.manager.snapshot();
        debug!(
            task = %self.config.task_name,
            cycle = self.cycle_number,
            objects = snapshot.len(),
            "Cycle finished"
        );
        if self.snapshots.send(snapshot).await.is_err() {
            warn!(task = %self.config.task_name, "Snapshot sink closed, dropping cycle output");
        }
        self.metrics.cycles += 1;
        self.state = TaskState::ActivityStarted;
    }
}

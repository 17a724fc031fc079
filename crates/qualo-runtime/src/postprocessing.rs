// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The post-processing runtime.
//!
//! Post-processing tasks run long-period analyses over stored objects,
//! driven entirely by triggers: one set starts the task, one set makes it
//! update, one set finalizes it. A full init-to-stop interval typically
//! brackets a run (SOR to EOR).

use crate::context::Services;
use crate::error::Result;
use crate::triggers::{Trigger, TriggerFactory, TriggerKind, TriggerSource};
use async_trait::async_trait;
use qualo_core::CustomParameters;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info};

/// User-implemented post-processing task.
#[async_trait]
pub trait PostProcessingTask: Send {
    /// Read tunables; invoked once before the first trigger interval.
    fn configure(&mut self, _params: &CustomParameters) -> Result<()> {
        Ok(())
    }

    /// Start of a trigger interval. May read from the repository.
    async fn initialize(&mut self, trigger: &Trigger, services: &Services) -> Result<()>;

    /// One update within the interval. May read and publish objects.
    async fn update(&mut self, trigger: &Trigger, services: &Services) -> Result<()>;

    /// End of the interval.
    async fn finalize(&mut self, trigger: &Trigger, services: &Services) -> Result<()>;
}

/// Trigger expressions bracketing a post-processing task.
#[derive(Debug, Clone)]
pub struct PostProcessingConfig {
    /// Task name.
    pub name: String,
    /// Detector code.
    pub detector: String,
    /// Expressions starting an interval.
    pub init_triggers: Vec<String>,
    /// Expressions producing updates.
    pub update_triggers: Vec<String>,
    /// Expressions ending the interval.
    pub stop_triggers: Vec<String>,
    /// User tunables.
    pub params: CustomParameters,
}

/// Runner states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcessingState {
    /// Waiting for an init trigger.
    Created,
    /// Inside a trigger interval.
    Running,
    /// Finalized.
    Finished,
}

/// Counters surfaced by the post-processing runner.
#[derive(Debug, Default, Clone)]
pub struct PostProcessingMetrics {
    /// Completed update calls.
    pub updates: u64,
    /// Intervals started.
    pub intervals_started: u64,
    /// Intervals finalized.
    pub intervals_finalized: u64,
}

/// Drives one post-processing task through trigger intervals.
pub struct PostProcessingRunner {
    task: Box<dyn PostProcessingTask>,
    config: PostProcessingConfig,
    services: Services,
    state: PostProcessingState,
    init_sources: Vec<Box<dyn TriggerSource>>,
    update_sources: Vec<Box<dyn TriggerSource>>,
    stop_sources: Vec<Box<dyn TriggerSource>>,
    shutdown: Arc<Notify>,
    metrics: PostProcessingMetrics,
}

impl PostProcessingRunner {
    /// Build a runner, wiring the trigger expressions through the factory.
    pub async fn new(
        task: Box<dyn PostProcessingTask>,
        config: PostProcessingConfig,
        services: Services,
        factory: &TriggerFactory,
    ) -> Result<Self> {
        let mut init_sources = Vec::new();
        for expr in &config.init_triggers {
            init_sources.push(factory.from_config(expr).await?);
        }
        let mut update_sources = Vec::new();
        for expr in &config.update_triggers {
            update_sources.push(factory.from_config(expr).await?);
        }
        let mut stop_sources = Vec::new();
        for expr in &config.stop_triggers {
            stop_sources.push(factory.from_config(expr).await?);
        }
        Ok(Self {
            task,
            config,
            services,
            state: PostProcessingState::Created,
            init_sources,
            update_sources,
            stop_sources,
            shutdown: Arc::new(Notify::new()),
            metrics: PostProcessingMetrics::default(),
        })
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// The current state.
    pub fn state(&self) -> PostProcessingState {
        self.state
    }

    /// Current counters.
    pub fn metrics(&self) -> &PostProcessingMetrics {
        &self.metrics
    }

    /// Configure the user task. Must run before the first cycle.
    pub fn configure(&mut self) -> Result<()> {
        self.task.configure(&self.config.params)
    }

    /// One scheduling cycle: drain the relevant trigger sets once.
    pub async fn run_cycle(&mut self) -> Result<PostProcessingState> {
        match self.state {
            PostProcessingState::Created => {
                if let Some(trigger) = poll_sources(&mut self.init_sources).await {
                    info!(task = %self.config.name, kind = ?trigger.kind, "Post-processing interval started");
                    self.task.initialize(&trigger, &self.services).await?;
                    self.metrics.intervals_started += 1;
                    self.state = PostProcessingState::Running;
                }
            }
            PostProcessingState::Running => {
                if let Some(trigger) = poll_sources(&mut self.stop_sources).await {
                    info!(task = %self.config.name, kind = ?trigger.kind, "Post-processing interval finalized");
                    self.task.finalize(&trigger, &self.services).await?;
                    self.metrics.intervals_finalized += 1;
                    self.state = PostProcessingState::Finished;
                } else if let Some(trigger) = poll_sources(&mut self.update_sources).await {
                    debug!(task = %self.config.name, kind = ?trigger.kind, "Post-processing update");
                    self.task.update(&trigger, &self.services).await?;
                    self.metrics.updates += 1;
                }
            }
            PostProcessingState::Finished => {}
        }
        Ok(self.state)
    }

    /// Run cycles at `pace` until finalized or shut down.
    ///
    /// On shutdown before a stop trigger fired, the task is finalized with a
    /// control trigger so the interval is always bracketed.
    pub async fn run(mut self, pace: Duration) -> Result<PostProcessingMetrics> {
        self.configure()?;
        info!(task = %self.config.name, "Post-processing runner started");
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    if self.state == PostProcessingState::Running {
                        let trigger = Trigger::fired(TriggerKind::UserOrControl, Default::default());
                        if let Err(e) = self.task.finalize(&trigger, &self.services).await {
                            error!(task = %self.config.name, error = %e, "Finalize on shutdown failed");
                        } else {
                            self.metrics.intervals_finalized += 1;
                        }
                    }
                    break;
                }
                _ = tokio::time::sleep(pace) => {
                    if self.run_cycle().await? == PostProcessingState::Finished {
                        break;
                    }
                }
            }
        }
        Ok(self.metrics)
    }
}

// first non-No value wins this cycle
async fn poll_sources(sources: &mut [Box<dyn TriggerSource>]) -> Option<Trigger> {
    for source in sources {
        let trigger = source.next().await;
        if trigger.is_fired() {
            return Some(trigger);
        }
    }
    None
}

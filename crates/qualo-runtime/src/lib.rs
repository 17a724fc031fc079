// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtimes for the qualo quality-control framework.
//!
//! Everything that schedules and drives user code lives here: the
//! update-policy scheduler, the task runner actor, the checker and
//! aggregator runners, the trigger engine and the post-processing runner.
//! Each runtime instance is single-threaded within itself; parallelism
//! comes from running many instances.

pub mod aggregator;
pub mod check;
pub mod context;
pub mod error;
pub mod policy;
pub mod postprocessing;
pub mod reference;
pub mod spec;
pub mod task;
pub mod triggers;

pub use aggregator::{
    Aggregator, AggregatorConfig, AggregatorMetrics, AggregatorRunner, AggregatorSource,
    WorstOfAggregator,
};
pub use check::{Check, CheckConfig, CheckMetrics, CheckRunner};
pub use context::{now_ms, Services};
pub use error::{Result, RuntimeError};
pub use policy::{Revision, UpdatePolicy, UpdatePolicyManager};
pub use postprocessing::{
    PostProcessingConfig, PostProcessingMetrics, PostProcessingRunner, PostProcessingState,
    PostProcessingTask,
};
pub use reference::{missing_reference_quality, ReferenceCache};
pub use spec::{params_from_map, InfrastructureSpec};
pub use task::{
    DataBatch, InputRecord, Task, TaskContext, TaskMessage, TaskMetrics, TaskRunner,
    TaskRunnerConfig, TaskState,
};
pub use triggers::{
    parse_period, user_or_control, AlwaysTrigger, ControlTrigger, EndOfRunTrigger,
    ForEachObjectTrigger, NeverTrigger, NewObjectTrigger, OnceTrigger, PeriodicTrigger,
    StartOfRunTrigger, Trigger, TriggerFactory, TriggerKind, TriggerSource,
};

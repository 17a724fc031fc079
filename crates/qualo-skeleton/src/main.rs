// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! qualo-basic - a complete local quality-control pipeline.
//!
//! A producer generates batches of varying size, the skeleton task fills
//! its histograms, two parallel task replicas are reduced by the merger,
//! the checker grades the result, the aggregator derives the detector
//! quality and everything lands in the repository. A start-of-run event on
//! the in-process bus binds the activity, an end-of-run event closes it.
//!
//! Run it with the built-in configuration:
//!   qualo-basic --id basic-demo
//! or point it at a deployment spec:
//!   qualo-basic --config deployment.json

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use qualo_core::Activity;
use qualo_events::proto::{event_to_record, Event, OpStatus, RunEvent, TRANSITION_START_ACTIVITY, TRANSITION_STOP_ACTIVITY};
use qualo_events::ChannelBus;
use qualo_merge::{Merger, MergerConfig};
use qualo_runtime::{
    now_ms, params_from_map, AggregatorConfig, AggregatorRunner, AggregatorSource, CheckConfig,
    CheckRunner, DataBatch, InfrastructureSpec, InputRecord, PostProcessingConfig,
    PostProcessingRunner, Services, TaskMessage, TaskRunner, TaskRunnerConfig, TriggerFactory,
    TriggerSource, UpdatePolicy, WorstOfAggregator,
};
use qualo_skeleton::{SkeletonCheck, SkeletonPostProcessing, SkeletonTask};
use qualo_store::{MemoryRepository, Repository, SqliteConfig, SqliteRepository};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Basic quality-control pipeline runner.
#[derive(Debug, Parser)]
#[command(name = "qualo-basic", version, about)]
struct Cli {
    /// Deployment specification (JSON); built-in demo spec when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Instance name, used in logs.
    #[arg(long, default_value = "qualo-basic")]
    id: String,

    /// Channel configuration forwarded to the dataflow layer (unused by the
    /// in-process producer, accepted for runner compatibility).
    #[arg(long)]
    channel_config: Option<String>,

    /// Number of monitoring cycles to run before stopping.
    #[arg(long, default_value_t = 3)]
    cycles: u32,
}

const DEMO_SPEC: &str = r#"{
    "busTopic": "run-transitions",
    "tasks": [
        {
            "name": "skeletonTask",
            "detector": "TST",
            "cycleDurationSeconds": 1,
            "customParameters": { "exampleBins": "20" }
        }
    ],
    "checks": [
        {
            "name": "skeletonCheck",
            "detector": "TST",
            "policy": "OnAny",
            "objects": ["qc/TST/skeletonTask/hExample"],
            "customParameters": { "thresholdWarning": "5.0", "thresholdError": "8.0" }
        }
    ],
    "aggregators": [
        {
            "name": "detectorQuality",
            "detector": "TST",
            "sources": ["skeletonCheck"]
        }
    ],
    "postProcessing": [
        {
            "name": "skeletonPP",
            "detector": "TST",
            "initTriggers": ["once"],
            "updateTriggers": ["500ms"],
            "stopTriggers": ["never"]
        }
    ]
}"#;

fn sor_event(run_number: u32, environment_id: &str) -> Event {
    Event {
        timestamp: now_ms(),
        run_event: Some(RunEvent {
            transition: TRANSITION_START_ACTIVITY.to_string(),
            state: "CONFIGURED".to_string(),
            transition_status: OpStatus::Started as i32,
            environment_id: environment_id.to_string(),
            run_number,
            error: String::new(),
        }),
    }
}

fn eor_event(run_number: u32, environment_id: &str) -> Event {
    Event {
        timestamp: now_ms(),
        run_event: Some(RunEvent {
            transition: TRANSITION_STOP_ACTIVITY.to_string(),
            state: "RUNNING".to_string(),
            transition_status: OpStatus::Started as i32,
            environment_id: environment_id.to_string(),
            run_number,
            error: String::new(),
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(id = %cli.id, "Starting qualo-basic");
    if let Some(channel_config) = &cli.channel_config {
        info!(channel_config = %channel_config, "Channel configuration forwarded");
    }

    let spec = match &cli.config {
        Some(path) => InfrastructureSpec::from_file(path),
        None => InfrastructureSpec::from_json(DEMO_SPEC),
    };
    let spec = match spec {
        Ok(spec) => spec,
        Err(e) => {
            error!(error = %e, "Configuration rejected");
            std::process::exit(2);
        }
    };

    let repository: Arc<dyn Repository> = if spec.repository_url.is_empty() {
        Arc::new(MemoryRepository::new())
    } else {
        Arc::new(
            SqliteRepository::connect(&spec.repository_url, SqliteConfig::default())
                .await
                .context("repository connection failed")?,
        )
    };
    let services = Services {
        repository: Some(repository.clone()),
    };

    let task_entry = spec
        .tasks
        .first()
        .context("the demo needs at least one task entry")?;
    let check_entry = spec
        .checks
        .first()
        .context("the demo needs at least one check entry")?;

    // run-transition bus with the SOR already queued
    let bus = ChannelBus::new();
    let topic = if spec.bus_topic.is_empty() {
        "run-transitions".to_string()
    } else {
        spec.bus_topic.clone()
    };
    let factory = TriggerFactory {
        repository: Some(repository.clone()),
        bus: Some(bus.clone()),
        topic: topic.clone(),
        activity: Activity::default(),
        budget: Some(Duration::from_millis(200)),
    };
    let mut sor_source = factory.from_config("sor").await.map_err(anyhow::Error::new)?;
    let mut eor_source = factory.from_config("eor").await.map_err(anyhow::Error::new)?;

    // two parallel task replicas feeding one merger
    let (merged_tx, mut merged_rx) = mpsc::channel(32);
    let (snapshot_tx, snapshot_rx) = mpsc::channel(32);
    let merger = Merger::new(
        snapshot_rx,
        merged_tx,
        MergerConfig {
            flush_interval: Duration::from_millis(500),
        },
    );
    let merger_handle = tokio::spawn(merger.run());

    let mut task_handles = Vec::new();
    let mut task_mailboxes = Vec::new();
    for replica in 0..2 {
        let (task_tx, task_rx) = mpsc::channel(64);
        let mut config = TaskRunnerConfig::new(&task_entry.name, &task_entry.detector);
        config.cycle_period = Duration::from_secs(task_entry.cycle_duration_seconds);
        config.params = params_from_map(&task_entry.custom_parameters);
        let runner = TaskRunner::new(
            Box::new(SkeletonTask::new()),
            config,
            services.clone(),
            task_rx,
            snapshot_tx.clone(),
        );
        info!(replica, task = %task_entry.name, "Spawning task replica");
        task_handles.push(tokio::spawn(runner.run()));
        task_mailboxes.push(task_tx);
    }
    drop(snapshot_tx);

    // checker and aggregator
    let mut check_runner = CheckRunner::new(services.clone());
    check_runner.register(
        CheckConfig {
            name: check_entry.name.clone(),
            detector: check_entry.detector.clone(),
            policy: check_entry.policy.parse().map_err(anyhow::Error::new)?,
            objects: check_entry.objects.clone(),
            all_objects: check_entry.all_objects,
            only_updated: check_entry.only_updated,
            params: params_from_map(&check_entry.custom_parameters),
        },
        Box::new(SkeletonCheck::new()),
    );

    let mut aggregator_runner = AggregatorRunner::new(services.clone());
    if let Some(aggregator_entry) = spec.aggregators.first() {
        aggregator_runner.register(
            AggregatorConfig {
                name: aggregator_entry.name.clone(),
                detector: aggregator_entry.detector.clone(),
                policy: UpdatePolicy::OnAny,
                sources: aggregator_entry
                    .sources
                    .iter()
                    .map(|source| AggregatorSource::all_of(source.as_str()))
                    .collect(),
                params: params_from_map(&aggregator_entry.custom_parameters),
            },
            Box::new(WorstOfAggregator),
        );
    }

    // post-processing, driven by its own triggers
    let mut pp_handle = None;
    if let Some(pp_entry) = spec.post_processing.first() {
        let pp_config = PostProcessingConfig {
            name: pp_entry.name.clone(),
            detector: pp_entry.detector.clone(),
            init_triggers: pp_entry.init_triggers.clone(),
            update_triggers: pp_entry.update_triggers.clone(),
            stop_triggers: pp_entry.stop_triggers.clone(),
            params: params_from_map(&pp_entry.custom_parameters),
        };
        let pp_runner = PostProcessingRunner::new(
            Box::new(SkeletonPostProcessing::new(&pp_entry.detector)),
            pp_config,
            services.clone(),
            &factory,
        )
        .await
        .map_err(anyhow::Error::new)?;
        let shutdown = pp_runner.shutdown_handle();
        pp_handle = Some((
            tokio::spawn(pp_runner.run(Duration::from_millis(200))),
            shutdown,
        ));
    }

    // bind the activity through the bus, exactly as production does
    bus.publish(&topic, event_to_record(&sor_event(123, "demo-env"))).await;
    let sor = sor_source.next().await;
    anyhow::ensure!(sor.is_fired(), "the start-of-run trigger did not fire");
    let activity = sor.activity.clone();
    info!(activity = %activity, "Run started");

    check_runner
        .start_of_activity(activity.clone())
        .await
        .map_err(anyhow::Error::new)?;
    aggregator_runner
        .start_of_activity(activity.clone())
        .map_err(anyhow::Error::new)?;
    for mailbox in &task_mailboxes {
        mailbox
            .send(TaskMessage::StartActivity(activity.clone()))
            .await?;
    }

    // produce batches and drive the cycles
    for cycle in 0..cli.cycles {
        for step in 0..10u32 {
            let size = (cycle * 3 + step) % 10;
            let batch = DataBatch {
                records: (0..size)
                    .map(|i| InputRecord {
                        origin: "digits".to_string(),
                        payload: Bytes::from(vec![i as u8; 8]),
                    })
                    .collect(),
                n_orbits: 32,
            };
            for mailbox in &task_mailboxes {
                mailbox.send(TaskMessage::Data(batch.clone())).await?;
            }
        }
        for mailbox in &task_mailboxes {
            mailbox.send(TaskMessage::EndOfCycle).await?;
        }

        // drain merged collections into the checker and the aggregator
        tokio::time::sleep(Duration::from_millis(700)).await;
        while let Ok(collection) = merged_rx.try_recv() {
            let qos = check_runner
                .on_collection(&collection)
                .await
                .map_err(anyhow::Error::new)?;
            for qo in &qos {
                info!(qo = %qo, "Check verdict");
            }
            let derived = aggregator_runner
                .on_quality_objects(&qos)
                .await
                .map_err(anyhow::Error::new)?;
            for qo in &derived {
                info!(qo = %qo, "Aggregated verdict");
            }
        }
    }

    // close the run
    for mailbox in &task_mailboxes {
        mailbox.send(TaskMessage::EndActivity).await?;
        mailbox.send(TaskMessage::Stop).await?;
    }
    for handle in task_handles {
        let metrics = handle.await?.map_err(anyhow::Error::new)?;
        info!(batches = metrics.batches, cycles = metrics.cycles, "Task replica finished");
    }
    let merger_metrics = merger_handle.await?;
    info!(
        inputs = merger_metrics.inputs_merged,
        flushes = merger_metrics.flushes,
        "Merger finished"
    );

    bus.publish(&topic, event_to_record(&eor_event(123, "demo-env"))).await;
    let eor = eor_source.next().await;
    if eor.is_fired() {
        info!(validity_max = eor.activity.validity.max, "Run stopped");
    }

    if let Some((handle, shutdown)) = pp_handle {
        shutdown.notify_one();
        let metrics = handle.await?.map_err(anyhow::Error::new)?;
        info!(updates = metrics.updates, "Post-processing finished");
    }

    let published = repository.list_objects("qc/").await.map_err(anyhow::Error::new)?;
    info!(objects = published.len(), "Repository contents:");
    for path in published {
        info!(path = %path, "  stored");
    }

    info!("Clean shutdown");
    Ok(())
}

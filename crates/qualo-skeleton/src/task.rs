// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The skeleton task.
//!
//! Publishes one histogram of incoming batch sizes, a record counter and a
//! decode-ratio histogram. It is the template new detector modules start
//! from.

use async_trait::async_trait;
use qualo_core::{Activity, Histo1d, Payload, RatioHisto1d};
use qualo_runtime::{DataBatch, Result, Task, TaskContext};
use qualo_core::ObjectsManager;
use tracing::info;

/// Name of the published example histogram.
pub const EXAMPLE_HISTOGRAM: &str = "hExample";
/// Name of the published record counter.
pub const RECORD_COUNTER: &str = "nRecords";
/// Name of the published decode-ratio histogram.
pub const DECODE_RATIO: &str = "hDecodeRatio";

/// Fills batch-size statistics; the template for detector tasks.
#[derive(Default)]
pub struct SkeletonTask {
    bins: usize,
}

impl SkeletonTask {
    /// Create the task.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Task for SkeletonTask {
    async fn initialize(&mut self, ctx: &mut TaskContext<'_>) -> Result<()> {
        // every tunable resolves here; missing keys fall back to defaults
        self.bins = ctx
            .params
            .at_or("exampleBins", "20")
            .parse()
            .unwrap_or(20);
        info!(bins = self.bins, "Initializing skeleton task");

        ctx.objects.start_publishing(
            EXAMPLE_HISTOGRAM,
            Payload::Histo1d(Histo1d::new(self.bins, 0.0, self.bins as f64)),
        )?;
        ctx.objects
            .set_default_draw_options(EXAMPLE_HISTOGRAM, "hist")?;
        ctx.objects.start_publishing(
            RECORD_COUNTER,
            Payload::Counter(qualo_core::Counter::default()),
        )?;
        ctx.objects.start_publishing(
            DECODE_RATIO,
            Payload::RatioHisto1d(RatioHisto1d::new(self.bins, 0.0, self.bins as f64)),
        )?;
        Ok(())
    }

    async fn start_of_activity(
        &mut self,
        _ctx: &mut TaskContext<'_>,
        activity: &Activity,
    ) -> Result<()> {
        info!(activity = %activity, "Skeleton task starting activity");
        Ok(())
    }

    fn monitor_data(&mut self, objects: &mut ObjectsManager, batch: &DataBatch) {
        let size = batch.records.len() as f64;
        if let Ok(mo) = objects.get_mut(EXAMPLE_HISTOGRAM)
            && let Payload::Histo1d(h) = &mut mo.payload
        {
            h.fill(size);
        }
        if let Ok(mo) = objects.get_mut(RECORD_COUNTER)
            && let Payload::Counter(c) = &mut mo.payload
        {
            c.add(batch.records.len() as u64);
        }
        if let Ok(mo) = objects.get_mut(DECODE_RATIO)
            && let Payload::RatioHisto1d(r) = &mut mo.payload
        {
            // denominator counts every record, numerator the non-empty ones
            for record in &batch.records {
                r.den_mut().fill(size.min(self.bins as f64 - 1.0));
                if !record.payload.is_empty() {
                    r.num_mut().fill(size.min(self.bins as f64 - 1.0));
                }
            }
        }
    }
}

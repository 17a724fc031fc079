// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run-transition event layer for the qualo quality-control framework.
//!
//! Decodes the protobuf records carried on the run-transition topic,
//! abstracts the broker behind a consumer trait, and provides the bounded
//! poller the SOR/EOR triggers drain. The concrete broker client is wired
//! at the binary edge; tests and single-node runs use the in-process
//! channel bus.

pub mod consumer;
pub mod error;
pub mod matchers;
pub mod poller;
pub mod proto;

pub use consumer::{BusConsumer, ChannelBus, ChannelConsumer, RawRecord};
pub use error::{EventError, Result};
pub use matchers::{
    end_of_run_activity, matches_end_of_run, matches_start_of_run, start_of_run_activity,
};
pub use poller::{EventPoller, PollerConfig, PollerMetrics};
pub use proto::{record_to_event, Event, OpStatus, RunEvent};

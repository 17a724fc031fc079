// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Core data model for the qualo quality-control framework.
//!
//! This crate defines the vocabulary shared by every runtime: quality grades
//! and the closed flag registry, activity descriptors, monitor objects with
//! their tagged payloads, the per-task objects manager and the user
//! parameter multimap. It has no I/O; the stores, the event bus and the
//! runtimes build on top of it.

pub mod activity;
pub mod error;
pub mod flags;
pub mod manager;
pub mod object;
pub mod params;
pub mod payload;
pub mod qo;
pub mod quality;
pub mod rate;

pub use activity::{Activity, ValidityInterval};
pub use error::{CoreError, Result};
pub use flags::FlagType;
pub use manager::ObjectsManager;
pub use object::{MonitorObject, MonitorObjectCollection};
pub use params::CustomParameters;
pub use payload::{Counter, Histo1d, MergeClass, Payload, PayloadKind, RatioHisto1d, StateSample};
pub use qo::QualityObject;
pub use quality::{reduce, Quality, QualityLevel};

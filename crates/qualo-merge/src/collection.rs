// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Merging whole task snapshots.
//!
//! Parallel task replicas ship their full object collections; this module
//! reconciles them object by object. A failure on one path poisons only
//! that path, the rest of the collection keeps merging.

use crate::algorithm::merge_into_slot;
use crate::error::MergeError;
use qualo_core::MonitorObjectCollection;
use tracing::{error, warn};

/// Merge `other` into `target`, object by object.
///
/// Objects are joined on their local name; inputs without a counterpart are
/// added. Errors are collected per path and returned together so one bad
/// path cannot take down its neighbours.
pub fn merge_collections(
    target: &mut MonitorObjectCollection,
    other: &MonitorObjectCollection,
) -> Vec<MergeError> {
    let mut failures = Vec::new();
    for input in &other.objects {
        if input.name.is_empty() {
            warn!("Input object without a name, probably empty. Skipping");
            continue;
        }
        match target.find_mut(&input.name) {
            Some(slot) => {
                if let Err(e) = merge_into_slot(slot, input) {
                    error!(code = e.error_code(), path = e.path(), error = %e, "Merge failed for path");
                    failures.push(e);
                }
            }
            None => {
                target.objects.push(input.clone());
            }
        }
    }
    failures
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The payload and object merge algorithm.
//!
//! Reduction semantics depend on the merge class declared by the payload:
//! additive payloads sum, ratio payloads sum numerator and denominator
//! independently (division happens at read time), latest-wins payloads keep
//! the sample with the larger validity. Merging is associative and
//! commutative within a class; mixing classes on one path is refused.

use crate::error::{MergeError, Result};
use qualo_core::object::metadata_keys;
use qualo_core::{MonitorObject, Payload};
use tracing::warn;

/// Merge `other` into `target`, payloads only.
pub fn merge_payload(path: &str, target: &mut Payload, other: &Payload) -> Result<()> {
    let expected = target.merge_class();
    let actual = other.merge_class();
    if expected != actual {
        return Err(MergeError::InconsistentMergeHint {
            path: path.to_string(),
            expected,
            actual,
        });
    }

    match (target, other) {
        (Payload::Counter(t), Payload::Counter(o)) => {
            t.count += o.count;
            Ok(())
        }
        (Payload::Histo1d(t), Payload::Histo1d(o)) => {
            if !t.same_binning(o) {
                return Err(MergeError::IncompatibleBinning {
                    path: path.to_string(),
                });
            }
            t.add(o);
            Ok(())
        }
        (Payload::RatioHisto1d(t), Payload::RatioHisto1d(o)) => {
            if !t.same_binning(o) {
                return Err(MergeError::IncompatibleBinning {
                    path: path.to_string(),
                });
            }
            t.add(o);
            Ok(())
        }
        (Payload::State(t), Payload::State(o)) => {
            // latest-wins resolution happens at the object level using
            // validity; at the payload level the newer sample time decides
            if o.sampled_at >= t.sampled_at {
                *t = o.clone();
            }
            Ok(())
        }
        // counters vs histograms are both additive but still not each
        // other's peers
        _ => Err(MergeError::NotMergeable {
            path: path.to_string(),
        }),
    }
}

/// Merge `other` into `target`, reconciling validity and cycle metadata.
///
/// For latest-wins payloads the object with the larger `validity.max` wins
/// wholesale, which imposes the total order the parallel replicas need.
pub fn merge_object(target: &mut MonitorObject, other: &MonitorObject) -> Result<()> {
    let path = target.path();

    if target.merge_class() == qualo_core::MergeClass::LatestWins {
        if other.merge_class() != qualo_core::MergeClass::LatestWins {
            return Err(MergeError::InconsistentMergeHint {
                path,
                expected: target.merge_class(),
                actual: other.merge_class(),
            });
        }
        if other.validity.max >= target.validity.max {
            *target = other.clone();
        }
        return Ok(());
    }

    merge_payload(&path, &mut target.payload, &other.payload)?;
    target.validity.extend(&other.validity);
    reconcile_cycle(target, other);
    Ok(())
}

// Cycle numbers from parallel replicas reconcile to the maximum.
fn reconcile_cycle(target: &mut MonitorObject, other: &MonitorObject) {
    let target_cycle = target
        .metadata(metadata_keys::CYCLE_NUMBER)
        .and_then(|v| v.parse::<u64>().ok());
    let other_cycle = other
        .metadata(metadata_keys::CYCLE_NUMBER)
        .and_then(|v| v.parse::<u64>().ok());
    match (target_cycle, other_cycle) {
        (Some(t), Some(o)) if o > t => {
            target.add_or_update_metadata(metadata_keys::CYCLE_NUMBER, o.to_string());
        }
        (None, Some(o)) => {
            target.add_or_update_metadata(metadata_keys::CYCLE_NUMBER, o.to_string());
        }
        _ => {}
    }
}

/// Outcome of merging one input object into a collection.
#[derive(Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The input was reduced into an existing target.
    Merged,
    /// The input introduced a new object.
    Added,
    /// The input belonged to an older run and was dropped.
    RejectedOlderRun,
    /// The input belonged to a newer run and replaced the target.
    ReplacedByNewerRun,
}

/// Merge one input object into a keyed collection slot.
///
/// Run-number reconciliation: data from a newer run replaces the
/// accumulated target (the old run is over), data from an older run is
/// rejected so stragglers cannot pollute the current run.
pub fn merge_into_slot(slot: &mut MonitorObject, input: &MonitorObject) -> Result<MergeOutcome> {
    if input.activity.id > slot.activity.id {
        warn!(
            path = %slot.path(),
            target_run = slot.activity.id,
            input_run = input.activity.id,
            "Input belongs to a newer run, replacing accumulated object"
        );
        *slot = input.clone();
        return Ok(MergeOutcome::ReplacedByNewerRun);
    }
    if input.activity.id < slot.activity.id {
        warn!(
            path = %slot.path(),
            target_run = slot.activity.id,
            input_run = input.activity.id,
            "Input belongs to an older run, rejecting"
        );
        return Ok(MergeOutcome::RejectedOlderRun);
    }
    merge_object(slot, input)?;
    Ok(MergeOutcome::Merged)
}

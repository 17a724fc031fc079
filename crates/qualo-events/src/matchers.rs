// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Matching run-transition events against activity descriptors.
//!
//! A trigger configured with a partially-specified activity accepts any
//! event whose `(run_number, environment_id)` is consistent with the set
//! fields. On a match the unset fields are filled in from the event and the
//! validity window is anchored at the event timestamp. This is how logical
//! activities bind to physical runs.

use crate::proto::Event;
use qualo_core::Activity;

/// Whether `event` is a start-of-run consistent with `activity`.
pub fn matches_start_of_run(event: &Event, activity: &Activity) -> bool {
    event.is_start_of_run()
        && event
            .run_event
            .as_ref()
            .is_some_and(|re| activity.matches(re.run_number, &re.environment_id))
}

/// Whether `event` is an end-of-run consistent with `activity`.
pub fn matches_end_of_run(event: &Event, activity: &Activity) -> bool {
    event.is_end_of_run()
        && event
            .run_event
            .as_ref()
            .is_some_and(|re| activity.matches(re.run_number, &re.environment_id))
}

/// Activity filled from a matching start-of-run event.
///
/// `validity.min` anchors at the event timestamp. An event without a run
/// transition leaves the activity untouched.
pub fn start_of_run_activity(event: &Event, activity: &Activity) -> Activity {
    let Some(run_event) = event.run_event.as_ref() else {
        return activity.clone();
    };
    let mut filled = activity.filled_from(run_event.run_number, &run_event.environment_id);
    filled.validity.min = event.timestamp;
    filled
}

/// Activity filled from a matching end-of-run event.
///
/// `validity.max` anchors at the event timestamp. An event without a run
/// transition leaves the activity untouched.
pub fn end_of_run_activity(event: &Event, activity: &Activity) -> Activity {
    let Some(run_event) = event.run_event.as_ref() else {
        return activity.clone();
    };
    let mut filled = activity.filled_from(run_event.run_number, &run_event.environment_id);
    filled.validity.max = event.timestamp;
    filled
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire messages carried on the run-transition topic.
//!
//! Field tags and wire types match the external producer bit for bit; the
//! byte layout is authoritative, so the tags below must never be renumbered.
//! The messages are declared with prost derive (no protoc needed at build
//! time).

use prost::Message;

/// Transition string for the start of an activity.
pub const TRANSITION_START_ACTIVITY: &str = "START_ACTIVITY";
/// Transition string for the stop of an activity.
pub const TRANSITION_STOP_ACTIVITY: &str = "STOP_ACTIVITY";
/// Teardown transition, treated as an implicit stop.
pub const TRANSITION_TEARDOWN: &str = "TEARDOWN";

/// Status of the operation that produced the transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum OpStatus {
    /// No status reported.
    NullOpStatus = 0,
    /// The transition started.
    Started = 1,
    /// The transition completed successfully.
    DoneOk = 2,
    /// The transition completed with an error.
    DoneError = 3,
    /// The transition timed out.
    TimedOut = 4,
}

/// A run state transition as produced by the control system.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RunEvent {
    /// The transition name, e.g. `START_ACTIVITY`.
    #[prost(string, tag = "1")]
    pub transition: ::prost::alloc::string::String,
    /// The machine state the transition was taken from.
    #[prost(string, tag = "2")]
    pub state: ::prost::alloc::string::String,
    /// Outcome of the transition.
    #[prost(enumeration = "OpStatus", tag = "3")]
    pub transition_status: i32,
    /// Environment (partition) the run belongs to.
    #[prost(string, tag = "4")]
    pub environment_id: ::prost::alloc::string::String,
    /// The run number.
    #[prost(uint32, tag = "5")]
    pub run_number: u32,
    /// Error message when the transition failed.
    #[prost(string, tag = "6")]
    pub error: ::prost::alloc::string::String,
}

/// The envelope every record on the topic carries.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    /// When the event was produced, ms since epoch.
    #[prost(uint64, tag = "1")]
    pub timestamp: u64,
    /// The run transition, absent for event kinds we do not consume.
    #[prost(message, optional, tag = "2")]
    pub run_event: ::core::option::Option<RunEvent>,
}

impl Event {
    /// Whether this event announces the start of a run.
    pub fn is_start_of_run(&self) -> bool {
        self.run_event
            .as_ref()
            .is_some_and(|re| re.transition == TRANSITION_START_ACTIVITY)
    }

    /// Whether this event announces the end of a run.
    ///
    /// `TEARDOWN` counts: a torn-down environment implies the run stopped.
    pub fn is_end_of_run(&self) -> bool {
        self.run_event.as_ref().is_some_and(|re| {
            re.transition == TRANSITION_STOP_ACTIVITY || re.transition == TRANSITION_TEARDOWN
        })
    }
}

/// Decode a raw record payload into an [`Event`].
pub fn record_to_event(payload: &[u8]) -> Result<Event, prost::DecodeError> {
    Event::decode(payload)
}

/// Encode an event the way the external producer would.
pub fn event_to_record(event: &Event) -> Vec<u8> {
    event.encode_to_vec()
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The update-policy scheduler.
//!
//! Revision counters answer one question: given the object versions observed
//! so far, may this actor run now? Objects advance on publication, actors
//! advance after consuming, and the global counter closes evaluation steps.
//! Given the same call sequence the answers are identical across runs.

use crate::error::{Result, RuntimeError};
use qualo_core::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Monotonic revision counter.
pub type Revision = u64;

/// When an actor becomes ready to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatePolicy {
    /// Ready when any subscribed object advanced.
    OnAny,
    /// Ready when every subscribed object advanced.
    OnAll,
    /// Like `OnAny`, but only after every subscribed object has been seen
    /// at least once.
    OnAnyNonZero,
    /// Readiness behaves like `OnAny` (with `all_objects` it is
    /// unconditional); the caller dispatches the actor once per updated
    /// object before advancing the actor revision. The name promises more
    /// than the readiness predicate delivers - kept for compatibility.
    OnEachSeparately,
    /// Ready whenever the global revision advanced past the actor.
    OnGlobalAny,
}

impl FromStr for UpdatePolicy {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OnAny" => Ok(Self::OnAny),
            "OnAll" => Ok(Self::OnAll),
            "OnAnyNonZero" => Ok(Self::OnAnyNonZero),
            "OnEachSeparately" => Ok(Self::OnEachSeparately),
            "OnGlobalAny" => Ok(Self::OnGlobalAny),
            other => Err(RuntimeError::fatal_config(format!(
                "no policy named '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OnAny => "OnAny",
            Self::OnAll => "OnAll",
            Self::OnAnyNonZero => "OnAnyNonZero",
            Self::OnEachSeparately => "OnEachSeparately",
            Self::OnGlobalAny => "OnGlobalAny",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct ActorPolicy {
    policy: UpdatePolicy,
    objects: Vec<String>,
    all_objects: bool,
    only_updated: bool,
    revision: Revision,
    // latch for OnAnyNonZero: set once all subscribed objects were seen
    all_seen: bool,
}

/// Revision-based readiness scheduler, one per checker runtime.
#[derive(Debug)]
pub struct UpdatePolicyManager {
    global_rev: Revision,
    object_rev: HashMap<String, Revision>,
    actors: HashMap<String, ActorPolicy>,
}

impl Default for UpdatePolicyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdatePolicyManager {
    /// A fresh manager; the global revision starts at 1.
    pub fn new() -> Self {
        Self {
            global_rev: 1,
            object_rev: HashMap::new(),
            actors: HashMap::new(),
        }
    }

    /// Register an actor. Registering again replaces the subscription.
    pub fn add_policy(
        &mut self,
        actor: impl Into<String>,
        policy: UpdatePolicy,
        objects: Vec<String>,
        all_objects: bool,
        only_updated: bool,
    ) {
        let actor = actor.into();
        debug!(actor = %actor, policy = %policy, objects = objects.len(), all_objects, only_updated, "Added a policy");
        self.actors.insert(
            actor,
            ActorPolicy {
                policy,
                objects,
                all_objects,
                only_updated,
                revision: 0,
                all_seen: false,
            },
        );
    }

    /// Parse-and-register convenience; unknown policy names are fatal.
    pub fn add_policy_str(
        &mut self,
        actor: impl Into<String>,
        policy: &str,
        objects: Vec<String>,
        all_objects: bool,
        only_updated: bool,
    ) -> Result<()> {
        let policy = policy.parse()?;
        self.add_policy(actor, policy, objects, all_objects, only_updated);
        Ok(())
    }

    /// The current global revision.
    pub fn global_revision(&self) -> Revision {
        self.global_rev
    }

    /// Record a new version of `path`, minting the next revision.
    ///
    /// Minting advances the global counter, so a subsequent default actor
    /// update quiesces the actor.
    pub fn update_object_revision(&mut self, path: &str) {
        self.global_rev += 1;
        self.set_object_revision(path, self.global_rev);
    }

    /// Record a new version of `path` at an explicit revision.
    ///
    /// Objects seen for the first time lazily join the subscription of every
    /// `all_objects` actor.
    pub fn set_object_revision(&mut self, path: &str, revision: Revision) {
        if !self.object_rev.contains_key(path) {
            for actor in self.actors.values_mut() {
                if actor.all_objects && !actor.objects.iter().any(|o| o == path) {
                    actor.objects.push(path.to_string());
                }
            }
        }
        self.object_rev.insert(path.to_string(), revision);
    }

    /// Mark `actor` as having consumed its inputs up to the global revision.
    pub fn update_actor_revision(&mut self, actor: &str) -> Result<()> {
        let revision = self.global_rev;
        self.set_actor_revision(actor, revision)
    }

    /// Mark `actor` at an explicit revision.
    pub fn set_actor_revision(&mut self, actor: &str, revision: Revision) -> Result<()> {
        let entry = self
            .actors
            .get_mut(actor)
            .ok_or_else(|| CoreError::ObjectNotFound {
                name: actor.to_string(),
            })?;
        entry.revision = revision;
        Ok(())
    }

    /// Close an evaluation step.
    pub fn update_global_revision(&mut self) {
        let max_object = self.object_rev.values().copied().max().unwrap_or(0);
        self.global_rev = self.global_rev.max(max_object) + 1;
    }

    /// Whether `actor` may run now.
    pub fn is_ready(&mut self, actor: &str) -> Result<bool> {
        let entry = self
            .actors
            .get_mut(actor)
            .ok_or_else(|| CoreError::ObjectNotFound {
                name: actor.to_string(),
            })?;

        if entry.policy == UpdatePolicy::OnGlobalAny {
            return Ok(self.global_rev > entry.revision);
        }

        // an empty subscription without all_objects is a legal no-op actor
        if entry.objects.is_empty() && !entry.all_objects {
            return Ok(false);
        }

        let object_rev = &self.object_rev;
        let actor_rev = entry.revision;
        let updated =
            |name: &String| object_rev.get(name).is_some_and(|rev| *rev > actor_rev);

        let ready = match entry.policy {
            UpdatePolicy::OnAny => entry.objects.iter().any(updated),
            UpdatePolicy::OnAll => entry.objects.iter().all(updated),
            UpdatePolicy::OnAnyNonZero => {
                if !entry.all_seen {
                    if !entry.objects.iter().all(|o| object_rev.contains_key(o)) {
                        return Ok(false);
                    }
                    entry.all_seen = true;
                }
                entry.objects.iter().any(updated)
            }
            UpdatePolicy::OnEachSeparately => {
                if entry.all_objects {
                    true
                } else {
                    entry.objects.iter().any(updated)
                }
            }
            UpdatePolicy::OnGlobalAny => unreachable!("handled above"),
        };
        Ok(ready)
    }

    /// The subscribed objects that advanced since the actor's revision.
    ///
    /// Drives `only_updated` filtering and the per-object dispatch of
    /// `OnEachSeparately`.
    pub fn ready_objects(&self, actor: &str) -> Result<Vec<String>> {
        let entry = self
            .actors
            .get(actor)
            .ok_or_else(|| CoreError::ObjectNotFound {
                name: actor.to_string(),
            })?;
        Ok(entry
            .objects
            .iter()
            .filter(|name| {
                self.object_rev
                    .get(*name)
                    .is_some_and(|rev| *rev > entry.revision)
            })
            .cloned()
            .collect())
    }

    /// The full subscription of `actor`.
    pub fn objects_of(&self, actor: &str) -> Result<Vec<String>> {
        let entry = self
            .actors
            .get(actor)
            .ok_or_else(|| CoreError::ObjectNotFound {
                name: actor.to_string(),
            })?;
        Ok(entry.objects.clone())
    }

    /// Whether `actor` was registered with `only_updated`.
    pub fn only_updated(&self, actor: &str) -> Result<bool> {
        let entry = self
            .actors
            .get(actor)
            .ok_or_else(|| CoreError::ObjectNotFound {
                name: actor.to_string(),
            })?;
        Ok(entry.only_updated)
    }

    /// The registered policy of `actor`.
    pub fn policy_of(&self, actor: &str) -> Result<UpdatePolicy> {
        let entry = self
            .actors
            .get(actor)
            .ok_or_else(|| CoreError::ObjectNotFound {
                name: actor.to_string(),
            })?;
        Ok(entry.policy)
    }

    /// Drop all state and restore the initial global revision.
    pub fn reset(&mut self) {
        self.actors.clear();
        self.object_rev.clear();
        self.global_rev = 1;
    }
}

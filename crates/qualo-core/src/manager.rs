// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The per-task registry of published monitor objects.
//!
//! Each task owns exactly one [`ObjectsManager`]. User code registers
//! payloads at initialization, fills them during monitoring, and the task
//! runner snapshots the registry at end of cycle. The manager never
//! interprets payloads.

use crate::activity::Activity;
use crate::error::{CoreError, Result};
use crate::object::{metadata_keys, MonitorObject, MonitorObjectCollection};
use crate::payload::Payload;
use tracing::debug;

/// Registration-ordered registry of the objects a task publishes.
#[derive(Debug)]
pub struct ObjectsManager {
    task_name: String,
    detector_name: String,
    activity: Activity,
    // registration order matters for iteration and snapshots
    objects: Vec<MonitorObject>,
}

impl ObjectsManager {
    /// Create the registry for a task.
    pub fn new(task_name: impl Into<String>, detector_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            detector_name: detector_name.into(),
            activity: Activity::default(),
            objects: Vec::new(),
        }
    }

    /// The owning task's name.
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// The detector code of the owning task.
    pub fn detector_name(&self) -> &str {
        &self.detector_name
    }

    /// Register a payload for publication under `name`.
    ///
    /// Calling again with an identical `(name, payload)` pair is a no-op;
    /// re-registering a name with a different payload is a
    /// `DuplicatePublication` error.
    pub fn start_publishing(&mut self, name: impl Into<String>, payload: Payload) -> Result<()> {
        let name = name.into();
        if let Some(existing) = self.objects.iter().find(|mo| mo.name == name) {
            if existing.payload == payload {
                return Ok(());
            }
            return Err(CoreError::DuplicatePublication { name });
        }
        let mut mo = MonitorObject::new(name.clone(), &self.task_name, &self.detector_name, payload);
        mo.set_activity(&self.activity);
        debug!(object = %name, task = %self.task_name, "Started publishing");
        self.objects.push(mo);
        Ok(())
    }

    /// Remove `name` from the registry; its payload is returned to the caller.
    pub fn stop_publishing(&mut self, name: &str) -> Result<Payload> {
        let idx = self
            .objects
            .iter()
            .position(|mo| mo.name == name)
            .ok_or_else(|| CoreError::ObjectNotFound {
                name: name.to_string(),
            })?;
        debug!(object = %name, task = %self.task_name, "Stopped publishing");
        Ok(self.objects.remove(idx).payload)
    }

    /// Whether `name` is currently being published.
    pub fn is_being_published(&self, name: &str) -> bool {
        self.objects.iter().any(|mo| mo.name == name)
    }

    /// Look up a published object.
    pub fn get(&self, name: &str) -> Result<&MonitorObject> {
        self.objects
            .iter()
            .find(|mo| mo.name == name)
            .ok_or_else(|| CoreError::ObjectNotFound {
                name: name.to_string(),
            })
    }

    /// Look up a published object for mutation.
    pub fn get_mut(&mut self, name: &str) -> Result<&mut MonitorObject> {
        self.objects
            .iter_mut()
            .find(|mo| mo.name == name)
            .ok_or_else(|| CoreError::ObjectNotFound {
                name: name.to_string(),
            })
    }

    /// Add a metadata entry to a published object (no overwrite).
    pub fn add_metadata(&mut self, name: &str, key: &str, value: &str) -> Result<()> {
        self.get_mut(name)?.add_metadata(key, value);
        debug!(object = %name, key, value, "Added metadata");
        Ok(())
    }

    /// Set a metadata entry on a published object, overwriting.
    pub fn add_or_update_metadata(&mut self, name: &str, key: &str, value: &str) -> Result<()> {
        self.get_mut(name)?.add_or_update_metadata(key, value);
        Ok(())
    }

    /// Set the default draw options surfaced to the dashboard.
    pub fn set_default_draw_options(&mut self, name: &str, options: &str) -> Result<()> {
        self.get_mut(name)?
            .add_or_update_metadata(metadata_keys::DRAW_OPTIONS, options);
        Ok(())
    }

    /// Set a display hint surfaced to the layout engine.
    pub fn set_display_hint(&mut self, name: &str, hint: &str) -> Result<()> {
        self.get_mut(name)?
            .add_or_update_metadata(metadata_keys::DISPLAY_HINTS, hint);
        Ok(())
    }

    /// Number of published objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing is published.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate the published objects in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &MonitorObject> {
        self.objects.iter()
    }

    /// Iterate the published objects mutably, in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MonitorObject> {
        self.objects.iter_mut()
    }

    /// The activity all published objects are bound to.
    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Bind the registry and all published objects to an activity.
    pub fn set_activity(&mut self, activity: Activity) {
        for mo in &mut self.objects {
            mo.set_activity(&activity);
        }
        self.activity = activity;
    }

    /// Reset every published object (start of activity, task reset).
    pub fn reset_objects(&mut self) {
        for mo in &mut self.objects {
            mo.reset();
        }
    }

    /// Snapshot the registry for hand-off to the merger or the repository.
    pub fn snapshot(&self) -> MonitorObjectCollection {
        MonitorObjectCollection {
            task_name: self.task_name.clone(),
            objects: self.objects.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Counter, Histo1d};

    fn manager() -> ObjectsManager {
        ObjectsManager::new("skeletonTask", "TST")
    }

    #[test]
    fn test_publish_and_lookup() {
        let mut m = manager();
        m.start_publishing("hA", Payload::Histo1d(Histo1d::new(10, 0.0, 10.0)))
            .unwrap();
        m.start_publishing("nEvents", Payload::Counter(Counter::default()))
            .unwrap();
        assert_eq!(m.len(), 2);
        assert!(m.is_being_published("hA"));
        assert_eq!(m.get("hA").unwrap().path(), "qc/TST/skeletonTask/hA");
        assert!(matches!(
            m.get("missing"),
            Err(CoreError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_publication() {
        let mut m = manager();
        let h = Payload::Histo1d(Histo1d::new(10, 0.0, 10.0));
        m.start_publishing("hA", h.clone()).unwrap();
        // identical payload: idempotent
        m.start_publishing("hA", h).unwrap();
        assert_eq!(m.len(), 1);
        // different payload under the same name: refused
        let err = m
            .start_publishing("hA", Payload::Counter(Counter::default()))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicatePublication { .. }));
    }

    #[test]
    fn test_stop_publishing_returns_payload() {
        let mut m = manager();
        let mut h = Histo1d::new(4, 0.0, 4.0);
        h.fill(1.0);
        m.start_publishing("hA", Payload::Histo1d(h)).unwrap();
        let payload = m.stop_publishing("hA").unwrap();
        match payload {
            Payload::Histo1d(h) => assert_eq!(h.entries(), 1),
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(!m.is_being_published("hA"));
        assert!(m.stop_publishing("hA").is_err());
    }

    #[test]
    fn test_registration_order_is_stable() {
        let mut m = manager();
        for name in ["c", "a", "b"] {
            m.start_publishing(name, Payload::Counter(Counter::default()))
                .unwrap();
        }
        let names: Vec<_> = m.iter().map(|mo| mo.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        let snap = m.snapshot();
        let snap_names: Vec<_> = snap.objects.iter().map(|mo| mo.name.as_str()).collect();
        assert_eq!(snap_names, names);
    }

    #[test]
    fn test_draw_options_and_metadata() {
        let mut m = manager();
        m.start_publishing("hA", Payload::Counter(Counter::default()))
            .unwrap();
        m.set_default_draw_options("hA", "colz").unwrap();
        m.add_metadata("hA", "Comment", "pedestal run").unwrap();
        let mo = m.get("hA").unwrap();
        assert_eq!(mo.draw_options(), "colz");
        assert_eq!(mo.metadata("Comment"), Some("pedestal run"));
        assert!(m.set_default_draw_options("missing", "colz").is_err());
    }

    #[test]
    fn test_set_activity_propagates() {
        let mut m = manager();
        m.start_publishing("hA", Payload::Counter(Counter::default()))
            .unwrap();
        m.set_activity(Activity::new(42, "PHYSICS"));
        assert_eq!(m.get("hA").unwrap().activity.id, 42);
        // objects registered after the activity is set inherit it
        m.start_publishing("hB", Payload::Counter(Counter::default()))
            .unwrap();
        assert_eq!(m.get("hB").unwrap().activity.id, 42);
    }
}

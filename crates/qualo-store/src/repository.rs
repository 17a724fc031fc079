// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The abstract object repository.
//!
//! Concrete backends implement [`Repository`]; the runtimes only see this
//! trait. A record is the opaque tuple `(path, timestamp, payload,
//! metadata)`; monitor and quality objects serialize into the payload blob
//! and surface their queryable fields in the metadata map.

use crate::error::{Result, StoreError};
use async_trait::async_trait;
use qualo_core::object::metadata_keys;
use qualo_core::{MonitorObject, QualityObject};
use std::collections::BTreeMap;

/// The persisted tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    /// Repository path, `/`-separated.
    pub path: String,
    /// Version timestamp, ms since epoch.
    pub timestamp: u64,
    /// Opaque payload blob.
    pub payload: Vec<u8>,
    /// Queryable annotations.
    pub metadata: BTreeMap<String, String>,
}

impl ObjectRecord {
    /// Whether every `(key, value)` pair of `filter` is present.
    pub fn matches(&self, filter: &BTreeMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.metadata.get(k).is_some_and(|have| have == v))
    }
}

/// Build the record for a monitor object at a version timestamp.
pub fn record_from_mo(mo: &MonitorObject, timestamp: u64) -> Result<ObjectRecord> {
    let payload = serde_json::to_vec(mo).map_err(|e| StoreError::Decode {
        path: mo.path(),
        details: e.to_string(),
    })?;
    let mut metadata = mo.metadata.clone();
    metadata.insert(metadata_keys::RUN_NUMBER.to_string(), mo.activity.id.to_string());
    if let Some(quality) = &mo.quality {
        metadata.insert(quality.name().to_string(), quality.to_string());
    }
    Ok(ObjectRecord {
        path: mo.path(),
        timestamp,
        payload,
        metadata,
    })
}

/// Build the record for a quality object at a version timestamp.
pub fn record_from_qo(qo: &QualityObject, timestamp: u64) -> Result<ObjectRecord> {
    let payload = serde_json::to_vec(qo).map_err(|e| StoreError::Decode {
        path: qo.path(),
        details: e.to_string(),
    })?;
    let mut metadata = BTreeMap::new();
    metadata.insert(metadata_keys::RUN_NUMBER.to_string(), qo.activity.id.to_string());
    metadata.insert(qo.quality.name().to_string(), qo.quality.to_string());
    Ok(ObjectRecord {
        path: qo.path(),
        timestamp,
        payload,
        metadata,
    })
}

/// Decode a monitor object out of a record.
pub fn mo_from_record(record: &ObjectRecord) -> Result<MonitorObject> {
    serde_json::from_slice(&record.payload).map_err(|e| StoreError::Decode {
        path: record.path.clone(),
        details: e.to_string(),
    })
}

/// Decode a quality object out of a record.
pub fn qo_from_record(record: &ObjectRecord) -> Result<QualityObject> {
    serde_json::from_slice(&record.payload).map_err(|e| StoreError::Decode {
        path: record.path.clone(),
        details: e.to_string(),
    })
}

/// The abstract object store consumed by the runtimes.
///
/// A successful `store_*` return guarantees durability or retry; batching
/// backends must flush before acknowledging a read of their own writes.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Persist a monitor object version.
    async fn store_mo(&self, mo: &MonitorObject, timestamp: u64) -> Result<()>;

    /// Persist a quality object version.
    async fn store_qo(&self, qo: &QualityObject, timestamp: u64) -> Result<()>;

    /// Latest record at `path` with `timestamp <= requested` matching the
    /// filter; `None` timestamp means "latest overall".
    async fn retrieve(
        &self,
        path: &str,
        timestamp: Option<u64>,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Option<ObjectRecord>>;

    /// Latest monitor object at `path`, see [`Repository::retrieve`].
    async fn retrieve_mo(
        &self,
        path: &str,
        timestamp: Option<u64>,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Option<MonitorObject>> {
        match self.retrieve(path, timestamp, filter).await? {
            Some(record) => Ok(Some(mo_from_record(&record)?)),
            None => Ok(None),
        }
    }

    /// Latest monitor object at `path`, as a JSON document.
    async fn retrieve_mo_json(
        &self,
        path: &str,
        timestamp: Option<u64>,
    ) -> Result<Option<serde_json::Value>> {
        match self.retrieve(path, timestamp, None).await? {
            Some(record) => {
                let value =
                    serde_json::from_slice(&record.payload).map_err(|e| StoreError::Decode {
                        path: path.to_string(),
                        details: e.to_string(),
                    })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Latest quality object at `path`.
    async fn retrieve_qo(
        &self,
        path: &str,
        timestamp: Option<u64>,
    ) -> Result<Option<QualityObject>> {
        match self.retrieve(path, timestamp, None).await? {
            Some(record) => Ok(Some(qo_from_record(&record)?)),
            None => Ok(None),
        }
    }

    /// Timestamp of the newest version at `path`, if any.
    async fn latest_timestamp(&self, path: &str) -> Result<Option<u64>>;

    /// Paths currently stored under `prefix`, sorted.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;

    /// Task segments (`qc/<detector>/<task>`) that have publications.
    async fn list_tasks_with_publications(&self) -> Result<Vec<String>>;

    /// Delete every version of `object` under `task`'s path.
    async fn truncate(&self, detector: &str, task: &str, object: &str) -> Result<()>;
}

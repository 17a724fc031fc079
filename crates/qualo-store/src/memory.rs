// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory repository backend.
//!
//! Keeps every stored version (additive history, like the production object
//! store). Used by tests and by the basic runner; it is also the reference
//! implementation of the retrieval semantics.

use crate::error::Result;
use crate::repository::{record_from_mo, record_from_qo, ObjectRecord, Repository};
use async_trait::async_trait;
use qualo_core::{MonitorObject, QualityObject};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Additive in-memory object store.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    // path -> versions ordered by insertion; timestamps may interleave
    records: RwLock<BTreeMap<String, Vec<ObjectRecord>>>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions across all paths.
    pub async fn total_versions(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }

    async fn push(&self, record: ObjectRecord) {
        let mut records = self.records.write().await;
        records.entry(record.path.clone()).or_default().push(record);
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn store_mo(&self, mo: &MonitorObject, timestamp: u64) -> Result<()> {
        self.push(record_from_mo(mo, timestamp)?).await;
        Ok(())
    }

    async fn store_qo(&self, qo: &QualityObject, timestamp: u64) -> Result<()> {
        self.push(record_from_qo(qo, timestamp)?).await;
        Ok(())
    }

    async fn retrieve(
        &self,
        path: &str,
        timestamp: Option<u64>,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Option<ObjectRecord>> {
        let records = self.records.read().await;
        let Some(versions) = records.get(path) else {
            return Ok(None);
        };
        let best = versions
            .iter()
            .filter(|r| timestamp.is_none_or(|t| r.timestamp <= t))
            .filter(|r| filter.is_none_or(|f| r.matches(f)))
            .max_by_key(|r| r.timestamp);
        Ok(best.cloned())
    }

    async fn latest_timestamp(&self, path: &str) -> Result<Option<u64>> {
        let records = self.records.read().await;
        Ok(records
            .get(path)
            .and_then(|versions| versions.iter().map(|r| r.timestamp).max()))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let records = self.records.read().await;
        Ok(records
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn list_tasks_with_publications(&self) -> Result<Vec<String>> {
        let records = self.records.read().await;
        let mut tasks: Vec<String> = records
            .keys()
            .filter_map(|path| {
                // qc/<detector>/<task>/<object...>
                let mut parts = path.splitn(4, '/');
                let prefix = parts.next()?;
                let detector = parts.next()?;
                let task = parts.next()?;
                parts.next()?;
                Some(format!("{}/{}/{}", prefix, detector, task))
            })
            .collect();
        tasks.sort();
        tasks.dedup();
        Ok(tasks)
    }

    async fn truncate(&self, detector: &str, task: &str, object: &str) -> Result<()> {
        let path = qualo_core::object::object_path(detector, task, object);
        self.records.write().await.remove(&path);
        Ok(())
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed repository.
//!
//! This is the legacy-SQL flavour of the store: records are keyed by
//! `(path, run)` and a re-publication replaces the previous version for that
//! run. Writes accumulate in an internal queue and flush when the queue is
//! large or old enough; reads flush first so the backend reads its own
//! writes.

use crate::error::{Result, StoreError};
use crate::repository::{record_from_mo, record_from_qo, ObjectRecord, Repository};
use async_trait::async_trait;
use qualo_core::{MonitorObject, QualityObject};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS objects (
    path TEXT NOT NULL,
    run INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    payload BLOB NOT NULL,
    metadata TEXT NOT NULL,
    PRIMARY KEY (path, run)
)";

/// SQLite repository configuration.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Flush the write queue when it reaches this size.
    pub max_batch_size: usize,
    /// Flush the write queue when its oldest entry reaches this age.
    pub max_batch_age: Duration,
    /// Connection pool size.
    pub max_connections: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 64,
            max_batch_age: Duration::from_secs(5),
            max_connections: 5,
        }
    }
}

#[derive(Default, Debug)]
struct WriteQueue {
    pending: Vec<(ObjectRecord, u32)>,
    oldest: Option<Instant>,
}

/// SQLite-backed object store with `(path, run)` replace semantics.
#[derive(Debug)]
pub struct SqliteRepository {
    pool: SqlitePool,
    config: SqliteConfig,
    queue: Mutex<WriteQueue>,
}

impl SqliteRepository {
    /// Connect to (and bootstrap) a database file.
    pub async fn connect(path: impl AsRef<Path>, config: SqliteConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::ConnectFailed {
                url: path.display().to_string(),
                details: format!("failed to create directory: {}", e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&url)
            .await
            .map_err(|e| StoreError::ConnectFailed {
                url: url.clone(),
                details: e.to_string(),
            })?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::ConnectFailed {
                url,
                details: format!("schema bootstrap failed: {}", e),
            })?;

        info!(path = %path.display(), "Connected to SQLite repository");
        Ok(Self {
            pool,
            config,
            queue: Mutex::new(WriteQueue::default()),
        })
    }

    /// Flush the write queue unconditionally.
    pub async fn flush(&self) -> Result<()> {
        let drained = {
            let mut queue = self.queue.lock().await;
            queue.oldest = None;
            std::mem::take(&mut queue.pending)
        };
        if drained.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let count = drained.len();
        for (record, run) in drained {
            let metadata = serde_json::to_string(&record.metadata).map_err(|e| {
                StoreError::Decode {
                    path: record.path.clone(),
                    details: e.to_string(),
                }
            })?;
            sqlx::query(
                "INSERT INTO objects (path, run, timestamp, payload, metadata)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(path, run) DO UPDATE SET
                     timestamp = excluded.timestamp,
                     payload = excluded.payload,
                     metadata = excluded.metadata",
            )
            .bind(&record.path)
            .bind(run as i64)
            .bind(record.timestamp as i64)
            .bind(&record.payload)
            .bind(&metadata)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count, "Flushed write queue");
        Ok(())
    }

    async fn enqueue(&self, record: ObjectRecord, run: u32) -> Result<()> {
        let should_flush = {
            let mut queue = self.queue.lock().await;
            queue.pending.push((record, run));
            queue.oldest.get_or_insert_with(Instant::now);
            queue.pending.len() >= self.config.max_batch_size
                || queue
                    .oldest
                    .is_some_and(|t| t.elapsed() >= self.config.max_batch_age)
        };
        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ObjectRecord> {
        let path: String = row.get("path");
        let metadata_json: String = row.get("metadata");
        let metadata: BTreeMap<String, String> =
            serde_json::from_str(&metadata_json).map_err(|e| StoreError::Decode {
                path: path.clone(),
                details: e.to_string(),
            })?;
        Ok(ObjectRecord {
            path,
            timestamp: row.get::<i64, _>("timestamp") as u64,
            payload: row.get("payload"),
            metadata,
        })
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn store_mo(&self, mo: &MonitorObject, timestamp: u64) -> Result<()> {
        self.enqueue(record_from_mo(mo, timestamp)?, mo.activity.id).await
    }

    async fn store_qo(&self, qo: &QualityObject, timestamp: u64) -> Result<()> {
        self.enqueue(record_from_qo(qo, timestamp)?, qo.activity.id).await
    }

    async fn retrieve(
        &self,
        path: &str,
        timestamp: Option<u64>,
        filter: Option<&BTreeMap<String, String>>,
    ) -> Result<Option<ObjectRecord>> {
        self.flush().await?;
        let rows = match timestamp {
            Some(t) => {
                sqlx::query(
                    "SELECT path, timestamp, payload, metadata FROM objects
                     WHERE path = ? AND timestamp <= ? ORDER BY timestamp DESC",
                )
                .bind(path)
                .bind(t as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT path, timestamp, payload, metadata FROM objects
                     WHERE path = ? ORDER BY timestamp DESC",
                )
                .bind(path)
                .fetch_all(&self.pool)
                .await?
            }
        };
        for row in &rows {
            let record = Self::row_to_record(row)?;
            if filter.is_none_or(|f| record.matches(f)) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn latest_timestamp(&self, path: &str) -> Result<Option<u64>> {
        self.flush().await?;
        let row = sqlx::query("SELECT MAX(timestamp) AS ts FROM objects WHERE path = ?")
            .bind(path)
            .fetch_one(&self.pool)
            .await?;
        let ts: Option<i64> = row.get("ts");
        Ok(ts.map(|t| t as u64))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        self.flush().await?;
        let pattern = format!("{}%", prefix);
        let rows = sqlx::query("SELECT DISTINCT path FROM objects WHERE path LIKE ? ORDER BY path")
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("path")).collect())
    }

    async fn list_tasks_with_publications(&self) -> Result<Vec<String>> {
        let paths = self.list_objects("").await?;
        let mut tasks: Vec<String> = paths
            .iter()
            .filter_map(|path| {
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
        self.flush().await?;
        let path = qualo_core::object::object_path(detector, task, object);
        sqlx::query("DELETE FROM objects WHERE path = ?")
            .bind(&path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

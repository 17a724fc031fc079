// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reference object resolution.
//!
//! Checks that compare against a reference resolve it once per activity and
//! reuse the cached result, including a cached miss. A missing reference is
//! not an error: the check returns `Null` with the `ReferenceNotFound` flag
//! and carries on.

use qualo_core::{FlagType, MonitorObject, Quality};
use qualo_store::Repository;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Per-activity cache of reference objects.
pub struct ReferenceCache {
    repository: Arc<dyn Repository>,
    // cached result per path; a None is a remembered miss
    cache: HashMap<String, Option<MonitorObject>>,
}

impl ReferenceCache {
    /// Create a cache over the repository.
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            cache: HashMap::new(),
        }
    }

    /// Forget everything; call at start of activity.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Resolve `path`, hitting the repository only on the first request of
    /// the activity.
    pub async fn resolve(&mut self, path: &str, timestamp: Option<u64>) -> Option<MonitorObject> {
        if let Some(cached) = self.cache.get(path) {
            return cached.clone();
        }
        let resolved = match self.repository.retrieve_mo(path, timestamp, None).await {
            Ok(found) => found,
            Err(e) => {
                warn!(path, error = %e, "Reference lookup failed, treating as missing");
                None
            }
        };
        if resolved.is_none() {
            warn!(path, "Reference object not found");
        }
        self.cache.insert(path.to_string(), resolved.clone());
        resolved
    }
}

/// The verdict a check returns when its reference is missing.
pub fn missing_reference_quality(path: &str) -> Quality {
    Quality::null().add_flag(
        FlagType::REFERENCE_NOT_FOUND,
        format!("no reference at '{}'", path),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualo_core::{Counter, Payload, QualityLevel};
    use qualo_store::MemoryRepository;

    #[tokio::test]
    async fn test_resolution_is_cached_per_activity() {
        let repo = Arc::new(MemoryRepository::new());
        let mo = MonitorObject::new("hRef", "refTask", "TST", Payload::Counter(Counter { count: 1 }));
        repo.store_mo(&mo, 100).await.unwrap();

        let mut cache = ReferenceCache::new(repo.clone());
        let first = cache.resolve("qc/TST/refTask/hRef", None).await;
        assert!(first.is_some());

        // a newer version does not change the cached resolution
        repo.store_mo(&mo, 200).await.unwrap();
        let second = cache.resolve("qc/TST/refTask/hRef", None).await;
        assert_eq!(second, first);

        // a new activity resolves afresh
        cache.clear();
        assert!(cache.resolve("qc/TST/refTask/hRef", None).await.is_some());
    }

    #[tokio::test]
    async fn test_miss_is_cached_and_not_an_error() {
        let repo = Arc::new(MemoryRepository::new());
        let mut cache = ReferenceCache::new(repo.clone());
        assert!(cache.resolve("qc/TST/refTask/missing", None).await.is_none());

        // even if the object appears later, the miss is cached for the
        // activity
        let mo = MonitorObject::new("missing", "refTask", "TST", Payload::Counter(Counter::default()));
        repo.store_mo(&mo, 100).await.unwrap();
        assert!(cache.resolve("qc/TST/refTask/missing", None).await.is_none());
    }

    #[test]
    fn test_missing_reference_quality_shape() {
        let quality = missing_reference_quality("qc/TST/ref/hA");
        assert_eq!(quality.level(), QualityLevel::Null);
        assert_eq!(quality.flags().len(), 1);
        assert_eq!(quality.flags()[0].0, FlagType::REFERENCE_NOT_FOUND);
        assert!(quality.flags()[0].1.contains("qc/TST/ref/hA"));
    }
}

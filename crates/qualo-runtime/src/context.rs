// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service handles passed into user code.
//!
//! There is no process-wide state: everything a task or check may touch
//! arrives through [`Services`] at the lifecycle points that are allowed to
//! block.

use qualo_store::Repository;
use std::sync::Arc;

/// Handles to the external collaborators user code may use.
#[derive(Clone, Default)]
pub struct Services {
    /// The object repository, absent in repository-less deployments.
    pub repository: Option<Arc<dyn Repository>>,
}

impl Services {
    /// Services with a repository.
    pub fn with_repository(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository: Some(repository),
        }
    }
}

/// Current wall-clock time in ms since epoch.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

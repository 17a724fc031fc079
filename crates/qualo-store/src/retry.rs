// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry with exponential backoff for transient repository errors.
//!
//! Callers are allowed to drop a single attempt, never the object: an
//! operation retries until it succeeds, hits a non-transient error, or
//! exhausts its attempts, at which point the transient error escalates to
//! fatal.

use crate::error::{Result, StoreError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for repository operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
        }
    }
}

/// Run `op` under the retry policy.
///
/// Only transient errors are retried; everything else surfaces immediately.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient repository error, backing off"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err.into_fatal()),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persister
//!
//! Writes completed records through a [`RecordStore`] with bounded
//! exponential backoff on transient failures.
//!
//! Each attempt runs on the blocking pool under `attempt_timeout`; the whole
//! sequence runs under `deadline`. An attempt that times out may still land
//! in the store later, which is why the store suppresses duplicate
//! fingerprints.

use crate::commit::CompletedRecord;
use crate::store::{RecordId, RecordStore, StorageError};
use std::sync::Arc;
use std::time::Duration;

/// Retry and deadline settings for one persist call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub backoff_base: Duration,
    /// Delay cap.
    pub backoff_max: Duration,
    /// Bound on a single insert.
    pub attempt_timeout: Duration,
    /// Bound on the whole persist call.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(2),
            deadline: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based): `base * 2^(retry - 1)`,
    /// capped at `backoff_max`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// Retrying front end to a record store.
pub struct Persister<S: RecordStore> {
    store: Arc<S>,
    policy: RetryPolicy,
}

impl<S: RecordStore + 'static> Persister<S> {
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Persist a record, retrying transient failures.
    ///
    /// Permanent failures return immediately. Running past the deadline
    /// yields [`StorageError::Timeout`]; running out of attempts yields the
    /// last transient error.
    pub async fn persist(&self, record: CompletedRecord) -> Result<RecordId, StorageError> {
        let record = Arc::new(record);
        let mut attempts = 0u32;

        let outcome =
            tokio::time::timeout(self.policy.deadline, self.attempt_loop(&record, &mut attempts))
                .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    attempts,
                    deadline_ms = self.policy.deadline.as_millis() as u64,
                    "persist deadline exceeded"
                );
                Err(StorageError::Timeout { attempts })
            }
        }
    }

    async fn attempt_loop(
        &self,
        record: &Arc<CompletedRecord>,
        attempts: &mut u32,
    ) -> Result<RecordId, StorageError> {
        loop {
            *attempts += 1;
            let attempt = *attempts;

            let store = Arc::clone(&self.store);
            let rec = Arc::clone(record);
            let insert = tokio::task::spawn_blocking(move || store.insert(&rec));

            let err = match tokio::time::timeout(self.policy.attempt_timeout, insert).await {
                Ok(Ok(Ok(id))) => {
                    if attempt > 1 {
                        tracing::info!(%id, attempt, "record persisted after retry");
                    }
                    return Ok(id);
                }
                Ok(Ok(Err(e))) => e,
                Ok(Err(join)) => StorageError::Permanent(format!("insert task failed: {}", join)),
                Err(_) => StorageError::Transient(format!(
                    "insert attempt timed out after {} ms",
                    self.policy.attempt_timeout.as_millis()
                )),
            };

            if !err.is_transient() {
                tracing::error!(attempt, error = %err, "permanent storage error, not retrying");
                return Err(err);
            }

            if attempt >= self.policy.max_attempts {
                tracing::error!(attempt, error = %err, "storage retries exhausted");
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient storage error, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message dispatcher
//!
//! Entry point for every bus message: decode, pick a correlation key, merge
//! into the buffer and, when a record completes, finalize and persist it.
//! Nothing in this path is fatal; every failure is logged, counted and the
//! message dropped.

use crate::buffer::{CorrelationBuffer, EvictedRecord, MergeOutcome};
use crate::commit::{CommitPolicy, CompletedRecord};
use crate::config::BridgeConfig;
use crate::field;
use crate::key::KeyStrategy;
use crate::persister::Persister;
use crate::store::{RecordId, RecordStore, StorageError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Payload or topic rejected by the decoder.
    Rejected,
    /// Merged; the record is still missing fields.
    Buffered,
    /// Completed the record, which is now stored.
    Persisted(RecordId),
    /// Completed the record, but finalize or persist failed.
    Dropped,
}

/// Dispatcher counters.
#[derive(Debug)]
pub struct DispatcherStats {
    pub received: AtomicU64,
    pub rejected: AtomicU64,
    pub merged: AtomicU64,
    pub completed: AtomicU64,
    pub persisted: AtomicU64,
    pub persist_failures: AtomicU64,
    pub commit_errors: AtomicU64,
    pub evicted: AtomicU64,
    pub created: Instant,
}

impl DispatcherStats {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            merged: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            commit_errors: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            commit_errors: self.commit_errors.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for DispatcherStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of dispatcher statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub received: u64,
    pub rejected: u64,
    pub merged: u64,
    pub completed: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub commit_errors: u64,
    pub evicted: u64,
    pub uptime_secs: u64,
}

impl DispatcherStatsSnapshot {
    /// Completed records per second since start.
    pub fn records_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.persisted as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

/// Routes bus messages into records.
pub struct Dispatcher<S: RecordStore> {
    strategy: Box<dyn KeyStrategy>,
    buffer: CorrelationBuffer,
    commit: CommitPolicy,
    persister: Persister<S>,
    stats: Arc<DispatcherStats>,
}

impl<S: RecordStore + 'static> Dispatcher<S> {
    pub fn new(
        strategy: Box<dyn KeyStrategy>,
        buffer: CorrelationBuffer,
        persister: Persister<S>,
    ) -> Self {
        Self {
            strategy,
            buffer,
            commit: CommitPolicy::new(),
            persister,
            stats: Arc::new(DispatcherStats::new()),
        }
    }

    /// Wire a dispatcher from configuration.
    pub fn from_config(config: &BridgeConfig, store: Arc<S>) -> Self {
        Self::new(
            config.key_strategy(),
            CorrelationBuffer::new(config.staleness_window()),
            Persister::new(store, config.retry_policy()),
        )
    }

    pub fn buffer(&self) -> &CorrelationBuffer {
        &self.buffer
    }

    pub fn persister(&self) -> &Persister<S> {
        &self.persister
    }

    /// Shared counters, for reporting from other tasks.
    pub fn stats_handle(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Handle one `(topic, payload)` event.
    pub async fn on_message(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let (kind, value) = match field::decode(topic, payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(topic, error = %e, "rejected bus message");
                return DispatchOutcome::Rejected;
            }
        };

        let key = self.strategy.key_for(kind, SystemTime::now());
        self.stats.merged.fetch_add(1, Ordering::Relaxed);

        let snapshot = match self.buffer.merge(key, kind, value) {
            MergeOutcome::Updated => return DispatchOutcome::Buffered,
            MergeOutcome::Restarted(_) => {
                self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                return DispatchOutcome::Buffered;
            }
            MergeOutcome::Completed(snapshot) => snapshot,
        };
        self.stats.completed.fetch_add(1, Ordering::Relaxed);

        let record = match self.commit.finalize(snapshot) {
            Ok(record) => record,
            Err(e) => {
                self.stats.commit_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(%key, error = %e, "completed record failed to finalize");
                return DispatchOutcome::Dropped;
            }
        };

        tracing::debug!(%key, timestamp = %record.timestamp, "record complete");
        self.persist(record).await
    }

    async fn persist(&self, record: CompletedRecord) -> DispatchOutcome {
        // Kept for the failure log; the persister consumes its copy.
        let failed_copy = record.clone();

        match self.persister.persist(record).await {
            Ok(id) => {
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
                tracing::info!(%id, timestamp = %failed_copy.timestamp, "record persisted");
                DispatchOutcome::Persisted(id)
            }
            Err(e) => {
                self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
                log_lost_record(&failed_copy, &e);
                DispatchOutcome::Dropped
            }
        }
    }

    /// Drop partial records older than the staleness window.
    pub fn evict_stale(&self) -> Vec<EvictedRecord> {
        let evicted = self.buffer.evict_stale();
        if !evicted.is_empty() {
            self.stats
                .evicted
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        }
        evicted
    }
}

fn log_lost_record(record: &CompletedRecord, err: &StorageError) {
    tracing::error!(
        error = %err,
        frequency = record.frequency,
        humidity = record.humidity,
        temperature = record.temperature,
        voltage = record.voltage,
        timestamp = %record.timestamp,
        assembled_at = %record.assembled_at.to_rfc3339(),
        "failed to persist record, reading dropped"
    );
}

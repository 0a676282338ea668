// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Correlation buffer
//!
//! Holds the in-flight partial records, one per correlation key, and applies
//! field updates to them.
//!
//! # Invariants
//!
//! - At most one partial record is open per key.
//! - Setting a field, testing completeness and removing a completed record
//!   happen under the same per-key lock, so two concurrent merges can never
//!   both observe the completion.
//! - A record older than the staleness window never contributes to a
//!   completion: the periodic sweep drops it, and a merge that reaches it
//!   first replaces it with a fresh record.

use crate::field::{FieldKind, FieldValue};
use crate::key::CorrelationKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Readings accumulated so far for one correlation key.
#[derive(Debug, Clone)]
pub struct PartialRecord {
    slots: [Option<FieldValue>; 5],
    created_at: Instant,
    updated_at: Instant,
}

impl PartialRecord {
    pub fn new(created_at: Instant) -> Self {
        Self {
            slots: Default::default(),
            created_at,
            updated_at: created_at,
        }
    }

    /// Set a field, returning the value it replaced.
    pub fn set(&mut self, kind: FieldKind, value: FieldValue) -> Option<FieldValue> {
        self.slots[kind.index()].replace(value)
    }

    pub fn get(&self, kind: FieldKind) -> Option<&FieldValue> {
        self.slots[kind.index()].as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Kinds not received yet.
    pub fn missing(&self) -> Vec<FieldKind> {
        FieldKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_none())
            .collect()
    }

    /// Kinds received so far.
    pub fn present(&self) -> Vec<FieldKind> {
        FieldKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn updated_at(&self) -> Instant {
        self.updated_at
    }

    /// Time the record has been open as of `now`.
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Result of applying one field update.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// The record is still missing fields.
    Updated,
    /// The open record was past the staleness window; it was dropped and
    /// the field started a fresh record.
    Restarted(EvictedRecord),
    /// All five fields are present; the record has left the buffer.
    Completed(PartialRecord),
}

impl MergeOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// A record dropped by the staleness sweep.
#[derive(Debug, Clone)]
pub struct EvictedRecord {
    pub key: CorrelationKey,
    pub record: PartialRecord,
}

/// Owner of all open partial records.
pub struct CorrelationBuffer {
    open: DashMap<CorrelationKey, PartialRecord>,
    staleness_window: Duration,
}

impl CorrelationBuffer {
    pub fn new(staleness_window: Duration) -> Self {
        Self {
            open: DashMap::new(),
            staleness_window,
        }
    }

    pub fn staleness_window(&self) -> Duration {
        self.staleness_window
    }

    /// Merge a field into the record for `key`.
    pub fn merge(&self, key: CorrelationKey, kind: FieldKind, value: FieldValue) -> MergeOutcome {
        self.merge_at(key, kind, value, Instant::now())
    }

    /// Merge with an explicit clock reading.
    pub fn merge_at(
        &self,
        key: CorrelationKey,
        kind: FieldKind,
        value: FieldValue,
        now: Instant,
    ) -> MergeOutcome {
        match self.open.entry(key) {
            Entry::Occupied(mut entry) => {
                let mut replaced = None;
                if entry.get().age_at(now) > self.staleness_window {
                    let stale = entry.insert(PartialRecord::new(now));
                    log_incomplete(key, &stale, now);
                    replaced = Some(EvictedRecord { key, record: stale });
                }

                let record = entry.get_mut();
                if let Some(previous) = record.set(kind, value) {
                    tracing::debug!(%key, %kind, %previous, "field overwritten before completion");
                }
                record.updated_at = now;

                if record.is_complete() {
                    MergeOutcome::Completed(entry.remove())
                } else if let Some(evicted) = replaced {
                    MergeOutcome::Restarted(evicted)
                } else {
                    MergeOutcome::Updated
                }
            }
            Entry::Vacant(entry) => {
                let mut record = PartialRecord::new(now);
                record.set(kind, value);
                tracing::trace!(%key, %kind, "opened partial record");

                if record.is_complete() {
                    MergeOutcome::Completed(record)
                } else {
                    entry.insert(record);
                    MergeOutcome::Updated
                }
            }
        }
    }

    /// Drop every record open longer than the staleness window.
    pub fn evict_stale(&self) -> Vec<EvictedRecord> {
        self.evict_stale_at(Instant::now())
    }

    pub fn evict_stale_at(&self, now: Instant) -> Vec<EvictedRecord> {
        let mut evicted = Vec::new();
        self.open.retain(|key, record| {
            if record.age_at(now) > self.staleness_window {
                evicted.push(EvictedRecord {
                    key: *key,
                    record: record.clone(),
                });
                false
            } else {
                true
            }
        });

        for entry in &evicted {
            log_incomplete(entry.key, &entry.record, now);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn contains(&self, key: CorrelationKey) -> bool {
        self.open.contains_key(&key)
    }

    /// Kinds currently held for `key`, or `None` if no record is open.
    pub fn present_kinds(&self, key: CorrelationKey) -> Option<Vec<FieldKind>> {
        self.open.get(&key).map(|record| record.present())
    }
}

fn log_incomplete(key: CorrelationKey, record: &PartialRecord, now: Instant) {
    let missing: Vec<String> = record.missing().iter().map(ToString::to_string).collect();
    tracing::warn!(
        %key,
        age_ms = record.age_at(now).as_millis() as u64,
        missing = %missing.join(","),
        "dropping stale partial record"
    );
}

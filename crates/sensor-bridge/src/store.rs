// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record store abstraction
//!
//! Defines the datastore collaborator the persister writes through.

use crate::commit::CompletedRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier assigned to a stored record by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage failures, classified by whether retrying can help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Connection-level failure (busy, locked, unreachable). Worth retrying.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// Constraint violation, bad schema, bad data. Retrying cannot help.
    #[error("permanent storage error: {0}")]
    Permanent(String),

    /// The write did not finish before its deadline.
    #[error("storage deadline exceeded after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// A record as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub frequency: f64,
    pub humidity: f64,
    pub temperature: f64,
    pub voltage: f64,
    pub created_at: String,
    /// RFC 3339 assembly time.
    pub assembled_at: String,
    /// Hex fingerprint.
    pub fingerprint: String,
}

/// Datastore collaborator.
///
/// `insert` must be idempotent per fingerprint inside the backend's
/// duplicate window: a second insert of the same reading returns the id of
/// the first row instead of writing a new one.
///
/// # Implementations
///
/// - `SqliteStore` -- default, file or in-memory
pub trait RecordStore: Send + Sync {
    /// Insert a completed record, returning its id.
    fn insert(&self, record: &CompletedRecord) -> Result<RecordId, StorageError>;

    /// Most recent records, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>, StorageError>;

    /// Total number of stored records.
    fn count(&self) -> Result<usize, StorageError>;

    /// Delete all records.
    fn clear(&self) -> Result<(), StorageError>;
}

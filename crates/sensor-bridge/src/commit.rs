// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Commit policy
//!
//! Turns a complete partial record into the immutable value handed to the
//! persister, and computes the content fingerprint used for duplicate
//! suppression.

use crate::buffer::PartialRecord;
use crate::field::FieldKind;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Commit failures. Only reachable if a caller hands over a record the
/// buffer did not report as complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("record incomplete, missing or mistyped: {missing:?}")]
    Incomplete { missing: Vec<FieldKind> },
}

/// MD5 digest over a record's five field values.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex, 32 characters.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// A fully assembled reading, ready for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRecord {
    pub frequency: f64,
    pub humidity: f64,
    pub temperature: f64,
    pub voltage: f64,
    /// Producer-defined timestamp, stored as the row's `created_at`.
    pub timestamp: String,
    pub assembled_at: DateTime<Utc>,
}

impl CompletedRecord {
    /// Fingerprint over the field values only; `assembled_at` is excluded
    /// so a re-assembled copy of the same reading hashes identically.
    ///
    /// `-0.0` hashes as `0.0`, matching how SQLite stores it.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Md5::new();
        for value in [self.frequency, self.humidity, self.temperature, self.voltage] {
            let value = if value == 0.0 { 0.0 } else { value };
            hasher.update(value.to_bits().to_be_bytes());
        }
        hasher.update((self.timestamp.len() as u64).to_be_bytes());
        hasher.update(self.timestamp.as_bytes());

        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest);
        Fingerprint(bytes)
    }
}

/// Converts complete partial records into [`CompletedRecord`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitPolicy;

impl CommitPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Finalize a snapshot, stamping the current time.
    pub fn finalize(&self, snapshot: PartialRecord) -> Result<CompletedRecord, CommitError> {
        self.finalize_at(snapshot, Utc::now())
    }

    pub fn finalize_at(
        &self,
        snapshot: PartialRecord,
        assembled_at: DateTime<Utc>,
    ) -> Result<CompletedRecord, CommitError> {
        let numeric = |kind| snapshot.get(kind).and_then(|value| value.as_f64());

        let frequency = numeric(FieldKind::Frequency);
        let humidity = numeric(FieldKind::Humidity);
        let temperature = numeric(FieldKind::Temperature);
        let voltage = numeric(FieldKind::Voltage);
        let timestamp = snapshot
            .get(FieldKind::Timestamp)
            .and_then(|value| value.as_text())
            .map(str::to_string);

        match (frequency, humidity, temperature, voltage, timestamp) {
            (Some(frequency), Some(humidity), Some(temperature), Some(voltage), Some(timestamp)) => {
                Ok(CompletedRecord {
                    frequency,
                    humidity,
                    temperature,
                    voltage,
                    timestamp,
                    assembled_at,
                })
            }
            (f, h, t, v, ts) => {
                let present = [f.is_some(), h.is_some(), t.is_some(), v.is_some(), ts.is_some()];
                let missing = FieldKind::ALL
                    .into_iter()
                    .zip(present)
                    .filter_map(|(kind, ok)| (!ok).then_some(kind))
                    .collect();
                Err(CommitError::Incomplete { missing })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldValue;
    use chrono::TimeZone;
    use std::time::Instant;

    fn complete_snapshot() -> PartialRecord {
        let mut record = PartialRecord::new(Instant::now());
        record.set(FieldKind::Frequency, FieldValue::Numeric(50.0));
        record.set(FieldKind::Humidity, FieldValue::Numeric(60.0));
        record.set(FieldKind::Temperature, FieldValue::Numeric(22.5));
        record.set(FieldKind::Voltage, FieldValue::Numeric(3.3));
        record.set(
            FieldKind::Timestamp,
            FieldValue::Text("2024-01-01T00:00:00Z".to_string()),
        );
        record
    }

    #[test]
    fn test_finalize_copies_fields() {
        let stamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let record = CommitPolicy::new()
            .finalize_at(complete_snapshot(), stamp)
            .unwrap();

        assert_eq!(record.frequency, 50.0);
        assert_eq!(record.humidity, 60.0);
        assert_eq!(record.temperature, 22.5);
        assert_eq!(record.voltage, 3.3);
        assert_eq!(record.timestamp, "2024-01-01T00:00:00Z");
        assert_eq!(record.assembled_at, stamp);
    }

    #[test]
    fn test_finalize_incomplete() {
        let mut snapshot = PartialRecord::new(Instant::now());
        snapshot.set(FieldKind::Voltage, FieldValue::Numeric(3.3));

        let err = CommitPolicy::new().finalize(snapshot).unwrap_err();
        assert_eq!(
            err,
            CommitError::Incomplete {
                missing: vec![
                    FieldKind::Frequency,
                    FieldKind::Humidity,
                    FieldKind::Temperature,
                    FieldKind::Timestamp,
                ]
            }
        );
    }

    #[test]
    fn test_finalize_mistyped_slot() {
        let mut snapshot = complete_snapshot();
        snapshot.set(FieldKind::Humidity, FieldValue::Text("wet".to_string()));

        let err = CommitPolicy::new().finalize(snapshot).unwrap_err();
        assert_eq!(
            err,
            CommitError::Incomplete {
                missing: vec![FieldKind::Humidity]
            }
        );
    }

    #[test]
    fn test_fingerprint_ignores_assembly_time() {
        let policy = CommitPolicy::new();
        let a = policy
            .finalize_at(complete_snapshot(), Utc.timestamp_opt(0, 0).unwrap())
            .unwrap();
        let b = policy
            .finalize_at(complete_snapshot(), Utc.timestamp_opt(60, 0).unwrap())
            .unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().to_hex().len(), 32);
    }

    #[test]
    fn test_fingerprint_tracks_every_field() {
        let base = CommitPolicy::new().finalize(complete_snapshot()).unwrap();

        let mut changed = base.clone();
        changed.voltage = 3.4;
        assert_ne!(base.fingerprint(), changed.fingerprint());

        let mut changed = base.clone();
        changed.timestamp.push('x');
        assert_ne!(base.fingerprint(), changed.fingerprint());
    }

    #[test]
    fn test_fingerprint_signed_zero() {
        let mut positive = CommitPolicy::new().finalize(complete_snapshot()).unwrap();
        positive.temperature = 0.0;
        let mut negative = positive.clone();
        negative.temperature = -0.0;

        assert_eq!(positive.fingerprint(), negative.fingerprint());
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Offline log import
//!
//! While disconnected, the field device appends readings to a daily CSV
//! file named `YYMMDD.csv`:
//!
//! ```text
//! Timestamp,Voltage,Frequency,Temperature,Humidity
//! 12:00:00,230.12,50.01,22.50,60.00
//! ```
//!
//! Rows carry only the time of day; the date comes from the file name.
//! Imported records go through the same [`Persister`] as live ones and are
//! stamped with the reading time, so importing a file twice stores nothing
//! new.

use crate::commit::CompletedRecord;
use crate::persister::Persister;
use crate::store::{RecordStore, StorageError};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use std::path::Path;
use thiserror::Error;

const HEADER: &str = "Timestamp,Voltage,Frequency,Temperature,Humidity";

/// Import failures. Malformed rows are not errors; they are skipped.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error at record {record}: {source}")]
    Storage {
        /// 1-based index among the well-formed rows.
        record: usize,
        #[source]
        source: StorageError,
    },
}

/// Summary of one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Rows accepted by the store, duplicates of earlier imports included.
    pub imported: usize,
    /// Malformed rows.
    pub skipped: usize,
}

/// Reading date encoded in a `YYMMDD` file stem.
pub fn date_from_path(path: &Path) -> Option<NaiveDate> {
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 6 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = stem[0..2].parse().ok()?;
    let month: u32 = stem[2..4].parse().ok()?;
    let day: u32 = stem[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

/// Parse one data row. `date` decides the timestamp format and the
/// assembly time; without it the row time is stamped onto `fallback`.
fn parse_row(
    row: &str,
    date: Option<NaiveDate>,
    fallback: DateTime<Utc>,
) -> Option<CompletedRecord> {
    let mut cols = row.split(',').map(str::trim);
    let time = NaiveTime::parse_from_str(cols.next()?, "%H:%M:%S").ok()?;

    let mut number = || -> Option<f64> {
        let value: f64 = cols.next()?.parse().ok()?;
        value.is_finite().then_some(value)
    };
    let voltage = number()?;
    let frequency = number()?;
    let temperature = number()?;
    let humidity = number()?;
    if cols.next().is_some() {
        return None;
    }

    let (timestamp, assembled_at) = match date {
        Some(date) => {
            let reading = date.and_time(time);
            (
                reading.format("%Y-%m-%d %H:%M:%S").to_string(),
                Utc.from_utc_datetime(&reading),
            )
        }
        None => (time.format("%H:%M:%S").to_string(), fallback),
    };

    Some(CompletedRecord {
        frequency,
        humidity,
        temperature,
        voltage,
        timestamp,
        assembled_at,
    })
}

/// Parse a whole log, returning the records and the number of skipped rows.
pub fn parse_log(text: &str, date: Option<NaiveDate>) -> (Vec<CompletedRecord>, usize) {
    let fallback = Utc::now();
    let mut records = Vec::new();
    let mut skipped = 0;

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.eq_ignore_ascii_case(HEADER) {
            continue;
        }
        match parse_row(line, date, fallback) {
            Some(record) => records.push(record),
            None => {
                skipped += 1;
                tracing::warn!(line = idx + 1, row = line, "skipping malformed log row");
            }
        }
    }

    (records, skipped)
}

/// Import a device log file through `persister`.
pub async fn import_csv<S: RecordStore + 'static>(
    path: &Path,
    persister: &Persister<S>,
) -> Result<BackfillReport, BackfillError> {
    let text = tokio::fs::read_to_string(path).await?;
    let date = date_from_path(path);
    if date.is_none() {
        tracing::warn!(
            path = %path.display(),
            "file name is not YYMMDD, storing time of day only"
        );
    }

    let (records, skipped) = parse_log(&text, date);
    let mut report = BackfillReport {
        imported: 0,
        skipped,
    };

    for (idx, record) in records.into_iter().enumerate() {
        persister
            .persist(record)
            .await
            .map_err(|source| BackfillError::Storage {
                record: idx + 1,
                source,
            })?;
        report.imported += 1;
    }

    tracing::info!(
        path = %path.display(),
        imported = report.imported,
        skipped = report.skipped,
        "backfill complete"
    );
    Ok(report)
}

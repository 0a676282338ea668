// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite record store
//!
//! Production-ready persistent storage with zero external services.
//!
//! Thread-safe via internal Mutex (SQLite Connection is not Sync).
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE sensor_readings (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     frequency REAL NOT NULL,
//!     humidity REAL NOT NULL,
//!     temperature REAL NOT NULL,
//!     voltage REAL NOT NULL,
//!     created_at TEXT NOT NULL,
//!     assembled_at_ms INTEGER NOT NULL,
//!     fingerprint TEXT NOT NULL
//! );
//! CREATE INDEX idx_fingerprint ON sensor_readings(fingerprint);
//! ```

use crate::commit::CompletedRecord;
use crate::store::{RecordId, RecordStore, StorageError, StoredRecord};
use anyhow::{Context, Result};
use chrono::{SecondsFormat, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Default window inside which an identical fingerprint is a duplicate.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// How long SQLite itself waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// SQLite record store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    dedup_window: Duration,
}

impl SqliteStore {
    /// Create a new SQLite store with a file-based database
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path))?;
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite store (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to create in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set SQLite busy timeout")?;

        let store = Self {
            conn: Mutex::new(conn),
            dedup_window: DEFAULT_DEDUP_WINDOW,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Override the duplicate-suppression window.
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn dedup_window(&self) -> Duration {
        self.dedup_window
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sensor_readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                frequency REAL NOT NULL,
                humidity REAL NOT NULL,
                temperature REAL NOT NULL,
                voltage REAL NOT NULL,
                created_at TEXT NOT NULL,
                assembled_at_ms INTEGER NOT NULL,
                fingerprint TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_fingerprint ON sensor_readings(fingerprint)",
            [],
        )?;

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Helper function to map a row to a StoredRecord
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<StoredRecord> {
        let assembled_ms: i64 = row.get(6)?;
        let assembled_at = Utc
            .timestamp_millis_opt(assembled_ms)
            .single()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();

        Ok(StoredRecord {
            id: RecordId(row.get(0)?),
            frequency: row.get(1)?,
            humidity: row.get(2)?,
            temperature: row.get(3)?,
            voltage: row.get(4)?,
            created_at: row.get(5)?,
            assembled_at,
            fingerprint: row.get(7)?,
        })
    }
}

/// Sort a SQLite failure into the retry taxonomy.
pub(crate) fn classify(err: rusqlite::Error) -> StorageError {
    let transient = match &err {
        rusqlite::Error::SqliteFailure(failure, _) => matches!(
            failure.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
                | ErrorCode::FileLockingProtocolFailed
                | ErrorCode::OperationInterrupted
        ),
        _ => false,
    };

    if transient {
        StorageError::Transient(err.to_string())
    } else {
        StorageError::Permanent(err.to_string())
    }
}

impl RecordStore for SqliteStore {
    fn insert(&self, record: &CompletedRecord) -> Result<RecordId, StorageError> {
        let fingerprint = record.fingerprint().to_hex();
        let assembled_ms = record.assembled_at.timestamp_millis();
        let window_ms = i64::try_from(self.dedup_window.as_millis()).unwrap_or(i64::MAX);

        let mut conn = self.lock();
        let tx = conn.transaction().map_err(classify)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM sensor_readings
                 WHERE fingerprint = ?1
                 AND assembled_at_ms BETWEEN ?2 AND ?3
                 ORDER BY id DESC
                 LIMIT 1",
                params![
                    fingerprint,
                    assembled_ms.saturating_sub(window_ms),
                    assembled_ms.saturating_add(window_ms),
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(classify)?;

        if let Some(id) = existing {
            tracing::debug!(id, %fingerprint, "duplicate record suppressed");
            return Ok(RecordId(id));
        }

        tx.execute(
            "INSERT INTO sensor_readings
                (frequency, humidity, temperature, voltage, created_at, assembled_at_ms, fingerprint)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.frequency,
                record.humidity,
                record.temperature,
                record.voltage,
                record.timestamp,
                assembled_ms,
                fingerprint,
            ],
        )
        .map_err(classify)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(classify)?;

        Ok(RecordId(id))
    }

    fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, frequency, humidity, temperature, voltage,
                        created_at, assembled_at_ms, fingerprint
                 FROM sensor_readings
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(classify)?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map([limit], Self::row_to_record)
            .map_err(classify)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;

        Ok(records)
    }

    fn count(&self) -> Result<usize, StorageError> {
        let conn = self.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sensor_readings", [], |row| row.get(0))
            .map_err(classify)?;

        Ok(count as usize)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute("DELETE FROM sensor_readings", [])
            .map_err(classify)?;
        Ok(())
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Bridge
//!
//! Assembles sensor readings published field by field on a pub/sub bus
//! into complete records and stores them in SQLite.
//!
//! # Features
//!
//! - **Correlation** -- per-key partial records, completed exactly once
//! - **Staleness** -- partial records older than the window are dropped
//! - **Retrying persistence** -- bounded backoff, per-attempt and overall deadlines
//! - **Duplicate suppression** -- content fingerprint checked inside the store
//! - **Backfill** -- import of the device's offline CSV logs
//!
//! # Architecture
//!
//! ```text
//! BridgeService          (channel loop + staleness sweep)
//! +-- Dispatcher         (one entry point per bus message)
//!     +-- decode         (topic -> field kind, payload -> value)
//!     +-- KeyStrategy    (which record a field belongs to)
//!     +-- CorrelationBuffer
//!     +-- CommitPolicy   (partial -> completed record)
//!     +-- Persister      (retries around RecordStore::insert)
//!         +-- RecordStore (SqliteStore)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sensor_bridge::{BridgeConfig, BridgeService, BusMessage, SqliteStore};
//! use std::sync::Arc;
//!
//! let config = BridgeConfig::builder()
//!     .staleness_window(Duration::from_secs(30))
//!     .build();
//!
//! let store = Arc::new(SqliteStore::new("readings.db")?);
//! let (service, tx) = BridgeService::new(&config, store);
//! tx.send(BusMessage::new("voltage_data", "230.1")).await?;
//! service.run().await;
//! ```

pub mod backfill;
pub mod buffer;
pub mod bus;
pub mod commit;
pub mod config;
pub mod dispatcher;
pub mod field;
pub mod key;
pub mod persister;
pub mod service;
pub mod sqlite;
pub mod store;

pub use backfill::{import_csv, BackfillError, BackfillReport};
pub use buffer::{CorrelationBuffer, EvictedRecord, MergeOutcome, PartialRecord};
pub use bus::{forward_lines, parse_line, BusMessage};
pub use commit::{CommitError, CommitPolicy, CompletedRecord, Fingerprint};
pub use config::{BridgeConfig, BridgeConfigBuilder, ConfigError};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherStats, DispatcherStatsSnapshot};
pub use field::{decode, DecodeError, FieldKind, FieldValue};
pub use key::{CorrelationKey, GlobalKey, KeyStrategy, KeyStrategyKind, TimeBucketKey};
pub use persister::{Persister, RetryPolicy};
pub use service::BridgeService;
pub use sqlite::SqliteStore;
pub use store::{RecordId, RecordStore, StorageError, StoredRecord};

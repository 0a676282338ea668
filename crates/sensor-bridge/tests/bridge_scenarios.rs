// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios across decoder, buffer, commit and persistence.

use sensor_bridge::{
    BridgeConfig, CompletedRecord, CorrelationBuffer, CorrelationKey, DispatchOutcome, Dispatcher,
    FieldKind, FieldValue, GlobalKey, MergeOutcome, Persister, RecordId, RecordStore,
    RetryPolicy, SqliteStore, StorageError, StoredRecord,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Wraps an in-memory SQLite store, recording every insert call and
/// failing the first `transient_failures` of them after the row is written.
struct RecordingStore {
    inner: SqliteStore,
    inserts: Mutex<Vec<CompletedRecord>>,
    transient_failures: u32,
    calls: AtomicU32,
}

impl RecordingStore {
    fn new(transient_failures: u32) -> Self {
        Self {
            inner: SqliteStore::new_in_memory().unwrap(),
            inserts: Mutex::new(Vec::new()),
            transient_failures,
            calls: AtomicU32::new(0),
        }
    }

    fn inserts(&self) -> Vec<CompletedRecord> {
        self.inserts.lock().unwrap().clone()
    }
}

impl RecordStore for RecordingStore {
    fn insert(&self, record: &CompletedRecord) -> Result<RecordId, StorageError> {
        self.inserts.lock().unwrap().push(record.clone());
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let id = self.inner.insert(record)?;
        if call <= self.transient_failures {
            return Err(StorageError::Transient("ack lost".into()));
        }
        Ok(id)
    }

    fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>, StorageError> {
        self.inner.recent(limit)
    }

    fn count(&self) -> Result<usize, StorageError> {
        self.inner.count()
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.inner.clear()
    }
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        attempt_timeout: Duration::from_secs(2),
        deadline: Duration::from_secs(10),
    }
}

fn dispatcher(store: Arc<RecordingStore>) -> Dispatcher<RecordingStore> {
    Dispatcher::new(
        Box::new(GlobalKey),
        CorrelationBuffer::new(Duration::from_secs(30)),
        Persister::new(store, fast_retries()),
    )
}

fn value_for(kind: FieldKind, seed: f64) -> FieldValue {
    match kind {
        FieldKind::Timestamp => FieldValue::Text(format!("t{}", seed)),
        _ => FieldValue::Numeric(seed + kind as u8 as f64),
    }
}

/// All orderings of `items` (Heap's algorithm).
fn permutations(items: &mut [FieldKind], k: usize, out: &mut Vec<Vec<FieldKind>>) {
    if k <= 1 {
        out.push(items.to_vec());
        return;
    }
    for i in 0..k {
        permutations(items, k - 1, out);
        let j = if k % 2 == 0 { i } else { 0 };
        items.swap(j, k - 1);
    }
}

#[tokio::test]
async fn test_end_to_end_single_persist() {
    let store = Arc::new(RecordingStore::new(0));
    let d = dispatcher(Arc::clone(&store));

    let events: [(&str, &[u8]); 5] = [
        ("frequency_data", b"50.0"),
        ("humidity_data", b"60"),
        ("voltage_data", b"3.3"),
        ("temperature_data", b"22.5"),
        ("timestamp_data", b"2024-01-01T00:00:00Z"),
    ];

    let mut outcomes = Vec::new();
    for (topic, payload) in events {
        outcomes.push(d.on_message(topic, payload).await);
    }

    assert!(outcomes[..4]
        .iter()
        .all(|o| *o == DispatchOutcome::Buffered));
    assert!(matches!(outcomes[4], DispatchOutcome::Persisted(_)));

    let inserts = store.inserts();
    assert_eq!(inserts.len(), 1);
    let record = &inserts[0];
    assert_eq!(record.frequency, 50.0);
    assert_eq!(record.humidity, 60.0);
    assert_eq!(record.temperature, 22.5);
    assert_eq!(record.voltage, 3.3);
    assert_eq!(record.timestamp, "2024-01-01T00:00:00Z");
}

#[tokio::test]
async fn test_bad_payload_leaves_buffer_unchanged() {
    let store = Arc::new(RecordingStore::new(0));
    let d = dispatcher(Arc::clone(&store));

    d.on_message("humidity_data", b"60").await;
    let before = d.buffer().present_kinds(CorrelationKey::Global);

    assert_eq!(
        d.on_message("frequency_data", b"abc").await,
        DispatchOutcome::Rejected
    );
    assert_eq!(d.buffer().present_kinds(CorrelationKey::Global), before);

    // With nothing buffered yet, a rejected message opens no record.
    let fresh = dispatcher(Arc::new(RecordingStore::new(0)));
    fresh.on_message("frequency_data", b"abc").await;
    assert!(fresh.buffer().is_empty());
    assert!(store.inserts().is_empty());
}

#[test]
fn test_any_merge_order_completes_once() {
    let mut kinds = FieldKind::ALL;
    let mut orders = Vec::new();
    permutations(&mut kinds, FieldKind::ALL.len(), &mut orders);
    assert_eq!(orders.len(), 120);

    for order in orders {
        let buffer = CorrelationBuffer::new(Duration::from_secs(30));
        let mut completed = Vec::new();

        for kind in &order {
            if let MergeOutcome::Completed(record) =
                buffer.merge(CorrelationKey::Global, *kind, value_for(*kind, 1.0))
            {
                completed.push(record);
            }
        }

        assert_eq!(completed.len(), 1, "order {:?}", order);
        for kind in FieldKind::ALL {
            assert_eq!(completed[0].get(kind), Some(&value_for(kind, 1.0)));
        }
        assert!(buffer.is_empty());
    }
}

#[test]
fn test_last_write_wins_before_completion() {
    let buffer = CorrelationBuffer::new(Duration::from_secs(30));
    let key = CorrelationKey::Global;

    buffer.merge(key, FieldKind::Temperature, FieldValue::Numeric(21.0));
    buffer.merge(key, FieldKind::Temperature, FieldValue::Numeric(22.5));
    for kind in [
        FieldKind::Frequency,
        FieldKind::Humidity,
        FieldKind::Voltage,
    ] {
        buffer.merge(key, kind, value_for(kind, 1.0));
    }

    let outcome = buffer.merge(key, FieldKind::Timestamp, value_for(FieldKind::Timestamp, 1.0));
    let MergeOutcome::Completed(record) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(
        record.get(FieldKind::Temperature),
        Some(&FieldValue::Numeric(22.5))
    );
}

#[test]
fn test_concurrent_merges_complete_exactly_once() {
    for round in 0..200 {
        let buffer = Arc::new(CorrelationBuffer::new(Duration::from_secs(30)));
        let barrier = Arc::new(Barrier::new(FieldKind::ALL.len()));

        let handles: Vec<_> = FieldKind::ALL
            .into_iter()
            .map(|kind| {
                let buffer = Arc::clone(&buffer);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    buffer
                        .merge(CorrelationKey::Global, kind, value_for(kind, 2.0))
                        .is_completed()
                })
            })
            .collect();

        let completions = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|done| *done)
            .count();

        assert_eq!(completions, 1, "round {}", round);
        assert!(buffer.is_empty());
    }
}

#[test]
fn test_stale_record_never_completes() {
    let window = Duration::from_secs(30);
    let buffer = CorrelationBuffer::new(window);
    let key = CorrelationKey::Global;
    let start = Instant::now();

    for kind in [
        FieldKind::Frequency,
        FieldKind::Humidity,
        FieldKind::Temperature,
        FieldKind::Voltage,
    ] {
        buffer.merge_at(key, kind, value_for(kind, 1.0), start);
    }

    let evicted = buffer.evict_stale_at(start + window + Duration::from_millis(1));
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].record.missing(), vec![FieldKind::Timestamp]);

    // The late timestamp opens a new record instead of completing the old one.
    let later = start + window + Duration::from_secs(1);
    let outcome = buffer.merge_at(
        key,
        FieldKind::Timestamp,
        value_for(FieldKind::Timestamp, 1.0),
        later,
    );
    assert!(!outcome.is_completed());

    let mut completed = None;
    for kind in [
        FieldKind::Frequency,
        FieldKind::Humidity,
        FieldKind::Temperature,
        FieldKind::Voltage,
    ] {
        if let MergeOutcome::Completed(record) =
            buffer.merge_at(key, kind, value_for(kind, 9.0), later)
        {
            completed = Some(record);
        }
    }

    let record = completed.expect("second cycle completes");
    for kind in [
        FieldKind::Frequency,
        FieldKind::Humidity,
        FieldKind::Temperature,
        FieldKind::Voltage,
    ] {
        assert_eq!(record.get(kind), Some(&value_for(kind, 9.0)));
    }
}

#[tokio::test]
async fn test_retry_after_lost_acks_stores_once() {
    let store = Arc::new(RecordingStore::new(3));
    let d = dispatcher(Arc::clone(&store));

    let mut last = DispatchOutcome::Buffered;
    for (topic, payload) in [
        ("frequency_data", "50.0"),
        ("humidity_data", "60"),
        ("temperature_data", "22.5"),
        ("voltage_data", "3.3"),
        ("timestamp_data", "2024-01-01T00:00:00Z"),
    ] {
        last = d.on_message(topic, payload.as_bytes()).await;
    }

    let DispatchOutcome::Persisted(id) = last else {
        panic!("expected persisted, got {:?}", last);
    };
    assert_eq!(store.inserts().len(), 4);
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.recent(1).unwrap()[0].id, id);
    assert_eq!(d.stats().persisted, 1);
}

#[tokio::test]
async fn test_service_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.toml");
    std::fs::write(
        &path,
        "key_strategy = \"global\"\nretry_attempts = 3\nsweep_interval_ms = 50\n",
    )
    .unwrap();
    let config = BridgeConfig::from_file(&path).unwrap();
    assert_eq!(config.retry_attempts, 3);

    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let (service, tx) =
        sensor_bridge::BridgeService::new(&config, Arc::clone(&store)).unwrap();

    // The undecodable line in the middle is rejected without stopping input.
    let input = b"frequency_data 50.0\nhumidity_data 60\nvoltage_data \xff\xfe\n\
temperature_data 22.5\nvoltage_data 3.3\ntimestamp_data 2024-01-01T00:00:00Z\n" as &[u8];
    let feeder = tokio::spawn(sensor_bridge::forward_lines(input, tx));

    let stats = tokio::time::timeout(Duration::from_secs(5), service.run())
        .await
        .unwrap();
    assert_eq!(feeder.await.unwrap().unwrap(), 6);

    assert_eq!(stats.received, 6);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.persisted, 1);

    let rows = store.recent(10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].voltage, 3.3);
    assert_eq!(rows[0].created_at, "2024-01-01T00:00:00Z");
}

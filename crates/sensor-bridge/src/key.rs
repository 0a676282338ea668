// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Correlation key strategies
//!
//! The bus carries no per-reading identifier, so the bridge decides which
//! partial record a field belongs to.
//!
//! - [`GlobalKey`] -- one record assembled at a time, whatever arrives next
//!   joins it.
//! - [`TimeBucketKey`] -- fields are grouped by the wall-clock bucket they
//!   arrive in, so a straggler from the previous cycle cannot land in the
//!   next record.

use crate::field::FieldKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identifier grouping the field updates of one logical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CorrelationKey {
    /// The single "current record" slot.
    Global,
    /// Index of a fixed-width wall-clock bucket.
    Bucket(u64),
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Bucket(idx) => write!(f, "bucket:{}", idx),
        }
    }
}

/// Chooses the correlation key for an incoming field.
pub trait KeyStrategy: Send + Sync {
    fn key_for(&self, kind: FieldKind, received_at: SystemTime) -> CorrelationKey;
}

/// Every field joins the same record.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalKey;

impl KeyStrategy for GlobalKey {
    fn key_for(&self, _kind: FieldKind, _received_at: SystemTime) -> CorrelationKey {
        CorrelationKey::Global
    }
}

/// Fields arriving in the same `width`-long wall-clock window share a key.
#[derive(Debug, Clone, Copy)]
pub struct TimeBucketKey {
    width_ms: u64,
}

impl TimeBucketKey {
    /// A zero width is clamped to one millisecond.
    pub fn new(width: Duration) -> Self {
        let width_ms = u64::try_from(width.as_millis()).unwrap_or(u64::MAX);
        Self {
            width_ms: width_ms.max(1),
        }
    }

    pub fn width(&self) -> Duration {
        Duration::from_millis(self.width_ms)
    }
}

impl KeyStrategy for TimeBucketKey {
    fn key_for(&self, _kind: FieldKind, received_at: SystemTime) -> CorrelationKey {
        let since_epoch = received_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let ms = u64::try_from(since_epoch).unwrap_or(u64::MAX);
        CorrelationKey::Bucket(ms / self.width_ms)
    }
}

/// Key strategy selector used in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategyKind {
    #[default]
    Global,
    TimeBucket,
}

impl KeyStrategyKind {
    /// Build the strategy; `bucket_width` only matters for `TimeBucket`.
    pub fn build(self, bucket_width: Duration) -> Box<dyn KeyStrategy> {
        match self {
            Self::Global => Box::new(GlobalKey),
            Self::TimeBucket => Box::new(TimeBucketKey::new(bucket_width)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_ms(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    #[test]
    fn test_global_key_ignores_time_and_kind() {
        let strategy = GlobalKey;
        assert_eq!(
            strategy.key_for(FieldKind::Voltage, at_ms(1)),
            strategy.key_for(FieldKind::Timestamp, at_ms(999_999))
        );
    }

    #[test]
    fn test_time_bucket_boundaries() {
        let strategy = TimeBucketKey::new(Duration::from_secs(10));

        assert_eq!(
            strategy.key_for(FieldKind::Frequency, at_ms(20_000)),
            CorrelationKey::Bucket(2)
        );
        assert_eq!(
            strategy.key_for(FieldKind::Humidity, at_ms(29_999)),
            CorrelationKey::Bucket(2)
        );
        assert_eq!(
            strategy.key_for(FieldKind::Humidity, at_ms(30_000)),
            CorrelationKey::Bucket(3)
        );
    }

    #[test]
    fn test_zero_width_is_clamped() {
        let strategy = TimeBucketKey::new(Duration::ZERO);
        assert_eq!(strategy.width(), Duration::from_millis(1));
        assert_eq!(
            strategy.key_for(FieldKind::Voltage, at_ms(42)),
            CorrelationKey::Bucket(42)
        );
    }

    #[test]
    fn test_strategy_kind_build() {
        let global = KeyStrategyKind::Global.build(Duration::from_secs(1));
        assert_eq!(
            global.key_for(FieldKind::Voltage, at_ms(5_000)),
            CorrelationKey::Global
        );

        let bucketed = KeyStrategyKind::TimeBucket.build(Duration::from_secs(1));
        assert_eq!(
            bucketed.key_for(FieldKind::Voltage, at_ms(5_000)),
            CorrelationKey::Bucket(5)
        );
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Field decoding
//!
//! Maps a bus topic to the reading it carries and parses the raw payload
//! into a typed value. Numeric readings must be finite decimal literals;
//! the timestamp is passed through as an opaque, producer-defined string.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reasons a payload is rejected before it reaches the correlation buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("payload on {topic} is not a finite number: {payload:?}")]
    NotANumber { topic: String, payload: String },

    #[error("empty timestamp payload")]
    EmptyTimestamp,
}

/// One of the five readings that make up a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Frequency,
    Humidity,
    Temperature,
    Voltage,
    Timestamp,
}

impl FieldKind {
    /// All kinds, in storage column order.
    pub const ALL: [FieldKind; 5] = [
        FieldKind::Frequency,
        FieldKind::Humidity,
        FieldKind::Temperature,
        FieldKind::Voltage,
        FieldKind::Timestamp,
    ];

    /// Topic this kind is published on.
    pub fn topic(self) -> &'static str {
        match self {
            Self::Frequency => "frequency_data",
            Self::Humidity => "humidity_data",
            Self::Temperature => "temperature_data",
            Self::Voltage => "voltage_data",
            Self::Timestamp => "timestamp_data",
        }
    }

    /// Reverse lookup of [`FieldKind::topic`].
    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.topic() == topic)
    }

    /// Returns true for the four readings stored as floating point.
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Timestamp)
    }

    /// Slot index inside a partial record.
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Frequency => "frequency",
            Self::Humidity => "humidity",
            Self::Temperature => "temperature",
            Self::Voltage => "voltage",
            Self::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Decoded reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Numeric(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Numeric(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "{}", v),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Decode a `(topic, payload)` pair from the bus.
///
/// Surrounding ASCII whitespace is ignored for numeric readings, since
/// line-oriented producers commonly append a newline.
pub fn decode(topic: &str, payload: &[u8]) -> Result<(FieldKind, FieldValue), DecodeError> {
    let kind =
        FieldKind::from_topic(topic).ok_or_else(|| DecodeError::UnknownTopic(topic.to_string()))?;

    if kind == FieldKind::Timestamp {
        if payload.is_empty() {
            return Err(DecodeError::EmptyTimestamp);
        }
        let text = String::from_utf8_lossy(payload).into_owned();
        return Ok((kind, FieldValue::Text(text)));
    }

    let not_a_number = || DecodeError::NotANumber {
        topic: topic.to_string(),
        payload: String::from_utf8_lossy(payload).into_owned(),
    };

    let text = std::str::from_utf8(payload).map_err(|_| not_a_number())?;
    let value: f64 = text.trim().parse().map_err(|_| not_a_number())?;
    if !value.is_finite() {
        return Err(not_a_number());
    }

    Ok((kind, FieldValue::Numeric(value)))
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus events and the line-oriented bus adapter.
//!
//! Each line carries one event: `<topic> <payload>`. The first run of
//! whitespace separates the two; everything after it is the payload,
//! byte for byte. Blank lines and lines starting with `#` are ignored.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

/// One `(topic, payload)` event as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

fn skip_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

/// Parse one adapter line. Returns `None` for blank and comment lines.
///
/// The payload is passed on as raw bytes; whether it is valid is for the
/// decoder to judge.
pub fn parse_line(line: &[u8]) -> Option<BusMessage> {
    let mut line = line;
    while let [rest @ .., b'\r' | b'\n'] = line {
        line = rest;
    }

    let line = skip_ascii_whitespace(line);
    if line.is_empty() || line[0] == b'#' {
        return None;
    }

    let (topic, payload) = match line.iter().position(|b| b.is_ascii_whitespace()) {
        Some(split) => (&line[..split], skip_ascii_whitespace(&line[split..])),
        None => (line, &[][..]),
    };

    Some(BusMessage::new(String::from_utf8_lossy(topic), payload))
}

/// Forward every event read from `reader` to `tx`.
///
/// Stops at end of input or when the receiving side is gone. Returns the
/// number of events forwarded. Only I/O failures are errors; malformed
/// lines are forwarded and rejected downstream.
pub async fn forward_lines<R>(reader: R, tx: mpsc::Sender<BusMessage>) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.split(b'\n');
    let mut forwarded = 0u64;

    while let Some(line) = lines.next_segment().await? {
        let Some(message) = parse_line(&line) else {
            continue;
        };
        if tx.send(message).await.is_err() {
            tracing::warn!("bus receiver closed, stopping input");
            break;
        }
        forwarded += 1;
    }

    tracing::debug!(forwarded, "bus input finished");
    Ok(forwarded)
}

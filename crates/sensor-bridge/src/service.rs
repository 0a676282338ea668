// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge service
//!
//! Channel-driven run loop. Bus events are dispatched in arrival order, one
//! at a time; a periodic sweep drops partial records that outlived the
//! staleness window. The loop ends once every sender has been dropped.

use crate::bus::BusMessage;
use crate::config::{BridgeConfig, ConfigError};
use crate::dispatcher::{Dispatcher, DispatcherStatsSnapshot};
use crate::store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

pub struct BridgeService<S: RecordStore> {
    dispatcher: Arc<Dispatcher<S>>,
    rx: mpsc::Receiver<BusMessage>,
    sweep_interval: Duration,
}

impl<S: RecordStore + 'static> BridgeService<S> {
    /// Create a new service.
    ///
    /// Returns the service and a sender for pushing bus events, or the
    /// validation error if `config` is unusable.
    pub fn new(
        config: &BridgeConfig,
        store: Arc<S>,
    ) -> Result<(Self, mpsc::Sender<BusMessage>), ConfigError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.channel_capacity);

        let service = Self {
            dispatcher: Arc::new(Dispatcher::from_config(config, store)),
            rx,
            sweep_interval: config.sweep_interval(),
        };

        Ok((service, tx))
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher<S>> {
        Arc::clone(&self.dispatcher)
    }

    /// Run until all senders are dropped, returning the final counters.
    pub async fn run(mut self) -> DispatcherStatsSnapshot {
        tracing::info!(
            staleness_ms = self.dispatcher.buffer().staleness_window().as_millis() as u64,
            sweep_ms = self.sweep_interval.as_millis() as u64,
            "bridge service started"
        );

        let mut sweep = interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.rx.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    let outcome = self
                        .dispatcher
                        .on_message(&message.topic, &message.payload)
                        .await;
                    tracing::trace!(topic = %message.topic, ?outcome, "dispatched");
                }

                _ = sweep.tick() => {
                    let evicted = self.dispatcher.evict_stale();
                    if !evicted.is_empty() {
                        tracing::debug!(count = evicted.len(), "staleness sweep");
                    }
                }
            }
        }

        let open = self.dispatcher.buffer().len();
        if open > 0 {
            tracing::warn!(open, "input closed with incomplete records buffered");
        }

        let stats = self.dispatcher.stats();
        tracing::info!(
            received = stats.received,
            persisted = stats.persisted,
            rejected = stats.rejected,
            dropped = stats.persist_failures + stats.commit_errors,
            evicted = stats.evicted,
            "bridge service stopped"
        );
        stats
    }
}

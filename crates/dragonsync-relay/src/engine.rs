// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay engine.
//!
//! The engine task is the single owner of the [`TransmitterTracker`]. Feed
//! batches arrive over bounded channels and are applied synchronously; the
//! flush tick runs to completion, including every send, before the next
//! batch is applied. Shutdown is only observed between those steps, so an
//! in-flight send always completes.

use crate::config::RelayConfig;
use crate::feed::UpdateBatch;
use crate::output::OutputSerializer;
use crate::registry::{ApplyOutcome, TransmitterTracker};
use crate::scheduler::FlushScheduler;
use crate::stats::RelayStats;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of one flush tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub failed: usize,
    pub evicted: usize,
}

/// Owner of all transmitter state.
pub struct RelayEngine {
    tracker: TransmitterTracker,
    scheduler: FlushScheduler,
    output: OutputSerializer,
    stats: Arc<RelayStats>,
    flush_interval: Duration,
}

impl RelayEngine {
    /// Create an engine from configuration.
    pub fn new(config: &RelayConfig, output: OutputSerializer, stats: Arc<RelayStats>) -> Self {
        let scheduler = FlushScheduler::new(config.throttle.policies(), config.stale_timeout());
        Self::with_scheduler(scheduler, config.flush_interval(), output, stats)
    }

    /// Create an engine from an explicit scheduler.
    pub fn with_scheduler(
        scheduler: FlushScheduler,
        flush_interval: Duration,
        output: OutputSerializer,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            tracker: TransmitterTracker::new(),
            scheduler,
            output,
            stats,
            flush_interval,
        }
    }

    pub fn tracker(&self) -> &TransmitterTracker {
        &self.tracker
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Apply one batch of updates.
    pub fn ingest(&mut self, batch: UpdateBatch, now: Instant) {
        for update in batch {
            match self.tracker.apply(update, now) {
                ApplyOutcome::Unresolved => {
                    self.stats.updates_unresolved.fetch_add(1, Ordering::Relaxed);
                }
                ApplyOutcome::Created(key) => {
                    debug!("Created record {}", key);
                    self.stats.records_created.fetch_add(1, Ordering::Relaxed);
                    self.stats.updates_applied.fetch_add(1, Ordering::Relaxed);
                }
                ApplyOutcome::Updated(_) => {
                    self.stats.updates_applied.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Run one flush tick at `now`.
    ///
    /// A failed send is counted and logged; the remaining packets are still
    /// attempted and the failed record keeps its throttle clock.
    pub async fn flush(&mut self, now: Instant) -> FlushReport {
        let plan = self.scheduler.tick(&mut self.tracker, now);
        let mut report = FlushReport {
            evicted: plan.eviction.records.len(),
            ..Default::default()
        };
        RelayStats::add(&self.stats.records_evicted, report.evicted as u64);
        RelayStats::add(
            &self.stats.pending_dropped,
            plan.eviction.pending_dropped as u64,
        );

        for packet in plan.packets {
            let (key, kind) = (packet.key.clone(), packet.kind);
            match self.output.send(packet).await {
                Ok(()) => {
                    self.tracker.registry_mut().mark_sent(&key, kind, now);
                    self.stats.record_sent(kind);
                    report.sent += 1;
                }
                Err(e) => {
                    self.stats.record_send_failure();
                    warn!("Failed to send {} for {}: {}", kind, key, e);
                    report.failed += 1;
                }
            }
        }

        if report.sent + report.failed + report.evicted > 0 {
            debug!(
                "Flush: {} sent, {} failed, {} evicted, {} tracked",
                report.sent,
                report.failed,
                report.evicted,
                self.tracker.registry().len()
            );
        }
        report
    }

    /// Drive the engine until shutdown. Returns the engine for inspection.
    pub async fn run(
        mut self,
        mut drone_rx: mpsc::Receiver<UpdateBatch>,
        mut system_rx: mpsc::Receiver<UpdateBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let start = tokio::time::Instant::now() + self.flush_interval;
        let mut ticker = tokio::time::interval_at(start, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut drone_open = true;
        let mut system_open = true;

        info!(
            "Relay engine started (flush every {:?}, stale after {:?})",
            self.flush_interval,
            self.scheduler.stale_timeout()
        );

        if *shutdown.borrow() {
            return self;
        }

        loop {
            tokio::select! {
                batch = drone_rx.recv(), if drone_open => match batch {
                    Some(batch) => self.ingest(batch, now()),
                    None => {
                        debug!("Drone feed channel closed");
                        drone_open = false;
                    }
                },
                batch = system_rx.recv(), if system_open => match batch {
                    Some(batch) => self.ingest(batch, now()),
                    None => {
                        debug!("System feed channel closed");
                        system_open = false;
                    }
                },
                deadline = ticker.tick() => {
                    // Throttle clocks advance by whole periods regardless of wake-up latency.
                    self.flush(deadline.into_std()).await;
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!(
            "Relay engine stopped ({} transmitters tracked)",
            self.tracker.registry().len()
        );
        self
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

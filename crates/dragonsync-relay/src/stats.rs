// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay statistics.

use crate::encoder::PacketKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by the feed listeners and the engine.
#[derive(Debug)]
pub struct RelayStats {
    /// Feed messages received.
    pub bursts_received: AtomicU64,

    /// Feed messages discarded as malformed.
    pub bursts_malformed: AtomicU64,

    /// Updates whose identity could not be resolved yet.
    pub updates_unresolved: AtomicU64,

    /// Updates merged into the registry.
    pub updates_applied: AtomicU64,

    pub records_created: AtomicU64,
    pub records_evicted: AtomicU64,

    /// Buffered registrations dropped unclaimed.
    pub pending_dropped: AtomicU64,

    pub pli_sent: AtomicU64,
    pub geo_sent: AtomicU64,

    /// Emissions that failed on the output link.
    pub send_failures: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self {
            bursts_received: AtomicU64::new(0),
            bursts_malformed: AtomicU64::new(0),
            updates_unresolved: AtomicU64::new(0),
            updates_applied: AtomicU64::new(0),
            records_created: AtomicU64::new(0),
            records_evicted: AtomicU64::new(0),
            pending_dropped: AtomicU64::new(0),
            pli_sent: AtomicU64::new(0),
            geo_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Count one received message and whether it was malformed.
    pub fn record_burst(&self, malformed: bool) {
        self.bursts_received.fetch_add(1, Ordering::Relaxed);
        if malformed {
            self.bursts_malformed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a successful emission.
    pub fn record_sent(&self, kind: PacketKind) {
        let counter = match kind {
            PacketKind::Position => &self.pli_sent,
            PacketKind::Annotation => &self.geo_sent,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            bursts_received: self.bursts_received.load(Ordering::Relaxed),
            bursts_malformed: self.bursts_malformed.load(Ordering::Relaxed),
            updates_unresolved: self.updates_unresolved.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            records_created: self.records_created.load(Ordering::Relaxed),
            records_evicted: self.records_evicted.load(Ordering::Relaxed),
            pending_dropped: self.pending_dropped.load(Ordering::Relaxed),
            pli_sent: self.pli_sent.load(Ordering::Relaxed),
            geo_sent: self.geo_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

/// Snapshot of relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub bursts_received: u64,
    pub bursts_malformed: u64,
    pub updates_unresolved: u64,
    pub updates_applied: u64,
    pub records_created: u64,
    pub records_evicted: u64,
    pub pending_dropped: u64,
    pub pli_sent: u64,
    pub geo_sent: u64,
    pub send_failures: u64,
    pub uptime_secs: u64,
}

impl RelayStatsSnapshot {
    /// Records currently tracked, derived from create/evict counts.
    pub fn records_active(&self) -> u64 {
        self.records_created.saturating_sub(self.records_evicted)
    }

    /// Packets sent per second since start.
    pub fn packets_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            (self.pli_sent + self.geo_sent) as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_stats() {
        let stats = RelayStats::new();
        stats.record_burst(false);
        stats.record_burst(true);
        stats.record_sent(PacketKind::Position);
        stats.record_sent(PacketKind::Position);
        stats.record_sent(PacketKind::Annotation);
        stats.record_send_failure();
        RelayStats::add(&stats.records_created, 3);
        RelayStats::add(&stats.records_evicted, 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bursts_received, 2);
        assert_eq!(snapshot.bursts_malformed, 1);
        assert_eq!(snapshot.pli_sent, 2);
        assert_eq!(snapshot.geo_sent, 1);
        assert_eq!(snapshot.send_failures, 1);
        assert_eq!(snapshot.records_active(), 2);
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Flush scheduler.
//!
//! On every tick: evict stale records, then check each remaining record
//! against two independent throttle policies and collect the packets that
//! are due. The scheduler never touches the output link; the caller sends
//! the planned packets and reports successes back through
//! [`TransmitterRegistry::mark_sent`](crate::registry::TransmitterRegistry::mark_sent),
//! so a failed send leaves the throttle clock untouched.

use crate::encoder::{EncodedPacket, PacketEncoder, PacketKind};
use crate::registry::{Eviction, TransmitterRecord, TransmitterTracker};
use crate::update::TransmitterKind;
use std::time::{Duration, Instant};

/// Throttle policy for one transmitter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Minimum spacing between position packets.
    pub pli_interval: Duration,
    /// Minimum spacing between annotation packets.
    pub geo_interval: Duration,
    /// Whether this kind emits annotations at all.
    pub annotate: bool,
}

impl ThrottlePolicy {
    pub fn new(pli_interval: Duration, geo_interval: Duration, annotate: bool) -> Self {
        Self {
            pli_interval,
            geo_interval,
            annotate,
        }
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10), false)
    }
}

/// Throttle policies for every kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicies {
    pub drone: ThrottlePolicy,
    pub pilot: ThrottlePolicy,
    pub home: ThrottlePolicy,
    pub system: ThrottlePolicy,
}

impl Default for ThrottlePolicies {
    fn default() -> Self {
        let annotated = ThrottlePolicy {
            annotate: true,
            ..ThrottlePolicy::default()
        };
        Self {
            drone: ThrottlePolicy::default(),
            pilot: annotated,
            home: annotated,
            system: annotated,
        }
    }
}

impl ThrottlePolicies {
    /// Policy for `kind`.
    pub fn for_kind(&self, kind: TransmitterKind) -> &ThrottlePolicy {
        match kind {
            TransmitterKind::Drone => &self.drone,
            TransmitterKind::Pilot => &self.pilot,
            TransmitterKind::Home => &self.home,
            TransmitterKind::System => &self.system,
        }
    }

    /// Systems always annotate, drones never.
    pub fn annotates(&self, kind: TransmitterKind) -> bool {
        match kind {
            TransmitterKind::System => true,
            TransmitterKind::Drone => false,
            TransmitterKind::Pilot | TransmitterKind::Home => self.for_kind(kind).annotate,
        }
    }
}

/// Output of one tick: what was evicted and what is due.
#[derive(Debug, Default)]
pub struct FlushPlan {
    pub eviction: Eviction,
    /// Due packets, in ascending key order; position before annotation.
    pub packets: Vec<EncodedPacket>,
}

/// Periodic flush decision logic.
#[derive(Debug, Clone)]
pub struct FlushScheduler {
    policies: ThrottlePolicies,
    stale_timeout: Duration,
    encoder: PacketEncoder,
}

impl FlushScheduler {
    pub fn new(policies: ThrottlePolicies, stale_timeout: Duration) -> Self {
        Self {
            policies,
            stale_timeout,
            encoder: PacketEncoder::new(),
        }
    }

    pub fn policies(&self) -> &ThrottlePolicies {
        &self.policies
    }

    pub fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }

    /// Run one tick at `now`.
    pub fn tick(&self, tracker: &mut TransmitterTracker, now: Instant) -> FlushPlan {
        let eviction = tracker.evict_stale(now, self.stale_timeout);
        let packets = tracker
            .registry()
            .snapshot()
            .iter()
            .flat_map(|record| self.due_packets(record, now))
            .collect();
        FlushPlan { eviction, packets }
    }

    /// Packet kinds `record` is due for at `now`.
    pub fn due(&self, record: &TransmitterRecord, now: Instant) -> Vec<PacketKind> {
        let policy = self.policies.for_kind(record.kind);
        let mut kinds = Vec::with_capacity(2);
        if record.position.is_some() && elapsed(record.last_pli_sent, now, policy.pli_interval) {
            kinds.push(PacketKind::Position);
        }
        if self.policies.annotates(record.kind)
            && elapsed(record.last_geo_sent, now, policy.geo_interval)
        {
            kinds.push(PacketKind::Annotation);
        }
        kinds
    }

    fn due_packets(&self, record: &TransmitterRecord, now: Instant) -> Vec<EncodedPacket> {
        self.due(record, now)
            .into_iter()
            .filter_map(|kind| self.encoder.encode(record, kind))
            .collect()
    }
}

fn elapsed(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        None => true,
        Some(sent) => now.saturating_duration_since(sent) >= interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{IdentityKeys, Position, SystemTelemetry, TransmitterUpdate};
    use chrono::Utc;

    fn system_update() -> TransmitterUpdate {
        TransmitterUpdate::new(
            TransmitterKind::System,
            IdentityKeys::system("station-01"),
            Utc::now(),
        )
        .with_position(Some(Position::new(45.0, -122.0)))
        .with_telemetry(SystemTelemetry {
            cpu_usage: Some(10.0),
            ..Default::default()
        })
    }

    fn deliver(tracker: &mut TransmitterTracker, plan: &FlushPlan, now: Instant) {
        for packet in &plan.packets {
            tracker.registry_mut().mark_sent(&packet.key, packet.kind, now);
        }
    }

    #[test]
    fn test_independent_throttling() {
        let mut policies = ThrottlePolicies::default();
        policies.system = ThrottlePolicy::new(Duration::from_secs(1), Duration::from_secs(5), true);
        let scheduler = FlushScheduler::new(policies, Duration::from_secs(60));
        let mut tracker = TransmitterTracker::new();

        let t0 = Instant::now();
        let mut pli = 0;
        let mut geo = 0;
        // Update every 200 ms, tick every second, for ten seconds.
        for step in 1..=50u64 {
            let now = t0 + Duration::from_millis(step * 200);
            tracker.apply(system_update(), now);
            if step % 5 == 0 {
                let plan = scheduler.tick(&mut tracker, now);
                pli += plan.packets.iter().filter(|p| p.kind == PacketKind::Position).count();
                geo += plan.packets.iter().filter(|p| p.kind == PacketKind::Annotation).count();
                deliver(&mut tracker, &plan, now);
            }
        }
        assert_eq!(pli, 10);
        assert_eq!(geo, 2);
    }

    #[test]
    fn test_failed_send_does_not_reset_clock() {
        let scheduler = FlushScheduler::new(ThrottlePolicies::default(), Duration::from_secs(60));
        let mut tracker = TransmitterTracker::new();
        let t0 = Instant::now();
        tracker.apply(system_update(), t0);

        let plan = scheduler.tick(&mut tracker, t0 + Duration::from_millis(100));
        assert_eq!(plan.packets.len(), 2);

        // Nothing delivered: everything is due again on the next tick.
        let plan = scheduler.tick(&mut tracker, t0 + Duration::from_millis(200));
        assert_eq!(plan.packets.len(), 2);
    }

    #[test]
    fn test_annotation_eligibility() {
        let mut policies = ThrottlePolicies::default();
        policies.drone.annotate = true;
        policies.pilot.annotate = false;
        policies.system.annotate = false;
        assert!(!policies.annotates(TransmitterKind::Drone));
        assert!(!policies.annotates(TransmitterKind::Pilot));
        assert!(policies.annotates(TransmitterKind::Home));
        assert!(policies.annotates(TransmitterKind::System));
    }

    #[test]
    fn test_record_without_position() {
        let scheduler = FlushScheduler::new(ThrottlePolicies::default(), Duration::from_secs(60));
        let mut tracker = TransmitterTracker::new();
        let now = Instant::now();
        tracker.apply(
            TransmitterUpdate::new(TransmitterKind::System, IdentityKeys::system("abcd"), Utc::now()),
            now,
        );
        let record = tracker.registry().get("wardragon-abcd").expect("record");
        assert_eq!(scheduler.due(record, now), vec![PacketKind::Annotation]);
    }

    #[test]
    fn test_tick_evicts_before_planning() {
        let scheduler = FlushScheduler::new(ThrottlePolicies::default(), Duration::from_secs(60));
        let mut tracker = TransmitterTracker::new();
        let t0 = Instant::now();
        tracker.apply(system_update(), t0);

        let plan = scheduler.tick(&mut tracker, t0 + Duration::from_secs(61));
        assert_eq!(plan.eviction.records.len(), 1);
        assert!(plan.packets.is_empty());
    }
}

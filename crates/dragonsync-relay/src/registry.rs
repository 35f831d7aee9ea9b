// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transmitter registry.
//!
//! One [`TransmitterRecord`] per resolved transmitter, keyed by shortened
//! callsign. The registry is owned by exactly one task (the relay engine);
//! [`TransmitterTracker`] pairs it with the identity resolver so that
//! resolution and upsert form a single mutation point.

use crate::encoder::PacketKind;
use crate::identity::{IdentityResolver, ResolvedUpdate};
use crate::update::{
    IdentityKeys, Motion, Position, SystemTelemetry, TransmitterKind, TransmitterUpdate,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Latest merged state of one transmitter.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmitterRecord {
    /// Registry key (shortened callsign).
    pub key: String,
    /// Full callsign.
    pub callsign: String,
    pub kind: TransmitterKind,
    pub identity: IdentityKeys,
    pub position: Option<Position>,
    pub motion: Motion,
    pub rssi: Option<f64>,
    pub remarks: Vec<String>,
    pub telemetry: SystemTelemetry,
    /// Wall-clock time of the latest merged update.
    pub updated_at: DateTime<Utc>,
    pub last_seen: Instant,
    /// `None` until the first position packet is sent.
    pub last_pli_sent: Option<Instant>,
    /// `None` until the first annotation packet is sent.
    pub last_geo_sent: Option<Instant>,
}

impl TransmitterRecord {
    /// Create a record from its first resolved update.
    pub fn new(resolved: ResolvedUpdate, now: Instant) -> Self {
        let ResolvedUpdate {
            key,
            callsign,
            update,
        } = resolved;
        let mut record = Self {
            key,
            callsign,
            kind: update.kind,
            identity: IdentityKeys::default(),
            position: None,
            motion: Motion::default(),
            rssi: None,
            remarks: Vec::new(),
            telemetry: SystemTelemetry::default(),
            updated_at: update.observed_at,
            last_seen: now,
            last_pli_sent: None,
            last_geo_sent: None,
        };
        record.merge(update, now);
        record
    }

    /// Merge an update. Fields the update does not carry keep their value.
    pub fn merge(&mut self, update: TransmitterUpdate, now: Instant) {
        let id = update.identity;
        merge_opt(&mut self.identity.mac, id.mac);
        merge_opt(&mut self.identity.serial, id.serial);
        merge_opt(&mut self.identity.registration, id.registration);

        if let Some(position) = update.position {
            let altitude = position
                .altitude
                .or(self.position.and_then(|p| p.altitude));
            self.position = Some(position.with_altitude(altitude));
        }

        merge_opt(&mut self.motion.speed, update.motion.speed);
        merge_opt(&mut self.motion.vertical_speed, update.motion.vertical_speed);
        merge_opt(&mut self.motion.course, update.motion.course);
        merge_opt(&mut self.motion.height_agl, update.motion.height_agl);
        merge_opt(&mut self.rssi, update.rssi);

        if !update.remarks.is_empty() {
            self.remarks = update.remarks;
        }

        if let Some(t) = update.telemetry {
            merge_opt(&mut self.telemetry.cpu_usage, t.cpu_usage);
            merge_opt(&mut self.telemetry.memory_percent, t.memory_percent);
            merge_opt(&mut self.telemetry.temperature, t.temperature);
            merge_opt(&mut self.telemetry.uptime_secs, t.uptime_secs);
            merge_opt(&mut self.telemetry.pluto_temp, t.pluto_temp);
            merge_opt(&mut self.telemetry.zynq_temp, t.zynq_temp);
        }

        self.updated_at = self.updated_at.max(update.observed_at);
        self.touch(now);
    }

    /// Refresh the last-seen timestamp.
    pub fn touch(&mut self, now: Instant) {
        self.last_seen = self.last_seen.max(now);
    }

    /// True when silent for longer than `timeout`.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    /// Last time a packet of `kind` was sent for this record.
    pub fn last_sent(&self, kind: PacketKind) -> Option<Instant> {
        match kind {
            PacketKind::Position => self.last_pli_sent,
            PacketKind::Annotation => self.last_geo_sent,
        }
    }

    /// Remarks fragments joined for display.
    pub fn remarks_text(&self) -> Option<String> {
        (!self.remarks.is_empty()).then(|| self.remarks.join("; "))
    }
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Registry of active transmitters, ordered by key.
#[derive(Debug, Default)]
pub struct TransmitterRegistry {
    records: BTreeMap<String, TransmitterRecord>,
}

impl TransmitterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge a resolved update. Returns `true` when a record was created.
    pub fn upsert(&mut self, resolved: ResolvedUpdate, now: Instant) -> bool {
        if let Some(record) = self.records.get_mut(&resolved.key) {
            let incoming = resolved.update.identity.serial.as_deref();
            if let (Some(stored), Some(incoming)) = (record.identity.serial.as_deref(), incoming) {
                if stored != incoming {
                    tracing::warn!(
                        "Key {} shared by serials {} and {}; now reporting as {}",
                        record.key,
                        stored,
                        incoming,
                        resolved.callsign
                    );
                    record.callsign = resolved.callsign;
                }
            }
            record.merge(resolved.update, now);
            return false;
        }
        let record = TransmitterRecord::new(resolved, now);
        tracing::info!("Tracking {} ({})", record.key, record.kind);
        self.records.insert(record.key.clone(), record);
        true
    }

    /// Copy of every record, in ascending key order.
    pub fn snapshot(&self) -> Vec<TransmitterRecord> {
        self.records.values().cloned().collect()
    }

    /// Remove and return records silent for longer than `timeout`.
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> Vec<TransmitterRecord> {
        let stale: Vec<String> = self
            .records
            .values()
            .filter(|r| r.is_stale(now, timeout))
            .map(|r| r.key.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|key| self.records.remove(&key))
            .inspect(|r| tracing::info!("Evicting stale {} ({})", r.key, r.kind))
            .collect()
    }

    /// Record a successful emission of `kind` for `key`.
    pub fn mark_sent(&mut self, key: &str, kind: PacketKind, now: Instant) {
        if let Some(record) = self.records.get_mut(key) {
            match kind {
                PacketKind::Position => record.last_pli_sent = Some(now),
                PacketKind::Annotation => record.last_geo_sent = Some(now),
            }
        }
    }

    /// Look up a record.
    pub fn get(&self, key: &str) -> Option<&TransmitterRecord> {
        self.records.get(key)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Result of applying one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Identity not resolvable yet; registry untouched.
    Unresolved,
    /// A new record was created under this key.
    Created(String),
    /// An existing record was merged.
    Updated(String),
}

/// Records and pending identities dropped by one sweep.
#[derive(Debug, Default)]
pub struct Eviction {
    pub records: Vec<TransmitterRecord>,
    pub pending_dropped: usize,
}

/// Identity resolver and registry behind one mutation point.
#[derive(Debug, Default)]
pub struct TransmitterTracker {
    resolver: IdentityResolver,
    registry: TransmitterRegistry,
}

impl TransmitterTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and upsert one update.
    pub fn apply(&mut self, update: TransmitterUpdate, now: Instant) -> ApplyOutcome {
        match self.resolver.resolve(update, now) {
            None => ApplyOutcome::Unresolved,
            Some(resolved) => {
                let key = resolved.key.clone();
                if self.registry.upsert(resolved, now) {
                    ApplyOutcome::Created(key)
                } else {
                    ApplyOutcome::Updated(key)
                }
            }
        }
    }

    /// Evict stale records and sweep stale pending identities.
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> Eviction {
        Eviction {
            records: self.registry.evict_stale(now, timeout),
            pending_dropped: self.resolver.sweep(now, timeout),
        }
    }

    pub fn registry(&self) -> &TransmitterRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TransmitterRegistry {
        &mut self.registry
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(serial: &str) -> TransmitterUpdate {
        TransmitterUpdate::new(
            TransmitterKind::Drone,
            IdentityKeys::new(Some("aa:bb".into()), Some(serial.into()), None),
            Utc::now(),
        )
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut tracker = TransmitterTracker::new();
        let now = Instant::now();

        let first = update("SN-9")
            .with_position(Some(Position::new(1.0, 2.0).with_altitude(Some(50.0))))
            .with_rssi(Some(-70.0))
            .with_remark("first");
        assert_eq!(
            tracker.apply(first, now),
            ApplyOutcome::Created("drone-SN-9".into())
        );

        let second = update("SN-9").with_position(Some(Position::new(1.5, 2.5)));
        assert_eq!(
            tracker.apply(second, now),
            ApplyOutcome::Updated("drone-SN-9".into())
        );

        let record = tracker.registry().get("drone-SN-9").expect("record");
        assert_eq!(record.rssi, Some(-70.0));
        assert_eq!(record.remarks, vec!["first".to_string()]);
        let position = record.position.expect("position");
        assert_eq!((position.latitude, position.longitude), (1.5, 2.5));
        assert_eq!(position.altitude, Some(50.0));
    }

    #[test]
    fn test_merge_idempotence() {
        let now = Instant::now();
        let u = update("SN-1")
            .with_position(Some(Position::new(3.0, 4.0)))
            .with_rssi(Some(-55.0))
            .with_remark("hover");

        let mut once = TransmitterTracker::new();
        once.apply(u.clone(), now);

        let mut twice = TransmitterTracker::new();
        twice.apply(u.clone(), now);
        twice.apply(u, now);

        assert_eq!(once.registry().snapshot(), twice.registry().snapshot());
        assert_eq!(twice.registry().len(), 1);
    }

    #[test]
    fn test_snapshot_is_key_ordered() {
        let mut tracker = TransmitterTracker::new();
        let now = Instant::now();
        for serial in ["ZZ-3", "AA-1", "MM-2"] {
            let u = TransmitterUpdate::new(
                TransmitterKind::Drone,
                IdentityKeys::new(None, Some(serial.into()), None),
                Utc::now(),
            );
            tracker.apply(u, now);
        }
        let keys: Vec<String> = tracker
            .registry()
            .snapshot()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["drone-AA-1", "drone-MM-2", "drone-ZZ-3"]);
    }

    #[test]
    fn test_evict_stale() {
        let mut tracker = TransmitterTracker::new();
        let t0 = Instant::now();
        let timeout = Duration::from_secs(60);
        tracker.apply(update("SN-9"), t0);

        let eviction = tracker.evict_stale(t0 + Duration::from_secs(60), timeout);
        assert!(eviction.records.is_empty());
        assert_eq!(tracker.registry().len(), 1);

        let eviction = tracker.evict_stale(t0 + Duration::from_secs(61), timeout);
        assert_eq!(eviction.records.len(), 1);
        assert_eq!(eviction.records[0].key, "drone-SN-9");
        assert!(tracker.registry().is_empty());
    }

    #[test]
    fn test_mark_sent() {
        let mut tracker = TransmitterTracker::new();
        let now = Instant::now();
        tracker.apply(update("SN-9"), now);
        let record = tracker.registry().get("drone-SN-9").expect("record");
        assert_eq!(record.last_sent(PacketKind::Position), None);

        tracker
            .registry_mut()
            .mark_sent("drone-SN-9", PacketKind::Position, now);
        let record = tracker.registry().get("drone-SN-9").expect("record");
        assert_eq!(record.last_pli_sent, Some(now));
        assert_eq!(record.last_geo_sent, None);
    }

    #[test]
    fn test_key_collision_keeps_callsign_and_serial_consistent() {
        let mut tracker = TransmitterTracker::new();
        let now = Instant::now();
        let drone = |serial: &str| {
            TransmitterUpdate::new(
                TransmitterKind::Drone,
                IdentityKeys::new(None, Some(serial.into()), None),
                Utc::now(),
            )
        };

        tracker.apply(drone("1581F5FKD229400"), now);
        assert_eq!(
            tracker.apply(drone("1581F5FKA119400"), now),
            ApplyOutcome::Updated("drone-9400".into())
        );

        let record = tracker.registry().get("drone-9400").expect("record");
        assert_eq!(record.identity.serial.as_deref(), Some("1581F5FKA119400"));
        assert_eq!(record.callsign, "drone-1581F5FKA119400");
    }

    #[test]
    fn test_unresolved_does_not_touch_registry() {
        let mut tracker = TransmitterTracker::new();
        let u = TransmitterUpdate::new(
            TransmitterKind::Drone,
            IdentityKeys::new(Some("aa:bb".into()), None, Some("CAA-123".into())),
            Utc::now(),
        );
        assert_eq!(tracker.apply(u, Instant::now()), ApplyOutcome::Unresolved);
        assert!(tracker.registry().is_empty());
        assert_eq!(tracker.resolver().pending_count(), 1);
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed updates produced by the burst classifier.
//!
//! A [`TransmitterUpdate`] is built once per parsed burst and handed by value
//! to the identity resolver; nothing downstream mutates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of physical transmitter a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransmitterKind {
    /// Remote-ID broadcasting aircraft.
    Drone,
    /// Operator position reported by a drone.
    Pilot,
    /// Take-off (home) position reported by a drone.
    Home,
    /// Sensor station reporting its own status.
    System,
}

impl TransmitterKind {
    /// All kinds, in display order.
    pub const ALL: [TransmitterKind; 4] = [Self::Drone, Self::Pilot, Self::Home, Self::System];

    /// Lowercase name used in logs and configuration tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drone => "drone",
            Self::Pilot => "pilot",
            Self::Home => "home",
            Self::System => "system",
        }
    }

    /// Prefix of the full callsign for this kind.
    pub fn callsign_prefix(&self) -> &'static str {
        match self {
            Self::Drone => "drone-",
            Self::Pilot => "pilot-",
            Self::Home => "home-",
            Self::System => "wardragon-",
        }
    }
}

impl fmt::Display for TransmitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity keys carried by a burst. Any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityKeys {
    /// Ephemeral hardware (MAC) address, normalized to lowercase.
    pub mac: Option<String>,
    /// Permanent serial number (or system identifier).
    pub serial: Option<String>,
    /// CAA-assigned registration code.
    pub registration: Option<String>,
}

impl IdentityKeys {
    /// Build identity keys, dropping blank values.
    pub fn new(mac: Option<String>, serial: Option<String>, registration: Option<String>) -> Self {
        Self {
            mac: non_blank(mac).map(|m| m.to_ascii_lowercase()),
            serial: non_blank(serial),
            registration: non_blank(registration),
        }
    }

    /// Identity for a system station.
    pub fn system(id: impl Into<String>) -> Self {
        Self::new(None, Some(id.into()), None)
    }

    /// True when no key at all is present.
    pub fn is_empty(&self) -> bool {
        self.mac.is_none() && self.serial.is_none() && self.registration.is_none()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A geodetic position fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude above the ellipsoid, metres.
    pub altitude: Option<f64>,
}

impl Position {
    /// Create a position without altitude.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
        }
    }

    /// Set altitude.
    pub fn with_altitude(mut self, altitude: Option<f64>) -> Self {
        self.altitude = altitude.filter(|a| a.is_finite());
        self
    }

    /// Position from a raw fix. `(0, 0)` and out-of-range values mean "no fix".
    pub fn from_fix(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        let (lat, lon) = (latitude?, longitude?);
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if lat == 0.0 && lon == 0.0 {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Self::new(lat, lon))
    }
}

/// Velocity and height fields reported alongside a position.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Motion {
    /// Ground speed, m/s.
    pub speed: Option<f64>,
    /// Vertical speed, m/s.
    pub vertical_speed: Option<f64>,
    /// Course over ground, degrees.
    pub course: Option<f64>,
    /// Height above ground level, metres.
    pub height_agl: Option<f64>,
}

impl Motion {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.speed.is_none()
            && self.vertical_speed.is_none()
            && self.course.is_none()
            && self.height_agl.is_none()
    }
}

/// Status metrics reported by a sensor station.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemTelemetry {
    /// CPU load, percent.
    pub cpu_usage: Option<f64>,
    /// Memory in use, percent.
    pub memory_percent: Option<f64>,
    /// Board temperature, degrees Celsius.
    pub temperature: Option<f64>,
    /// Uptime, seconds.
    pub uptime_secs: Option<f64>,
    /// AD936X (Pluto) transceiver temperature.
    pub pluto_temp: Option<f64>,
    /// Zynq SoC temperature.
    pub zynq_temp: Option<f64>,
}

impl SystemTelemetry {
    /// True when no metric is set.
    pub fn is_empty(&self) -> bool {
        self.cpu_usage.is_none()
            && self.memory_percent.is_none()
            && self.temperature.is_none()
            && self.uptime_secs.is_none()
            && self.pluto_temp.is_none()
            && self.zynq_temp.is_none()
    }
}

/// One classified update for one transmitter.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmitterUpdate {
    pub kind: TransmitterKind,
    pub identity: IdentityKeys,
    pub position: Option<Position>,
    pub motion: Motion,
    /// Received signal strength, dBm.
    pub rssi: Option<f64>,
    /// Free-form remarks fragments, in arrival order.
    pub remarks: Vec<String>,
    pub telemetry: Option<SystemTelemetry>,
    /// Wall-clock time the burst was observed.
    pub observed_at: DateTime<Utc>,
}

impl TransmitterUpdate {
    /// Create an update carrying only identity.
    pub fn new(kind: TransmitterKind, identity: IdentityKeys, observed_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            identity,
            position: None,
            motion: Motion::default(),
            rssi: None,
            remarks: Vec::new(),
            telemetry: None,
            observed_at,
        }
    }

    /// Set position.
    pub fn with_position(mut self, position: Option<Position>) -> Self {
        self.position = position;
        self
    }

    /// Set motion fields.
    pub fn with_motion(mut self, motion: Motion) -> Self {
        self.motion = motion;
        self
    }

    /// Set signal strength.
    pub fn with_rssi(mut self, rssi: Option<f64>) -> Self {
        self.rssi = rssi.filter(|r| r.is_finite());
        self
    }

    /// Append a remarks fragment. Blank fragments are ignored.
    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        let remark = remark.into();
        let remark = remark.trim();
        if !remark.is_empty() && !self.remarks.iter().any(|r| r == remark) {
            self.remarks.push(remark.to_string());
        }
        self
    }

    /// Set station telemetry. Empty telemetry is dropped.
    pub fn with_telemetry(mut self, telemetry: SystemTelemetry) -> Self {
        self.telemetry = (!telemetry.is_empty()).then_some(telemetry);
        self
    }

    /// Remarks fragments joined for display.
    pub fn remarks_text(&self) -> Option<String> {
        (!self.remarks.is_empty()).then(|| self.remarks.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_keys_normalize() {
        let keys = IdentityKeys::new(
            Some(" AA:BB:CC:DD:EE:FF ".into()),
            Some("  ".into()),
            Some("CAA-123".into()),
        );
        assert_eq!(keys.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(keys.serial, None);
        assert_eq!(keys.registration.as_deref(), Some("CAA-123"));
        assert!(!keys.is_empty());
        assert!(IdentityKeys::default().is_empty());
    }

    #[test]
    fn test_position_from_fix_rejects_null_island() {
        assert_eq!(Position::from_fix(Some(0.0), Some(0.0)), None);
        assert_eq!(Position::from_fix(Some(1.0), None), None);
        assert_eq!(Position::from_fix(Some(91.0), Some(2.0)), None);
        assert_eq!(
            Position::from_fix(Some(1.0), Some(2.0)),
            Some(Position::new(1.0, 2.0))
        );
    }

    #[test]
    fn test_update_builder() {
        let update = TransmitterUpdate::new(
            TransmitterKind::Drone,
            IdentityKeys::new(None, Some("SN-9".into()), None),
            Utc::now(),
        )
        .with_rssi(Some(-61.0))
        .with_remark("survey flight")
        .with_remark("survey flight")
        .with_remark(" ")
        .with_telemetry(SystemTelemetry::default());

        assert_eq!(update.rssi, Some(-61.0));
        assert_eq!(update.remarks, vec!["survey flight".to_string()]);
        assert_eq!(update.telemetry, None);
        assert_eq!(update.remarks_text().as_deref(), Some("survey flight"));
    }

    #[test]
    fn test_kind_prefixes() {
        assert_eq!(TransmitterKind::System.callsign_prefix(), "wardragon-");
        assert_eq!(TransmitterKind::Pilot.to_string(), "pilot");
    }
}

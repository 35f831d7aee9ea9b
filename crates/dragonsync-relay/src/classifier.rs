// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Burst classifier.
//!
//! Turns one raw feed message into zero or more [`TransmitterUpdate`]s. Raw
//! JSON is validated once here into typed bursts ([`Burst`]); nothing
//! downstream ever sees untyped data.
//!
//! Two feed shapes are recognized by structure, not by which socket they
//! arrived on:
//!
//! - **Drone bursts**: Remote-ID decoder output, either block-keyed
//!   (`"Basic ID"`, `"Location/Vector Message"`, ...) or a flat record.
//! - **System bursts**: sensor station status (`serial_number`,
//!   `system_stats`, `gps_data`, `ant_sdr_temps`).

use crate::update::{
    IdentityKeys, Motion, Position, SystemTelemetry, TransmitterKind, TransmitterUpdate,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

/// Declared identity type of a serial-number Basic ID block.
pub const ID_TYPE_SERIAL: &str = "Serial Number (ANSI/CTA-2063-A)";

/// Declared identity type of a registration-code Basic ID block.
pub const ID_TYPE_CAA: &str = "CAA Assigned Registration ID";

const BLOCK_BASIC_ID: &str = "Basic ID";
const BLOCK_LOCATION: &str = "Location/Vector Message";
const BLOCK_SELF_ID: &str = "Self-ID Message";
const BLOCK_SYSTEM: &str = "System Message";
const BLOCK_OPERATOR_ID: &str = "Operator ID Message";

const BLOCK_KEYS: [&str; 5] = [
    BLOCK_BASIC_ID,
    BLOCK_LOCATION,
    BLOCK_SELF_ID,
    BLOCK_SYSTEM,
    BLOCK_OPERATOR_ID,
];

const SYSTEM_MARKERS: [&str; 3] = ["system_stats", "gps_data", "ant_sdr_temps"];

/// Classification errors. Never surfaced past [`BurstClassifier::classify`].
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object or array of objects")]
    NotAnObject,

    #[error("drone burst carries no hardware address, serial or registration code")]
    MissingIdentity,

    #[error("missing mandatory field: {0}")]
    MissingField(&'static str),

    #[error("message carries no recognizable burst")]
    UnrecognizedBurst,
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct BasicIdBlock {
    #[serde(default)]
    id_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(default, rename = "MAC", alias = "mac")]
    mac: Option<String>,
    #[serde(default, rename = "RSSI", alias = "rssi", deserialize_with = "lenient_f64")]
    rssi: Option<f64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LocationBlock {
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    #[serde(default, alias = "alt", deserialize_with = "lenient_f64")]
    geodetic_altitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    height_agl: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    vert_speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    direction: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SelfIdBlock {
    #[serde(default, alias = "description")]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemMessageBlock {
    #[serde(default, alias = "operator_lat", deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, alias = "operator_lon", deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    home_lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    home_lon: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OperatorIdBlock {
    #[serde(default, deserialize_with = "lenient_string")]
    operator_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FlatDroneRecord {
    #[serde(default, alias = "hwAddr", alias = "hw_addr", alias = "MAC")]
    mac: Option<String>,
    #[serde(default, alias = "id", deserialize_with = "lenient_string")]
    serial: Option<String>,
    #[serde(default, alias = "regCode", alias = "reg_code", alias = "caa")]
    registration: Option<String>,
    #[serde(default, alias = "lat", deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, alias = "lon", deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    #[serde(default, alias = "alt", deserialize_with = "lenient_f64")]
    altitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    speed: Option<f64>,
    #[serde(default, alias = "direction", deserialize_with = "lenient_f64")]
    course: Option<f64>,
    #[serde(default, alias = "RSSI", deserialize_with = "lenient_f64")]
    rssi: Option<f64>,
    #[serde(default, alias = "description")]
    remarks: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pilot_lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pilot_lon: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    home_lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    home_lon: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct GpsData {
    #[serde(default, deserialize_with = "lenient_f64")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    longitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    altitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    track: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryStats {
    #[serde(default, deserialize_with = "lenient_f64")]
    percent: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemStats {
    #[serde(default, deserialize_with = "lenient_f64")]
    cpu_usage: Option<f64>,
    #[serde(default)]
    memory: Option<MemoryStats>,
    #[serde(default, deserialize_with = "lenient_f64")]
    temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    uptime: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct AntSdrTemps {
    #[serde(default, deserialize_with = "lenient_f64")]
    pluto_temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    zynq_temp: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemStatusRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    serial_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    timestamp: Option<f64>,
    #[serde(default)]
    gps_data: Option<GpsData>,
    #[serde(default)]
    system_stats: Option<SystemStats>,
    #[serde(default)]
    ant_sdr_temps: Option<AntSdrTemps>,
    #[serde(default)]
    remarks: Option<String>,
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s
            .trim()
            .trim_end_matches(|c: char| c == '%' || c == 'C' || c == '°')
            .trim()
            .parse::<f64>()
            .ok(),
        _ => None,
    };
    Ok(parsed.filter(|v| v.is_finite()))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ============================================================================
// Typed bursts
// ============================================================================

/// A validated drone burst.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DroneBurst {
    pub identity: IdentityKeys,
    pub position: Option<Position>,
    pub motion: Motion,
    pub rssi: Option<f64>,
    pub remarks: Vec<String>,
    pub pilot: Option<Position>,
    pub home: Option<Position>,
}

/// A validated system status burst.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemBurst {
    pub system_id: String,
    pub position: Option<Position>,
    pub motion: Motion,
    pub telemetry: SystemTelemetry,
    pub remarks: Option<String>,
    pub reported_at: Option<DateTime<Utc>>,
}

/// One validated burst.
#[derive(Debug, Clone, PartialEq)]
pub enum Burst {
    Drone(DroneBurst),
    System(SystemBurst),
}

impl Burst {
    /// Expand the burst into per-transmitter updates.
    ///
    /// A drone burst yields its drone update first, followed by pilot and
    /// home updates keyed off the same identity.
    pub fn into_updates(self, received_at: DateTime<Utc>) -> Vec<TransmitterUpdate> {
        match self {
            Burst::Drone(drone) => {
                let mut updates = Vec::with_capacity(3);
                let mut update =
                    TransmitterUpdate::new(TransmitterKind::Drone, drone.identity.clone(), received_at)
                        .with_position(drone.position)
                        .with_motion(drone.motion)
                        .with_rssi(drone.rssi);
                for remark in &drone.remarks {
                    update = update.with_remark(remark.as_str());
                }
                updates.push(update);

                if let Some(pilot) = drone.pilot {
                    updates.push(
                        TransmitterUpdate::new(
                            TransmitterKind::Pilot,
                            drone.identity.clone(),
                            received_at,
                        )
                        .with_position(Some(pilot)),
                    );
                }
                if let Some(home) = drone.home {
                    updates.push(
                        TransmitterUpdate::new(TransmitterKind::Home, drone.identity, received_at)
                            .with_position(Some(home)),
                    );
                }
                updates
            }
            Burst::System(system) => {
                let observed_at = system.reported_at.unwrap_or(received_at);
                let mut update = TransmitterUpdate::new(
                    TransmitterKind::System,
                    IdentityKeys::system(system.system_id),
                    observed_at,
                )
                .with_position(system.position)
                .with_motion(system.motion)
                .with_telemetry(system.telemetry);
                if let Some(remarks) = system.remarks {
                    update = update.with_remark(remarks);
                }
                vec![update]
            }
        }
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Stateless burst classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct BurstClassifier;

impl BurstClassifier {
    /// Create a classifier.
    pub fn new() -> Self {
        Self
    }

    /// Classify a raw message. Malformed input yields no updates.
    pub fn classify(&self, payload: &[u8], received_at: DateTime<Utc>) -> Vec<TransmitterUpdate> {
        match self.try_classify(payload) {
            Ok(bursts) => bursts
                .into_iter()
                .flat_map(|b| b.into_updates(received_at))
                .collect(),
            Err(e) => {
                tracing::warn!("Discarding malformed burst: {}", e);
                Vec::new()
            }
        }
    }

    /// Parse and validate a raw message into typed bursts.
    pub fn try_classify(&self, payload: &[u8]) -> Result<Vec<Burst>, ClassifyError> {
        let value: Value = serde_json::from_slice(payload)?;
        self.classify_value(value)
    }

    /// Validate an already-decoded JSON message.
    pub fn classify_value(&self, value: Value) -> Result<Vec<Burst>, ClassifyError> {
        let items = match value {
            Value::Object(obj) => vec![obj],
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(obj) => Ok(obj),
                    _ => Err(ClassifyError::NotAnObject),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(ClassifyError::NotAnObject),
        };

        if items.is_empty() {
            return Err(ClassifyError::UnrecognizedBurst);
        }

        // Block-keyed items describe one drone between them; flat records
        // and system records each stand alone.
        let block_form = items.iter().any(has_block_key);
        let mut bursts = Vec::new();
        let mut accumulated = DroneBurst::default();

        for item in items {
            if is_system_status(&item) {
                bursts.push(Burst::System(parse_system(item)?));
            } else if block_form {
                merge_block_item(&mut accumulated, item)?;
            } else {
                bursts.push(Burst::Drone(parse_flat(item)?));
            }
        }

        if block_form {
            if accumulated.identity.is_empty() {
                return Err(ClassifyError::MissingIdentity);
            }
            bursts.insert(0, Burst::Drone(accumulated));
        }

        if bursts.is_empty() {
            return Err(ClassifyError::UnrecognizedBurst);
        }
        tracing::debug!("Classified {} burst(s)", bursts.len());
        Ok(bursts)
    }
}

fn has_block_key(obj: &Map<String, Value>) -> bool {
    BLOCK_KEYS.iter().any(|k| obj.contains_key(*k))
}

fn is_system_status(obj: &Map<String, Value>) -> bool {
    SYSTEM_MARKERS.iter().any(|k| obj.contains_key(*k))
        || (obj.contains_key("serial_number") && !has_block_key(obj))
}

fn block<T: Default + for<'de> Deserialize<'de>>(
    obj: &mut Map<String, Value>,
    key: &str,
) -> Result<Option<T>, ClassifyError> {
    match obj.remove(key) {
        Some(Value::Object(inner)) => Ok(Some(serde_json::from_value(Value::Object(inner))?)),
        Some(_) => Err(ClassifyError::NotAnObject),
        None => Ok(None),
    }
}

fn merge_block_item(
    burst: &mut DroneBurst,
    mut item: Map<String, Value>,
) -> Result<(), ClassifyError> {
    if let Some(basic) = block::<BasicIdBlock>(&mut item, BLOCK_BASIC_ID)? {
        match basic.id_type.as_deref() {
            Some(ID_TYPE_SERIAL) if burst.identity.serial.is_none() => {
                burst.identity = IdentityKeys::new(
                    burst.identity.mac.clone(),
                    basic.id.clone(),
                    burst.identity.registration.clone(),
                );
            }
            Some(ID_TYPE_CAA) if burst.identity.registration.is_none() => {
                burst.identity = IdentityKeys::new(
                    burst.identity.mac.clone(),
                    burst.identity.serial.clone(),
                    basic.id.clone(),
                );
            }
            _ => {}
        }
        if burst.identity.mac.is_none() {
            burst.identity = IdentityKeys::new(
                basic.mac,
                burst.identity.serial.clone(),
                burst.identity.registration.clone(),
            );
        }
        burst.rssi = burst.rssi.or(basic.rssi);
        if let Some(description) = basic.description {
            push_remark(&mut burst.remarks, description);
        }
    }

    if let Some(location) = block::<LocationBlock>(&mut item, BLOCK_LOCATION)? {
        burst.position = Position::from_fix(location.latitude, location.longitude)
            .map(|p| p.with_altitude(location.geodetic_altitude))
            .or(burst.position);
        burst.motion = Motion {
            speed: location.speed,
            vertical_speed: location.vert_speed,
            course: location.direction,
            height_agl: location.height_agl,
        };
    }

    if let Some(self_id) = block::<SelfIdBlock>(&mut item, BLOCK_SELF_ID)? {
        if let Some(text) = self_id.text {
            push_remark(&mut burst.remarks, text);
        }
    }

    if let Some(system) = block::<SystemMessageBlock>(&mut item, BLOCK_SYSTEM)? {
        burst.pilot = Position::from_fix(system.latitude, system.longitude).or(burst.pilot);
        burst.home = Position::from_fix(system.home_lat, system.home_lon).or(burst.home);
    }

    if let Some(operator) = block::<OperatorIdBlock>(&mut item, BLOCK_OPERATOR_ID)? {
        if let Some(id) = operator.operator_id {
            push_remark(&mut burst.remarks, format!("Operator ID: {}", id));
        }
    }

    // Some decoders carry the hardware address beside the blocks.
    if burst.identity.mac.is_none() {
        if let Some(Value::String(mac)) = item.get("MAC").or_else(|| item.get("mac")) {
            burst.identity = IdentityKeys::new(
                Some(mac.clone()),
                burst.identity.serial.clone(),
                burst.identity.registration.clone(),
            );
        }
    }
    if burst.rssi.is_none() {
        burst.rssi = item
            .get("RSSI")
            .or_else(|| item.get("rssi"))
            .and_then(Value::as_f64);
    }

    Ok(())
}

fn push_remark(remarks: &mut Vec<String>, remark: String) {
    let remark = remark.trim();
    if !remark.is_empty() && !remarks.iter().any(|r| r == remark) {
        remarks.push(remark.to_string());
    }
}

fn parse_flat(item: Map<String, Value>) -> Result<DroneBurst, ClassifyError> {
    let record: FlatDroneRecord = serde_json::from_value(Value::Object(item))?;
    let identity = IdentityKeys::new(record.mac, record.serial, record.registration);
    if identity.is_empty() {
        return Err(ClassifyError::MissingIdentity);
    }

    let mut remarks = Vec::new();
    if let Some(text) = record.remarks {
        push_remark(&mut remarks, text);
    }

    Ok(DroneBurst {
        identity,
        position: Position::from_fix(record.latitude, record.longitude)
            .map(|p| p.with_altitude(record.altitude)),
        motion: Motion {
            speed: record.speed,
            course: record.course,
            ..Default::default()
        },
        rssi: record.rssi,
        remarks,
        pilot: Position::from_fix(record.pilot_lat, record.pilot_lon),
        home: Position::from_fix(record.home_lat, record.home_lon),
    })
}

fn parse_system(item: Map<String, Value>) -> Result<SystemBurst, ClassifyError> {
    let record: SystemStatusRecord = serde_json::from_value(Value::Object(item))?;
    let system_id = record
        .serial_number
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ClassifyError::MissingField("serial_number"))?;

    let gps = record.gps_data.unwrap_or_default();
    let stats = record.system_stats.unwrap_or_default();
    let sdr = record.ant_sdr_temps.unwrap_or_default();

    let mut telemetry = SystemTelemetry {
        cpu_usage: stats.cpu_usage,
        memory_percent: stats.memory.and_then(|m| m.percent),
        temperature: stats.temperature,
        uptime_secs: stats.uptime,
        pluto_temp: sdr.pluto_temp,
        zynq_temp: sdr.zynq_temp,
    };
    if let Some(remarks) = record.remarks.as_deref() {
        fill_from_remarks(&mut telemetry, remarks);
    }

    Ok(SystemBurst {
        system_id,
        position: Position::from_fix(gps.latitude, gps.longitude)
            .map(|p| p.with_altitude(gps.altitude)),
        motion: Motion {
            speed: gps.speed,
            course: gps.track,
            ..Default::default()
        },
        telemetry,
        remarks: record.remarks,
        reported_at: record
            .timestamp
            .filter(|t| *t > 0.0)
            .and_then(|t| DateTime::from_timestamp(t.trunc() as i64, (t.fract() * 1e9) as u32)),
    })
}

// ============================================================================
// Legacy remarks
// ============================================================================

struct RemarksPatterns {
    cpu: Regex,
    temperature: Regex,
    pluto: Regex,
    zynq: Regex,
}

fn remarks_patterns() -> &'static RemarksPatterns {
    static PATTERNS: OnceLock<RemarksPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| RemarksPatterns {
        cpu: Regex::new(r"CPU Usage:\s*([\d.]+)%").expect("static pattern"),
        temperature: Regex::new(r"(?:^|[^\w])Temperature:\s*([\d.]+)°C").expect("static pattern"),
        pluto: Regex::new(r"(?:Pluto|AD936X)\s*Temp:\s*([\w./]+)").expect("static pattern"),
        zynq: Regex::new(r"Zynq Temp:\s*([\w./]+)").expect("static pattern"),
    })
}

/// Fill missing telemetry from a free-text remarks string.
///
/// Structured fields already present are never overwritten.
pub fn fill_from_remarks(telemetry: &mut SystemTelemetry, remarks: &str) {
    let patterns = remarks_patterns();
    let capture = |re: &Regex| -> Option<f64> {
        re.captures(remarks)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    };

    telemetry.cpu_usage = telemetry.cpu_usage.or_else(|| capture(&patterns.cpu));
    telemetry.temperature = telemetry
        .temperature
        .or_else(|| capture(&patterns.temperature));
    telemetry.pluto_temp = telemetry.pluto_temp.or_else(|| capture(&patterns.pluto));
    telemetry.zynq_temp = telemetry.zynq_temp.or_else(|| capture(&patterns.zynq));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(value: Value) -> Vec<TransmitterUpdate> {
        BurstClassifier::new().classify(value.to_string().as_bytes(), Utc::now())
    }

    #[test]
    fn test_flat_registration_only() {
        let updates = classify(json!({"hwAddr": "AA:BB", "regCode": "CAA-123"}));
        assert_eq!(updates.len(), 1);
        let u = &updates[0];
        assert_eq!(u.kind, TransmitterKind::Drone);
        assert_eq!(u.identity.mac.as_deref(), Some("aa:bb"));
        assert_eq!(u.identity.registration.as_deref(), Some("CAA-123"));
        assert_eq!(u.identity.serial, None);
        assert_eq!(u.position, None);
    }

    #[test]
    fn test_flat_serial_with_position() {
        let updates = classify(json!({"hwAddr": "AA:BB", "serial": "SN-9", "lat": 1.0, "lon": 2.0}));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].identity.serial.as_deref(), Some("SN-9"));
        assert_eq!(updates[0].position, Some(Position::new(1.0, 2.0)));
    }

    #[test]
    fn test_block_form_accumulates_across_items() {
        let message = json!([
            {"Basic ID": {"id_type": ID_TYPE_SERIAL, "id": "1581F5FKD229400", "MAC": "60:60:1F:00:00:01", "RSSI": -62}},
            {"Basic ID": {"id_type": ID_TYPE_CAA, "id": "FIN87astrdge12k8"}},
            {"Location/Vector Message": {"latitude": 60.17, "longitude": 24.94, "geodetic_altitude": 120.5,
                                         "height_agl": 80.0, "speed": 12.0, "vert_speed": 0.5, "direction": 270}},
            {"Self-ID Message": {"text": "Inspection"}},
            {"System Message": {"latitude": 60.16, "longitude": 24.93, "home_lat": 60.15, "home_lon": 24.92}}
        ]);
        let updates = classify(message);
        assert_eq!(updates.len(), 3);

        let drone = &updates[0];
        assert_eq!(drone.kind, TransmitterKind::Drone);
        assert_eq!(drone.identity.serial.as_deref(), Some("1581F5FKD229400"));
        assert_eq!(drone.identity.registration.as_deref(), Some("FIN87astrdge12k8"));
        assert_eq!(drone.identity.mac.as_deref(), Some("60:60:1f:00:00:01"));
        assert_eq!(drone.rssi, Some(-62.0));
        assert_eq!(drone.motion.course, Some(270.0));
        assert_eq!(drone.position.and_then(|p| p.altitude), Some(120.5));
        assert_eq!(drone.remarks, vec!["Inspection".to_string()]);

        assert_eq!(updates[1].kind, TransmitterKind::Pilot);
        assert_eq!(updates[1].position, Some(Position::new(60.16, 24.93)));
        assert_eq!(updates[1].identity, drone.identity);
        assert_eq!(updates[2].kind, TransmitterKind::Home);
    }

    #[test]
    fn test_caa_block_alone_is_registration() {
        let updates = classify(json!({"Basic ID": {"id_type": ID_TYPE_CAA, "id": "CAA-1", "MAC": "aa:bb"}}));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].identity.registration.as_deref(), Some("CAA-1"));
        assert_eq!(updates[0].identity.serial, None);
    }

    #[test]
    fn test_flat_batch_yields_separate_bursts() {
        let updates = classify(json!([
            {"serial": "A-1", "lat": 1.0, "lon": 1.0},
            {"serial": "B-2", "lat": 2.0, "lon": 2.0}
        ]));
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].identity.serial.as_deref(), Some("B-2"));
    }

    #[test]
    fn test_system_status() {
        let updates = classify(json!({
            "serial_number": "wardragon-1a2b3c",
            "timestamp": 1717000000.5,
            "gps_data": {"latitude": 45.5, "longitude": -122.6, "altitude": 30.0, "speed": 0.0, "track": 0.0},
            "system_stats": {"cpu_usage": 12.5, "memory": {"percent": 40.1}, "temperature": "51.0", "uptime": 3600},
            "ant_sdr_temps": {"pluto_temp": 44.2, "zynq_temp": "N/A"}
        }));
        assert_eq!(updates.len(), 1);
        let u = &updates[0];
        assert_eq!(u.kind, TransmitterKind::System);
        assert_eq!(u.identity.serial.as_deref(), Some("wardragon-1a2b3c"));
        let t = u.telemetry.as_ref().expect("telemetry");
        assert_eq!(t.cpu_usage, Some(12.5));
        assert_eq!(t.temperature, Some(51.0));
        assert_eq!(t.memory_percent, Some(40.1));
        assert_eq!(t.zynq_temp, None);
        assert_eq!(u.observed_at.timestamp(), 1717000000);
    }

    #[test]
    fn test_system_remarks_fallback() {
        let updates = classify(json!({
            "serial_number": "abc",
            "remarks": "CPU Usage: 7.5%, Memory Total: 3.7 GB, Temperature: 48.3°C, Pluto Temp: 40.1, Zynq Temp: 55.9",
            "gps_data": {"latitude": 1.0, "longitude": 1.0}
        }));
        let t = updates[0].telemetry.as_ref().expect("telemetry");
        assert_eq!(t.cpu_usage, Some(7.5));
        assert_eq!(t.temperature, Some(48.3));
        assert_eq!(t.pluto_temp, Some(40.1));
        assert_eq!(t.zynq_temp, Some(55.9));
    }

    #[test]
    fn test_malformed_input_produces_nothing() {
        let classifier = BurstClassifier::new();
        assert!(classifier.classify(b"{not json", Utc::now()).is_empty());
        assert!(matches!(
            classifier.try_classify(b"42"),
            Err(ClassifyError::NotAnObject)
        ));
        assert!(matches!(
            classifier.try_classify(br#"{"lat": 1.0, "lon": 2.0}"#),
            Err(ClassifyError::MissingIdentity)
        ));
        assert!(matches!(
            classifier.try_classify(br#"{"system_stats": {"cpu_usage": 1}}"#),
            Err(ClassifyError::MissingField("serial_number"))
        ));
        assert!(matches!(
            classifier.try_classify(b"[]"),
            Err(ClassifyError::UnrecognizedBurst)
        ));
        assert!(matches!(
            classifier.try_classify(br#"[{"Location/Vector Message": {"latitude": 1.0, "longitude": 2.0}}]"#),
            Err(ClassifyError::MissingIdentity)
        ));
    }

    #[test]
    fn test_null_island_is_not_a_fix() {
        let updates = classify(json!({"serial": "SN-1", "lat": 0.0, "lon": 0.0}));
        assert_eq!(updates[0].position, None);
    }
}

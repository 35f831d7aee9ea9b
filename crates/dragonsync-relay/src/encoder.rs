// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet encoder.
//!
//! Turns a [`TransmitterRecord`] into an ATAK `TAKPacket`: a PLI for the
//! position policy, a GeoChat for the annotation policy. Encoding is pure;
//! the same record always yields the same bytes.

use crate::identity::truncate_chars;
use crate::proto::{tak_packet, Contact, GeoChat, Group, MemberRole, Pli, TakPacket, Team};
use crate::registry::TransmitterRecord;
use crate::update::TransmitterKind;
use chrono::{DateTime, Utc};
use prost::Message;
use std::fmt;

/// Maximum GeoChat message length.
pub const MAX_CHAT_LEN: usize = 256;

/// GeoChat broadcast destination.
pub const ALL_CHAT_ROOMS: &str = "All Chat Rooms";

/// Outbound packet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Position report (PLI).
    Position,
    /// Short text annotation (GeoChat).
    Annotation,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position => f.write_str("PLI"),
            Self::Annotation => f.write_str("GeoChat"),
        }
    }
}

/// An encoded packet ready for the output link.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPacket {
    /// Registry key of the source record.
    pub key: String,
    pub kind: PacketKind,
    /// Wall-clock time of the record's latest update.
    pub timestamp: DateTime<Utc>,
    /// Serialized `TAKPacket`.
    pub payload: Vec<u8>,
}

/// Stateless packet encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketEncoder;

impl PacketEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode `record` as a packet of `kind`.
    ///
    /// Returns `None` when the record has nothing to say for that kind:
    /// no position for a PLI, or no annotation text.
    pub fn encode(&self, record: &TransmitterRecord, kind: PacketKind) -> Option<EncodedPacket> {
        let packet = match kind {
            PacketKind::Position => self.position_packet(record)?,
            PacketKind::Annotation => self.annotation_packet(record)?,
        };
        Some(EncodedPacket {
            key: record.key.clone(),
            kind,
            timestamp: record.updated_at,
            payload: packet.encode_to_vec(),
        })
    }

    /// Build the PLI packet.
    pub fn position_packet(&self, record: &TransmitterRecord) -> Option<TakPacket> {
        let position = record.position?;
        let pli = Pli {
            latitude_i: degrees_e7(position.latitude),
            longitude_i: degrees_e7(position.longitude),
            altitude: position.altitude.map(|a| a.round() as i32).unwrap_or(0),
            speed: clamp_u16(record.motion.speed),
            course: clamp_u16(record.motion.course),
        };
        Some(self.envelope(record, tak_packet::PayloadVariant::Pli(pli)))
    }

    /// Build the GeoChat packet.
    pub fn annotation_packet(&self, record: &TransmitterRecord) -> Option<TakPacket> {
        let chat = GeoChat {
            message: self.annotation_text(record)?,
            to: Some(ALL_CHAT_ROOMS.to_string()),
            to_callsign: Some(ALL_CHAT_ROOMS.to_string()),
        };
        Some(self.envelope(record, tak_packet::PayloadVariant::Chat(chat)))
    }

    /// Annotation text for a record, truncated to [`MAX_CHAT_LEN`].
    pub fn annotation_text(&self, record: &TransmitterRecord) -> Option<String> {
        let text = match record.kind {
            TransmitterKind::System => {
                let t = &record.telemetry;
                format!(
                    "{} | CPU: {}% | Temp: {}°C | AD936X: {} | Zynq: {}",
                    packet_callsign(record),
                    metric(t.cpu_usage),
                    metric(t.temperature),
                    metric(t.pluto_temp),
                    metric(t.zynq_temp),
                )
            }
            TransmitterKind::Pilot | TransmitterKind::Home => {
                let p = record.position?;
                let label = if record.kind == TransmitterKind::Pilot {
                    "Pilot"
                } else {
                    "Home"
                };
                format!(
                    "{} | {}: {:.6}, {:.6}",
                    record.callsign, label, p.latitude, p.longitude
                )
            }
            TransmitterKind::Drone => return None,
        };
        Some(truncate_chars(&text, MAX_CHAT_LEN))
    }

    fn envelope(&self, record: &TransmitterRecord, payload: tak_packet::PayloadVariant) -> TakPacket {
        let callsign = packet_callsign(record).to_string();
        TakPacket {
            is_compressed: false,
            contact: Some(Contact {
                device_callsign: callsign.clone(),
                callsign,
            }),
            group: Some(Group {
                role: MemberRole::TeamMember as i32,
                team: Team::Cyan as i32,
            }),
            status: None,
            payload_variant: Some(payload),
        }
    }
}

/// Callsign carried in packets: shortened for systems, full otherwise.
pub fn packet_callsign(record: &TransmitterRecord) -> &str {
    match record.kind {
        TransmitterKind::System => &record.key,
        _ => &record.callsign,
    }
}

fn degrees_e7(degrees: f64) -> i32 {
    (degrees * 1e7).round() as i32
}

fn clamp_u16(value: Option<f64>) -> u32 {
    value
        .filter(|v| v.is_finite())
        .map(|v| v.round().clamp(0.0, u16::MAX as f64) as u32)
        .unwrap_or(0)
}

fn metric(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}", v),
        None => "N/A".to_string(),
    }
}

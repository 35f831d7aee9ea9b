// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protobuf messages carried on the output link.
//!
//! Hand-written `prost` derives for the subset of the Meshtastic schema the
//! relay emits: the ATAK plugin `TAKPacket` and the `ToRadio` envelope the
//! serial API expects. Field tags match the upstream `.proto` files.

// ============================================================================
// ATAK plugin (atak.proto)
// ============================================================================

/// ATAK packet sent on the ATAK plugin port.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TakPacket {
    #[prost(bool, tag = "1")]
    pub is_compressed: bool,
    #[prost(message, optional, tag = "2")]
    pub contact: Option<Contact>,
    #[prost(message, optional, tag = "3")]
    pub group: Option<Group>,
    #[prost(message, optional, tag = "4")]
    pub status: Option<Status>,
    #[prost(oneof = "tak_packet::PayloadVariant", tags = "5, 6, 7")]
    pub payload_variant: Option<tak_packet::PayloadVariant>,
}

pub mod tak_packet {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum PayloadVariant {
        /// Position report.
        #[prost(message, tag = "5")]
        Pli(super::Pli),
        /// Chat message.
        #[prost(message, tag = "6")]
        Chat(super::GeoChat),
        /// Raw CoT detail.
        #[prost(bytes, tag = "7")]
        Detail(Vec<u8>),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Contact {
    #[prost(string, tag = "1")]
    pub callsign: String,
    #[prost(string, tag = "2")]
    pub device_callsign: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Group {
    #[prost(enumeration = "MemberRole", tag = "1")]
    pub role: i32,
    #[prost(enumeration = "Team", tag = "2")]
    pub team: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Status {
    #[prost(uint32, tag = "1")]
    pub battery: u32,
}

/// Position Location Information.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Pli {
    /// Latitude, degrees * 1e7.
    #[prost(sfixed32, tag = "1")]
    pub latitude_i: i32,
    /// Longitude, degrees * 1e7.
    #[prost(sfixed32, tag = "2")]
    pub longitude_i: i32,
    /// Altitude, metres.
    #[prost(int32, tag = "3")]
    pub altitude: i32,
    #[prost(uint32, tag = "4")]
    pub speed: u32,
    #[prost(uint32, tag = "5")]
    pub course: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GeoChat {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(string, optional, tag = "2")]
    pub to: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub to_callsign: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Team {
    UnspecifedColor = 0,
    White = 1,
    Yellow = 2,
    Orange = 3,
    Magenta = 4,
    Red = 5,
    Maroon = 6,
    Purple = 7,
    DarkBlue = 8,
    Blue = 9,
    Cyan = 10,
    Teal = 11,
    Green = 12,
    DarkGreen = 13,
    Brown = 14,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MemberRole {
    Unspecifed = 0,
    TeamMember = 1,
    TeamLead = 2,
    Hq = 3,
    Sniper = 4,
    Medic = 5,
    ForwardObserver = 6,
    Rto = 7,
    K9 = 8,
}

// ============================================================================
// Serial API envelope (mesh.proto, portnums.proto)
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PortNum {
    UnknownApp = 0,
    TextMessageApp = 1,
    PositionApp = 3,
    AtakPlugin = 72,
}

/// Decoded application payload of a mesh packet.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Data {
    #[prost(enumeration = "PortNum", tag = "1")]
    pub portnum: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub want_response: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MeshPacket {
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
    #[prost(bool, tag = "10")]
    pub want_ack: bool,
    #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4")]
    pub payload_variant: Option<mesh_packet::PayloadVariant>,
}

pub mod mesh_packet {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "4")]
        Decoded(super::Data),
    }
}

/// Host-to-radio envelope.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ToRadio {
    #[prost(oneof = "to_radio::PayloadVariant", tags = "1")]
    pub payload_variant: Option<to_radio::PayloadVariant>,
}

pub mod to_radio {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "1")]
        Packet(super::MeshPacket),
    }
}

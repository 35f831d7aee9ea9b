// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Output serializer and links.
//!
//! [`OutputSerializer`] is the only path to the physical link. It holds the
//! link behind an async mutex: a sender waits for the lock, performs the
//! blocking write on the blocking pool while still holding it, and releases
//! it when the guard drops, whatever the write returned. Failures are
//! reported, never retried here.
//!
//! Links:
//! - [`SerialLink`]: Meshtastic serial API (framed `ToRadio`), reopened
//!   lazily after a failure.
//! - [`DryRunLink`]: frames packets and logs them instead of writing.

use crate::config::OutputConfig;
use crate::encoder::EncodedPacket;
use crate::proto::{mesh_packet, to_radio, Data, MeshPacket, PortNum, ToRadio};
use prost::Message;
use serialport::{SerialPort, SerialPortType};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Serial frame start bytes.
pub const FRAME_START: [u8; 2] = [0x94, 0xC3];

/// Largest protobuf a frame may carry.
pub const MAX_FRAME_PAYLOAD: usize = 512;

/// Mesh broadcast address.
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

/// Output errors.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Link I/O error: {0}")]
    Link(#[from] io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Frame payload too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("Link unavailable: {0}")]
    Unavailable(String),

    #[error("Output task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// A physical output link. Writes are blocking.
pub trait PacketLink: Send {
    /// Write one packet to the link.
    fn send(&mut self, packet: &EncodedPacket) -> Result<(), OutputError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Exclusive, ordered access to one [`PacketLink`].
#[derive(Clone)]
pub struct OutputSerializer {
    link: Arc<Mutex<Box<dyn PacketLink>>>,
}

impl OutputSerializer {
    /// Wrap a link.
    pub fn new(link: impl PacketLink + 'static) -> Self {
        Self::from_boxed(Box::new(link))
    }

    /// Wrap an already boxed link.
    pub fn from_boxed(link: Box<dyn PacketLink>) -> Self {
        Self {
            link: Arc::new(Mutex::new(link)),
        }
    }

    /// Send one packet, waiting until the link is free.
    pub async fn send(&self, packet: EncodedPacket) -> Result<(), OutputError> {
        let mut link = self.link.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || link.send(&packet)).await?
    }

    /// Describe the wrapped link.
    pub async fn describe(&self) -> String {
        self.link.lock().await.describe()
    }
}

/// Wrap a payload for the radio: `ToRadio` envelope plus serial framing.
pub fn frame_for_radio(payload: &[u8], channel: u32, hop_limit: u32) -> Result<Vec<u8>, OutputError> {
    let to_radio = ToRadio {
        payload_variant: Some(to_radio::PayloadVariant::Packet(MeshPacket {
            from: 0,
            to: BROADCAST_ADDR,
            channel,
            id: 0,
            hop_limit,
            want_ack: false,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(Data {
                portnum: PortNum::AtakPlugin as i32,
                payload: payload.to_vec(),
                want_response: false,
            })),
        })),
    };

    let len = to_radio.encoded_len();
    if len > MAX_FRAME_PAYLOAD {
        return Err(OutputError::FrameTooLarge(len));
    }

    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(&FRAME_START);
    frame.push(((len >> 8) & 0xFF) as u8);
    frame.push((len & 0xFF) as u8);
    to_radio.encode(&mut frame)?;
    Ok(frame)
}

/// First USB serial port, if any.
pub fn detect_port() -> Result<String, OutputError> {
    let ports = serialport::available_ports()?;
    ports
        .into_iter()
        .find(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
        .map(|p| p.port_name)
        .ok_or_else(|| OutputError::Unavailable("no USB serial port found".to_string()))
}

/// Meshtastic radio on a serial port.
pub struct SerialLink {
    device: Option<String>,
    baud_rate: u32,
    channel: u32,
    hop_limit: u32,
    reconnect_delay: Duration,
    port: Option<Box<dyn SerialPort>>,
    port_name: Option<String>,
    retry_after: Option<Instant>,
}

impl SerialLink {
    /// Create an unopened link.
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            device: config.device.clone(),
            baud_rate: config.baud_rate,
            channel: config.channel,
            hop_limit: config.hop_limit,
            reconnect_delay: config.reconnect_delay(),
            port: None,
            port_name: None,
            retry_after: None,
        }
    }

    /// Open the configured (or detected) port.
    pub fn open(&mut self) -> Result<(), OutputError> {
        let name = match &self.device {
            Some(device) => device.clone(),
            None => detect_port()?,
        };

        let mut builder = serialport::new(name.as_str(), self.baud_rate).timeout(Duration::from_millis(500));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder.open()?;
        // Some boards only wake up once DTR/RTS are asserted.
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);

        tracing::info!("Opened serial port {} at {} baud", name, self.baud_rate);
        self.port = Some(port);
        self.port_name = Some(name);
        self.retry_after = None;
        Ok(())
    }

    fn ensure_open(&mut self) -> Result<(), OutputError> {
        if self.port.is_some() {
            return Ok(());
        }
        if let Some(at) = self.retry_after {
            let now = Instant::now();
            if now < at {
                return Err(OutputError::Unavailable(format!(
                    "reconnecting in {}ms",
                    (at - now).as_millis()
                )));
            }
        }
        self.open().inspect_err(|_| {
            self.retry_after = Some(Instant::now() + self.reconnect_delay);
        })
    }

    fn mark_failed(&mut self) {
        if let Some(name) = &self.port_name {
            tracing::warn!(
                "Serial port {} failed, reopening in {:?}",
                name,
                self.reconnect_delay
            );
        }
        self.port = None;
        self.retry_after = Some(Instant::now() + self.reconnect_delay);
    }
}

impl PacketLink for SerialLink {
    fn send(&mut self, packet: &EncodedPacket) -> Result<(), OutputError> {
        let frame = frame_for_radio(&packet.payload, self.channel, self.hop_limit)?;
        self.ensure_open()?;

        let result = match self.port.as_mut() {
            Some(port) => port.write_all(&frame).and_then(|_| port.flush()),
            None => return Err(OutputError::Unavailable("port closed".to_string())),
        };
        if let Err(e) = result {
            self.mark_failed();
            return Err(e.into());
        }
        tracing::trace!(
            "Wrote {} frame for {}: {}",
            packet.kind,
            packet.key,
            hex::encode(&frame)
        );
        Ok(())
    }

    fn describe(&self) -> String {
        match (&self.port_name, &self.device) {
            (Some(name), _) => format!("serial {} @ {}", name, self.baud_rate),
            (None, Some(device)) => format!("serial {} @ {} (closed)", device, self.baud_rate),
            (None, None) => format!("serial auto-detect @ {}", self.baud_rate),
        }
    }
}

/// Logs framed packets instead of writing them.
#[derive(Debug, Clone)]
pub struct DryRunLink {
    channel: u32,
    hop_limit: u32,
}

impl DryRunLink {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            channel: config.channel,
            hop_limit: config.hop_limit,
        }
    }
}

impl PacketLink for DryRunLink {
    fn send(&mut self, packet: &EncodedPacket) -> Result<(), OutputError> {
        let frame = frame_for_radio(&packet.payload, self.channel, self.hop_limit)?;
        tracing::info!(
            "[dry-run] {} for {} ({} bytes)",
            packet.kind,
            packet.key,
            frame.len()
        );
        tracing::trace!("[dry-run] {}", hex::encode(&frame));
        Ok(())
    }

    fn describe(&self) -> String {
        "dry-run".to_string()
    }
}

/// Build the link selected by `config`.
pub fn link_from_config(config: &OutputConfig) -> Result<Box<dyn PacketLink>, OutputError> {
    if config.dry_run {
        return Ok(Box::new(DryRunLink::new(config)));
    }
    let mut link = SerialLink::new(config);
    link.open()?;
    Ok(Box::new(link))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::PacketKind;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn packet(key: &str, len: usize) -> EncodedPacket {
        EncodedPacket {
            key: key.to_string(),
            kind: PacketKind::Position,
            timestamp: Utc::now(),
            payload: vec![0xAB; len],
        }
    }

    #[test]
    fn test_frame_for_radio() {
        let frame = frame_for_radio(&[1, 2, 3], 0, 3).expect("frame");
        assert_eq!(&frame[..2], &FRAME_START);
        let len = ((frame[2] as usize) << 8) | frame[3] as usize;
        assert_eq!(len, frame.len() - 4);
        assert!(hex::encode(&frame).starts_with("94c3"));

        let decoded = ToRadio::decode(&frame[4..]).expect("valid ToRadio");
        let Some(to_radio::PayloadVariant::Packet(mesh)) = decoded.payload_variant else {
            panic!("expected mesh packet");
        };
        assert_eq!(mesh.to, BROADCAST_ADDR);
        assert_eq!(mesh.hop_limit, 3);
        assert!(!mesh.want_ack);
        let Some(mesh_packet::PayloadVariant::Decoded(data)) = mesh.payload_variant else {
            panic!("expected decoded data");
        };
        assert_eq!(data.portnum, PortNum::AtakPlugin as i32);
        assert_eq!(data.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_frame_too_large() {
        assert!(matches!(
            frame_for_radio(&[0u8; 600], 0, 3),
            Err(OutputError::FrameTooLarge(_))
        ));
    }

    struct OverlapLink {
        busy: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
        writes: Arc<AtomicUsize>,
        fail_every: usize,
    }

    impl PacketLink for OverlapLink {
        fn send(&mut self, _packet: &EncodedPacket) -> Result<(), OutputError> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(2));
            let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
            self.busy.store(false, Ordering::SeqCst);
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(OutputError::Link(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
            }
            Ok(())
        }

        fn describe(&self) -> String {
            "overlap-check".to_string()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exclusive_output() {
        let overlaps = Arc::new(AtomicUsize::new(0));
        let writes = Arc::new(AtomicUsize::new(0));
        let serializer = OutputSerializer::new(OverlapLink {
            busy: Arc::new(AtomicBool::new(false)),
            overlaps: overlaps.clone(),
            writes: writes.clone(),
            fail_every: 3,
        });

        let mut tasks = Vec::new();
        for producer in 0..8 {
            let serializer = serializer.clone();
            tasks.push(tokio::spawn(async move {
                let mut failures = 0;
                for i in 0..5 {
                    let key = format!("p{}-{}", producer, i);
                    if serializer.send(packet(&key, 8)).await.is_err() {
                        failures += 1;
                    }
                }
                failures
            }));
        }

        let mut failures = 0;
        for task in tasks {
            failures += task.await.expect("producer task");
        }

        assert_eq!(writes.load(Ordering::SeqCst), 40);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        // Failed writes still release the link.
        assert_eq!(failures, 13);
    }

    #[tokio::test]
    async fn test_dry_run_link() {
        let serializer = OutputSerializer::new(DryRunLink::new(&OutputConfig::default()));
        serializer.send(packet("drone-SN-9", 16)).await.expect("dry-run send");
        assert_eq!(serializer.describe().await, "dry-run");
        assert!(serializer.send(packet("big", 600)).await.is_err());
    }

    #[test]
    fn test_serial_link_unopened_describe() {
        let config = OutputConfig {
            device: Some("/dev/ttyFAKE0".to_string()),
            ..Default::default()
        };
        let link = SerialLink::new(&config);
        assert_eq!(link.describe(), "serial /dev/ttyFAKE0 @ 115200 (closed)");
    }

    #[test]
    fn test_serial_link_backs_off_after_open_failure() {
        let config = OutputConfig {
            device: Some("/nonexistent/ttyFAKE0".to_string()),
            reconnect_delay_ms: 60_000,
            ..Default::default()
        };
        let mut link = SerialLink::new(&config);
        assert!(link.send(&packet("k", 4)).is_err());
        assert!(matches!(
            link.send(&packet("k", 4)),
            Err(OutputError::Unavailable(_))
        ));
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound feed listeners.
//!
//! Each feed is a UDP socket carrying one JSON message per datagram. The
//! listener classifies on its own task and pushes the resulting updates into
//! a bounded channel; a full channel applies backpressure to the socket
//! rather than dropping updates.

use crate::classifier::BurstClassifier;
use crate::config::FeedConfig;
use crate::stats::RelayStats;
use crate::update::TransmitterUpdate;
use chrono::Utc;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Updates classified from one datagram.
pub type UpdateBatch = Vec<TransmitterUpdate>;

/// Bind a feed socket with `SO_REUSEADDR`, joining the multicast group if set.
pub fn bind_socket(config: &FeedConfig) -> io::Result<UdpSocket> {
    let domain = if config.bind.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&config.bind.into())?;

    if let Some(group) = config.multicast_group {
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        debug!("Joined multicast group {} on {}", group, config.bind);
    }

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// Listener for one feed.
pub struct FeedListener {
    name: &'static str,
    socket: UdpSocket,
    max_datagram: usize,
    classifier: BurstClassifier,
    tx: mpsc::Sender<UpdateBatch>,
    stats: Arc<RelayStats>,
}

impl FeedListener {
    /// Bind the feed socket.
    pub fn bind(
        name: &'static str,
        config: &FeedConfig,
        tx: mpsc::Sender<UpdateBatch>,
        stats: Arc<RelayStats>,
    ) -> io::Result<Self> {
        let socket = bind_socket(config)?;
        info!("{} feed listening on {}", name, socket.local_addr()?);
        Ok(Self {
            name,
            socket,
            max_datagram: config.max_datagram,
            classifier: BurstClassifier::new(),
            tx,
            stats,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until shutdown or until the engine goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; self.max_datagram];
        if *shutdown.borrow() {
            return;
        }

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, peer)) => {
                            let updates = self.ingest(&buf[..len], peer);
                            if updates.is_empty() {
                                continue;
                            }
                            if self.tx.send(updates).await.is_err() {
                                debug!("{} feed: engine stopped", self.name);
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("{} feed receive error: {}", self.name, e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("{} feed shutting down", self.name);
                    break;
                }
            }
        }
    }

    fn ingest(&self, payload: &[u8], peer: SocketAddr) -> UpdateBatch {
        match self.classifier.try_classify(payload) {
            Ok(bursts) => {
                self.stats.record_burst(false);
                let received_at = Utc::now();
                let updates: UpdateBatch = bursts
                    .into_iter()
                    .flat_map(|b| b.into_updates(received_at))
                    .collect();
                debug!(
                    "{} feed: {} update(s) from {}",
                    self.name,
                    updates.len(),
                    peer
                );
                updates
            }
            Err(e) => {
                self.stats.record_burst(true);
                warn!(
                    "{} feed: discarding malformed message from {}: {}",
                    self.name, peer, e
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::TransmitterKind;
    use std::time::Duration;

    fn loopback() -> FeedConfig {
        FeedConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    #[tokio::test]
    async fn test_listener_forwards_updates() {
        let stats = Arc::new(RelayStats::new());
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = FeedListener::bind("drone", &loopback(), tx, stats.clone()).expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(listener.run(shutdown_rx));

        let sender = UdpSocket::bind("127.0.0.1:0").await.expect("sender");
        sender.send_to(b"{not json", addr).await.expect("send");
        sender
            .send_to(br#"{"hwAddr": "AA:BB", "serial": "SN-9", "lat": 1.0, "lon": 2.0}"#, addr)
            .await
            .expect("send");

        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("batch in time")
            .expect("channel open");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, TransmitterKind::Drone);
        assert_eq!(batch[0].identity.serial.as_deref(), Some("SN-9"));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bursts_received, 2);
        assert_eq!(snapshot.bursts_malformed, 1);

        shutdown_tx.send(true).expect("signal shutdown");
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("listener stops")
            .expect("listener task");
    }

    #[tokio::test]
    async fn test_bind_rejects_non_multicast_group() {
        let config = loopback().multicast(Ipv4Addr::new(10, 0, 0, 1));
        assert!(bind_socket(&config).is_err());
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Top-level relay service.
//!
//! Wires two feed listeners and the engine together and hands back a
//! [`RelayHandle`] to observe and stop them.

use crate::config::{ConfigError, RelayConfig};
use crate::engine::RelayEngine;
use crate::feed::FeedListener;
use crate::output::{link_from_config, OutputError, OutputSerializer, PacketLink};
use crate::stats::{RelayStats, RelayStatsSnapshot};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Relay already running")]
    AlreadyRunning,

    #[error("Relay not running")]
    NotRunning,
}

/// Relay service.
pub struct Relay {
    config: RelayConfig,
    link: Option<Box<dyn PacketLink>>,
    running: Arc<AtomicBool>,
}

impl Relay {
    /// Create a relay from configuration.
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self {
            config,
            link: None,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Use `link` instead of the link selected by the configuration.
    pub fn with_link(mut self, link: impl PacketLink + 'static) -> Self {
        self.link = Some(Box::new(link));
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Bind the feeds, open the output and spawn all tasks.
    pub async fn start(&mut self) -> Result<RelayHandle, RelayError> {
        if self.running.load(Ordering::Relaxed) {
            return Err(RelayError::AlreadyRunning);
        }

        let link = match self.link.take() {
            Some(link) => link,
            None => {
                let output = self.config.output.clone();
                tokio::task::spawn_blocking(move || link_from_config(&output))
                    .await
                    .map_err(OutputError::from)??
            }
        };
        let output = OutputSerializer::from_boxed(link);
        tracing::info!("Output link: {}", output.describe().await);

        let stats = Arc::new(RelayStats::new());
        let capacity = self.config.channel_capacity;
        let (drone_tx, drone_rx) = mpsc::channel(capacity);
        let (system_tx, system_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let drone = FeedListener::bind("drone", &self.config.feeds.drone, drone_tx, stats.clone())?;
        let system = FeedListener::bind(
            "system",
            &self.config.feeds.system,
            system_tx,
            stats.clone(),
        )?;
        let drone_addr = drone.local_addr()?;
        let system_addr = system.local_addr()?;

        let engine = RelayEngine::new(&self.config, output, stats.clone());
        let engine_shutdown = shutdown_rx.clone();
        let tasks = vec![
            tokio::spawn(drone.run(shutdown_rx.clone())),
            tokio::spawn(system.run(shutdown_rx)),
            tokio::spawn(async move {
                engine.run(drone_rx, system_rx, engine_shutdown).await;
            }),
        ];

        self.running.store(true, Ordering::Relaxed);
        tracing::info!("Relay '{}' started", self.config.name);

        Ok(RelayHandle {
            running: self.running.clone(),
            shutdown: Arc::new(shutdown_tx),
            stats,
            tasks: Arc::new(Mutex::new(Some(tasks))),
            drone_addr,
            system_addr,
        })
    }
}

/// Handle to control the relay.
#[derive(Clone)]
pub struct RelayHandle {
    running: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
    stats: Arc<RelayStats>,
    tasks: Arc<Mutex<Option<Vec<JoinHandle<()>>>>>,
    drone_addr: SocketAddr,
    system_addr: SocketAddr,
}

impl RelayHandle {
    /// Check if relay is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Request relay to stop. In-flight sends complete first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.shutdown.send(true);
    }

    /// Current statistics.
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Bound address of the drone feed.
    pub fn drone_addr(&self) -> SocketAddr {
        self.drone_addr
    }

    /// Bound address of the system feed.
    pub fn system_addr(&self) -> SocketAddr {
        self.system_addr
    }

    /// Wait for every task to finish. Call after [`stop`](Self::stop).
    pub async fn wait(&self) -> Result<RelayStatsSnapshot, RelayError> {
        let tasks = self.tasks.lock().await.take().ok_or(RelayError::NotRunning)?;
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Relay task failed: {}", e);
            }
        }
        Ok(self.stats.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::output::DryRunLink;
    use std::time::Duration;

    fn loopback_config() -> RelayConfig {
        let mut config = RelayConfig::default().with_dry_run(true);
        config.feeds.drone = FeedConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)));
        config.feeds.system = FeedConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)));
        config
    }

    #[test]
    fn test_relay_rejects_invalid_config() {
        let mut config = RelayConfig::default();
        config.throttle.drone.annotate = true;
        assert!(matches!(Relay::new(config), Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let mut relay = Relay::new(loopback_config())
            .expect("relay")
            .with_link(DryRunLink::new(&Default::default()));
        let handle = relay.start().await.expect("start");
        assert!(handle.is_running());
        assert_ne!(handle.drone_addr(), handle.system_addr());
        assert!(matches!(relay.start().await, Err(RelayError::AlreadyRunning)));

        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("sender");
        sender
            .send_to(br#"{"serial": "SN-9", "lat": 1.0, "lon": 2.0}"#, handle.drone_addr())
            .await
            .expect("send");

        for _ in 0..100 {
            if handle.stats().updates_applied > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(handle.stats().records_created, 1);

        handle.stop();
        assert!(!handle.is_running());
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("tasks stop")
            .expect("first wait");
        assert!(matches!(handle.wait().await, Err(RelayError::NotRunning)));
    }
}

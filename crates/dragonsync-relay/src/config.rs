// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay configuration.
//!
//! Supports both programmatic and file-based configuration. Every field has
//! a default, so a partial TOML file is valid.

use crate::scheduler::{ThrottlePolicies, ThrottlePolicy};
use crate::update::TransmitterKind;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay name (for identification).
    #[serde(default = "default_name")]
    pub name: String,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Flush tick period (milliseconds).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Silence after which a transmitter is forgotten (seconds).
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_secs: u64,

    /// Statistics reporting interval (seconds, 0 to disable).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Bound of each feed channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub feeds: FeedsConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub throttle: ThrottleConfig,
}

fn default_name() -> String {
    "dragonsync-relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_flush_interval() -> u64 {
    1000
}

fn default_stale_timeout() -> u64 {
    60
}

fn default_stats_interval() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            flush_interval_ms: default_flush_interval(),
            stale_timeout_secs: default_stale_timeout(),
            stats_interval_secs: default_stats_interval(),
            channel_capacity: default_channel_capacity(),
            feeds: FeedsConfig::default(),
            output: OutputConfig::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("flush_interval_ms must be > 0".into()));
        }
        if self.stale_timeout_secs == 0 {
            return Err(ConfigError::Invalid("stale_timeout_secs must be > 0".into()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be > 0".into()));
        }

        self.feeds.drone.validate("drone")?;
        self.feeds.system.validate("system")?;
        // Port 0 binds are ephemeral and never collide.
        let drone = &self.feeds.drone;
        if drone.bind == self.feeds.system.bind
            && drone.bind.port() != 0
            && drone.multicast_group.is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "drone and system feeds share bind address {}",
                drone.bind
            )));
        }

        if self.output.baud_rate == 0 {
            return Err(ConfigError::Invalid("output.baud_rate must be > 0".into()));
        }
        if let Some(device) = &self.output.device {
            if device.trim().is_empty() {
                return Err(ConfigError::Invalid("output.device is empty".into()));
            }
        }
        if self.output.hop_limit > 7 {
            return Err(ConfigError::Invalid(format!(
                "output.hop_limit {} exceeds 7",
                self.output.hop_limit
            )));
        }

        if self.throttle.drone.annotate {
            return Err(ConfigError::Invalid(
                "throttle.drone.annotate is not supported".into(),
            ));
        }
        for kind in TransmitterKind::ALL {
            let t = self.throttle.for_kind(kind);
            if t.pli_interval_ms == 0 || t.geo_interval_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "throttle.{} intervals must be > 0",
                    kind
                )));
            }
        }

        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    /// Set flush tick period.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set stale timeout.
    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout_secs = timeout.as_secs();
        self
    }

    /// Set output device path.
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.output.device = Some(device.into());
        self
    }

    /// Enable dry-run output.
    pub fn with_dry_run(mut self, enabled: bool) -> Self {
        self.output.dry_run = enabled;
        self
    }

    /// Set throttle intervals for one kind.
    pub fn with_throttle(mut self, kind: TransmitterKind, pli: Duration, geo: Duration) -> Self {
        let t = self.throttle.for_kind_mut(kind);
        t.pli_interval_ms = pli.as_millis() as u64;
        t.geo_interval_ms = geo.as_millis() as u64;
        self
    }
}

/// Inbound feed endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default = "FeedConfig::drone")]
    pub drone: FeedConfig,

    #[serde(default = "FeedConfig::system")]
    pub system: FeedConfig,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            drone: FeedConfig::drone(),
            system: FeedConfig::system(),
        }
    }
}

/// One inbound UDP feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Local bind address.
    pub bind: SocketAddr,

    /// IPv4 multicast group to join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multicast_group: Option<Ipv4Addr>,

    /// Largest datagram accepted.
    #[serde(default = "default_max_datagram")]
    pub max_datagram: usize,
}

fn default_max_datagram() -> usize {
    65535
}

impl FeedConfig {
    /// Create a feed bound to `bind`.
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            multicast_group: None,
            max_datagram: default_max_datagram(),
        }
    }

    /// Default drone feed.
    pub fn drone() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], 4224)))
    }

    /// Default system feed.
    pub fn system() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], 4225)))
    }

    /// Join a multicast group.
    pub fn multicast(mut self, group: Ipv4Addr) -> Self {
        self.multicast_group = Some(group);
        self
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if let Some(group) = self.multicast_group {
            if !group.is_multicast() {
                return Err(ConfigError::Invalid(format!(
                    "feeds.{}.multicast_group {} is not a multicast address",
                    name, group
                )));
            }
            if !self.bind.is_ipv4() {
                return Err(ConfigError::Invalid(format!(
                    "feeds.{} multicast requires an IPv4 bind address",
                    name
                )));
            }
        }
        if self.max_datagram == 0 {
            return Err(ConfigError::Invalid(format!(
                "feeds.{}.max_datagram must be > 0",
                name
            )));
        }
        Ok(())
    }
}

/// Output link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Serial device path; auto-detected when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Log frames instead of writing them.
    #[serde(default)]
    pub dry_run: bool,

    /// Wait before reopening a failed port (milliseconds).
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Mesh channel index.
    #[serde(default)]
    pub channel: u32,

    #[serde(default = "default_hop_limit")]
    pub hop_limit: u32,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_hop_limit() -> u32 {
    3
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: default_baud_rate(),
            dry_run: false,
            reconnect_delay_ms: default_reconnect_delay(),
            channel: 0,
            hop_limit: default_hop_limit(),
        }
    }
}

impl OutputConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Per-kind throttle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "KindThrottle::silent")]
    pub drone: KindThrottle,

    #[serde(default = "KindThrottle::annotated")]
    pub pilot: KindThrottle,

    #[serde(default = "KindThrottle::annotated")]
    pub home: KindThrottle,

    /// Systems always annotate; `annotate` is ignored here.
    #[serde(default = "KindThrottle::annotated")]
    pub system: KindThrottle,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            drone: KindThrottle::silent(),
            pilot: KindThrottle::annotated(),
            home: KindThrottle::annotated(),
            system: KindThrottle::annotated(),
        }
    }
}

impl ThrottleConfig {
    pub fn for_kind(&self, kind: TransmitterKind) -> &KindThrottle {
        match kind {
            TransmitterKind::Drone => &self.drone,
            TransmitterKind::Pilot => &self.pilot,
            TransmitterKind::Home => &self.home,
            TransmitterKind::System => &self.system,
        }
    }

    pub fn for_kind_mut(&mut self, kind: TransmitterKind) -> &mut KindThrottle {
        match kind {
            TransmitterKind::Drone => &mut self.drone,
            TransmitterKind::Pilot => &mut self.pilot,
            TransmitterKind::Home => &mut self.home,
            TransmitterKind::System => &mut self.system,
        }
    }

    /// Scheduler policies.
    pub fn policies(&self) -> ThrottlePolicies {
        ThrottlePolicies {
            drone: ThrottlePolicy::from(&self.drone),
            pilot: ThrottlePolicy::from(&self.pilot),
            home: ThrottlePolicy::from(&self.home),
            system: ThrottlePolicy::from(&self.system),
        }
    }
}

/// Throttle settings for one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindThrottle {
    #[serde(default = "default_pli_interval")]
    pub pli_interval_ms: u64,

    #[serde(default = "default_geo_interval")]
    pub geo_interval_ms: u64,

    #[serde(default)]
    pub annotate: bool,
}

fn default_pli_interval() -> u64 {
    1000
}

fn default_geo_interval() -> u64 {
    10_000
}

impl KindThrottle {
    fn silent() -> Self {
        Self {
            pli_interval_ms: default_pli_interval(),
            geo_interval_ms: default_geo_interval(),
            annotate: false,
        }
    }

    fn annotated() -> Self {
        Self {
            annotate: true,
            ..Self::silent()
        }
    }
}

impl From<&KindThrottle> for ThrottlePolicy {
    fn from(t: &KindThrottle) -> Self {
        ThrottlePolicy::new(
            Duration::from_millis(t.pli_interval_ms),
            Duration::from_millis(t.geo_interval_ms),
            t.annotate,
        )
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DragonSync Remote-ID relay
//!
//! Tracks drones, their pilots and home points, and sensor stations from two
//! JSON feeds, and relays them as rate-limited ATAK packets over a single
//! Meshtastic radio.
//!
//! # Features
//!
//! - **Burst Classification**: Remote-ID block and flat drone bursts, system status
//! - **Identity Resolution**: CAA registration codes buffered until the serial is known
//! - **Per-kind Throttling**: independent PLI and GeoChat intervals
//! - **Exclusive Output**: one packet in flight on the radio at a time
//!
//! # Quick Start
//!
//! ```bash
//! # Auto-detect the radio, default feed ports
//! dragonsync-relay
//!
//! # Explicit port, log frames instead of writing
//! dragonsync-relay --port /dev/ttyACM0 --dry-run
//!
//! # Using config file
//! dragonsync-relay --config relay.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! flush_interval_ms = 1000
//! stale_timeout_secs = 60
//!
//! [feeds.drone]
//! bind = "0.0.0.0:4224"
//!
//! [output]
//! device = "/dev/ttyACM0"
//!
//! [throttle.system]
//! geo_interval_ms = 10000
//! ```

pub mod classifier;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod feed;
pub mod identity;
pub mod output;
pub mod proto;
pub mod registry;
pub mod relay;
pub mod scheduler;
pub mod stats;
pub mod update;

pub use classifier::{Burst, BurstClassifier, ClassifyError};
pub use config::{ConfigError, FeedConfig, OutputConfig, RelayConfig};
pub use encoder::{EncodedPacket, PacketEncoder, PacketKind};
pub use engine::{FlushReport, RelayEngine};
pub use identity::{IdentityResolver, PendingIdentity, ResolvedUpdate};
pub use output::{DryRunLink, OutputError, OutputSerializer, PacketLink, SerialLink};
pub use registry::{ApplyOutcome, TransmitterRecord, TransmitterRegistry, TransmitterTracker};
pub use relay::{Relay, RelayError, RelayHandle};
pub use scheduler::{FlushPlan, FlushScheduler, ThrottlePolicies, ThrottlePolicy};
pub use stats::{RelayStats, RelayStatsSnapshot};
pub use update::{IdentityKeys, Position, TransmitterKind, TransmitterUpdate};

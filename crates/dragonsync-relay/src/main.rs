// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DragonSync relay CLI
//!
//! Relays Remote-ID and sensor-station feeds to a Meshtastic radio as ATAK
//! packets.
//!
//! # Usage
//!
//! ```bash
//! # Auto-detect the radio
//! dragonsync-relay
//!
//! # Explicit serial port
//! dragonsync-relay --port /dev/ttyUSB0
//!
//! # Listen on a multicast group for drone bursts
//! dragonsync-relay --drone-bind 0.0.0.0:6969 --drone-group 239.2.3.1
//!
//! # Log frames instead of writing them
//! dragonsync-relay --dry-run --log-level debug
//!
//! # Using configuration file
//! dragonsync-relay --config relay.toml
//! ```

use clap::{Parser, Subcommand};
use dragonsync_relay::{Relay, RelayConfig, RelayStatsSnapshot, TransmitterKind};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// DragonSync Remote-ID to Meshtastic relay
#[derive(Parser, Debug)]
#[command(name = "dragonsync-relay")]
#[command(about = "Relay Remote-ID and sensor status feeds to a Meshtastic radio as ATAK packets")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the radio (auto-detected when omitted)
    #[arg(short, long)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Log frames instead of writing them to the radio
    #[arg(long)]
    dry_run: bool,

    /// Drone feed bind address
    #[arg(long)]
    drone_bind: Option<SocketAddr>,

    /// Drone feed multicast group
    #[arg(long)]
    drone_group: Option<Ipv4Addr>,

    /// System feed bind address
    #[arg(long)]
    system_bind: Option<SocketAddr>,

    /// System feed multicast group
    #[arg(long)]
    system_group: Option<Ipv4Addr>,

    /// Seconds of silence before a transmitter is dropped
    #[arg(long)]
    stale_timeout: Option<u64>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "relay.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        init_logging(args.log_level.as_deref().unwrap_or("info"));
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    init_logging(&config.log_level);

    let mut relay = Relay::new(config)?;

    println!("DragonSync Relay v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();

    let handle = relay.start().await?;
    println!("Drone feed:  {}", handle.drone_addr());
    println!("System feed: {}", handle.system_addr());
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    // Stats reporting task
    let stats_interval = relay.config().stats_interval_secs;
    let stats_handle = handle.clone();
    if stats_interval > 0 {
        tokio::spawn(async move {
            let period = Duration::from_secs(stats_interval);
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if !stats_handle.is_running() {
                    break;
                }
                print_stats(&stats_handle.stats());
            }
        });
    }

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    handle.stop();

    let stats = handle.wait().await?;
    println!("\nFinal Statistics:");
    print_stats(&stats);

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_config(args: &Args) -> Result<RelayConfig, dragonsync_relay::ConfigError> {
    let mut config = match args.config {
        Some(ref path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };

    if let Some(ref port) = args.port {
        config.output.device = Some(port.clone());
    }
    if let Some(baud) = args.baud {
        config.output.baud_rate = baud;
    }
    if args.dry_run {
        config.output.dry_run = true;
    }
    if let Some(bind) = args.drone_bind {
        config.feeds.drone.bind = bind;
    }
    if let Some(group) = args.drone_group {
        config.feeds.drone.multicast_group = Some(group);
    }
    if let Some(bind) = args.system_bind {
        config.feeds.system.bind = bind;
    }
    if let Some(group) = args.system_group {
        config.feeds.system.multicast_group = Some(group);
    }
    if let Some(secs) = args.stale_timeout {
        config.stale_timeout_secs = secs;
    }
    if let Some(secs) = args.stats_interval {
        config.stats_interval_secs = secs;
    }
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig::default()
        .with_device("/dev/ttyACM0")
        .with_throttle(
            TransmitterKind::System,
            Duration::from_secs(1),
            Duration::from_secs(30),
        );

    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# DragonSync Relay Configuration
# Generated by dragonsync-relay gen-config
#
# Remove [output].device to auto-detect the first USB serial port.
# [throttle.drone].annotate must stay false; systems always annotate.

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match RelayConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Relay:  {}", config.name);
            println!(
                "Output: {}{}",
                config.output.device.as_deref().unwrap_or("auto-detect"),
                if config.output.dry_run { " (dry-run)" } else { "" }
            );
            println!("Drone feed:  {}", config.feeds.drone.bind);
            println!("System feed: {}", config.feeds.system.bind);
            for kind in TransmitterKind::ALL {
                let t = config.throttle.for_kind(kind);
                println!(
                    "  [{}] PLI every {} ms, GeoChat every {} ms{}",
                    kind,
                    t.pli_interval_ms,
                    t.geo_interval_ms,
                    if config.throttle.policies().annotates(kind) {
                        ""
                    } else {
                        " (no GeoChat)"
                    }
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &RelayStatsSnapshot) {
    println!("--- Relay Statistics ---");
    println!(
        "  Feeds: {} bursts ({} malformed), {} applied, {} unresolved",
        stats.bursts_received, stats.bursts_malformed, stats.updates_applied, stats.updates_unresolved
    );
    println!(
        "  Tracking: {} active ({} created, {} evicted, {} pending dropped)",
        stats.records_active(),
        stats.records_created,
        stats.records_evicted,
        stats.pending_dropped
    );
    println!(
        "  Output: {} PLI, {} GeoChat ({:.1} pkt/s), {} failures",
        stats.pli_sent,
        stats.geo_sent,
        stats.packets_per_second(),
        stats.send_failures
    );
}

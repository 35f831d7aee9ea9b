// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Identity resolver and callsign naming.
//!
//! Drones broadcast two disjoint identity spaces: an ephemeral hardware
//! address and a permanent serial number, with an optional CAA registration
//! code sent in a separate burst. A record is only created once the serial
//! for a hardware address has been seen; a registration code that arrives
//! first is held as a [`PendingIdentity`] until then.

use crate::update::{TransmitterKind, TransmitterUpdate};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Maximum callsign length carried on the wire.
pub const MAX_CALLSIGN_LEN: usize = 120;

const SHORT_SUFFIX_LEN: usize = 4;

const KNOWN_PREFIXES: [&str; 4] = ["wardragon-", "drone-", "pilot-", "home-"];

/// Truncate to at most `max` characters.
pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Full callsign for a transmitter: kind prefix + identifier.
///
/// The prefix is not doubled when the identifier already carries it.
pub fn full_callsign(kind: TransmitterKind, id: &str) -> String {
    let prefix = kind.callsign_prefix();
    let full = if id.starts_with(prefix) {
        id.to_string()
    } else {
        format!("{}{}", prefix, id)
    };
    truncate_chars(&full, MAX_CALLSIGN_LEN)
}

/// Shortened callsign: known prefix + last four characters of the rest,
/// or the last four characters when no known prefix applies.
pub fn shorten_callsign(callsign: &str) -> String {
    for prefix in KNOWN_PREFIXES {
        if let Some(rest) = callsign.strip_prefix(prefix) {
            return format!("{}{}", prefix, last_chars(rest, SHORT_SUFFIX_LEN));
        }
    }
    last_chars(callsign, SHORT_SUFFIX_LEN)
}

fn last_chars(value: &str, n: usize) -> String {
    let count = value.chars().count();
    value.chars().skip(count.saturating_sub(n)).collect()
}

/// A registration code waiting for its serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIdentity {
    pub registration: String,
    pub arrived: Instant,
}

#[derive(Debug, Clone)]
struct Binding {
    serial: String,
    seen: Instant,
}

/// An update whose identity has been resolved to a registry key.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUpdate {
    /// Registry key (shortened callsign).
    pub key: String,
    /// Full callsign.
    pub callsign: String,
    /// The update, with serial and any buffered registration filled in.
    pub update: TransmitterUpdate,
}

impl ResolvedUpdate {
    fn new(update: TransmitterUpdate, id: &str) -> Self {
        let callsign = full_callsign(update.kind, id);
        Self {
            key: shorten_callsign(&callsign),
            callsign,
            update,
        }
    }
}

/// Reconciles hardware addresses with serial numbers and buffers early
/// registration codes.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    /// Hardware address -> last serial seen with it.
    bindings: HashMap<String, Binding>,
    /// Hardware address -> registration code seen before any serial.
    pending: HashMap<String, PendingIdentity>,
}

impl IdentityResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an update to its registry key.
    ///
    /// Returns `None` when the update cannot be attributed yet. A drone
    /// registration code for an unknown hardware address is buffered.
    pub fn resolve(&mut self, mut update: TransmitterUpdate, now: Instant) -> Option<ResolvedUpdate> {
        if update.kind == TransmitterKind::System {
            let id = update.identity.serial.clone()?;
            return Some(ResolvedUpdate::new(update, &id));
        }

        let mac = update.identity.mac.clone();

        if let Some(serial) = update.identity.serial.clone() {
            if let Some(mac) = mac {
                if let Some(pending) = self.pending.remove(&mac) {
                    tracing::debug!(
                        "Releasing buffered registration {} for {} ({})",
                        pending.registration,
                        mac,
                        serial
                    );
                    if update.identity.registration.is_none() {
                        update.identity.registration = Some(pending.registration);
                    }
                }
                self.bindings.insert(
                    mac,
                    Binding {
                        serial: serial.clone(),
                        seen: now,
                    },
                );
            }
            return Some(ResolvedUpdate::new(update, &serial));
        }

        let mac = mac?;

        if let Some(binding) = self.bindings.get_mut(&mac) {
            binding.seen = now;
            let serial = binding.serial.clone();
            update.identity.serial = Some(serial.clone());
            return Some(ResolvedUpdate::new(update, &serial));
        }

        if update.kind == TransmitterKind::Drone {
            if let Some(registration) = update.identity.registration.clone() {
                tracing::debug!("Buffering registration {} for unknown {}", registration, mac);
                self.pending.insert(
                    mac,
                    PendingIdentity {
                        registration,
                        arrived: now,
                    },
                );
            }
        }
        None
    }

    /// Drop pending entries and bindings idle for longer than `timeout`.
    ///
    /// Returns the number of pending registrations dropped unclaimed.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, p| now.saturating_duration_since(p.arrived) <= timeout);
        self.bindings
            .retain(|_, b| now.saturating_duration_since(b.seen) <= timeout);
        before - self.pending.len()
    }

    /// Buffered registration for a hardware address, if any.
    pub fn pending(&self, mac: &str) -> Option<&PendingIdentity> {
        self.pending.get(&mac.to_ascii_lowercase())
    }

    /// Number of buffered registrations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Serial currently bound to a hardware address.
    pub fn bound_serial(&self, mac: &str) -> Option<&str> {
        self.bindings
            .get(&mac.to_ascii_lowercase())
            .map(|b| b.serial.as_str())
    }
}

//! # Relay Orchestration
//!
//! Two cooperating long-range radios extend the link when the direct path
//! fades: an upstream primary on the main frequency overhears traffic and
//! pushes weak-signal frames over the inter-module serial link to a
//! downstream secondary, which retransmits them on the relay frequency.
//! The ground station listens on both and flips between direct and relay
//! routing with a 3 s / 5-packet hysteresis.
//!
//! Mode state machine (per participating node):
//!
//! ```text
//!            weak RSSI | relay-request bit | always-relay
//!   Direct ────────────────────────────────────────────▶ Relay
//!          ◀────────────────────────────────────────────
//!            30 s inactivity (upstream)
//!            5 consecutive direct packets (ground)
//! ```

use bytes::BytesMut;
use tracing::{debug, info};

use crate::classify::Tier;
use crate::clock::Millis;
use crate::receiver::Overheard;
use crate::scheduler::{DropReason, LbtScheduler};
use crate::serial_link::{SerialFrame, SerialLink};
use crate::stats::RelayStats;
use crate::watchdog::RELAY_ACTIVITY_TIMEOUT_MS;
use crate::wire::{MavHeader, NodeId};

/// Forward an overheard frame when it arrived weaker than this (dBm).
pub const RELAY_RSSI_THRESHOLD_DBM: f32 = -95.0;

/// Ground side: relay mode engages after this long without a direct packet.
pub const NO_DIRECT_PACKETS_TIMEOUT_MS: u64 = 3000;

/// Ground side: direct mode restores after this many consecutive packets.
pub const DIRECT_RESTORE_COUNT: u32 = 5;

/// Drone-side relay-request hysteresis band (rolling RSSI, dBm).
pub const RELAY_REQUEST_ON_DBM: f64 = -100.0;
pub const RELAY_REQUEST_OFF_DBM: f64 = -90.0;

// ─── Mode ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Direct,
    Relay,
}

// ─── Upstream Primary ───────────────────────────────────────────────────────

/// Forwarding policy of the upstream primary radio.
#[derive(Debug, Clone)]
pub struct RelayPolicy {
    /// RSSI below this triggers a forward.
    pub rssi_threshold_dbm: f32,
    /// Forward every overheard frame for the target, regardless of signal.
    pub always_relay: bool,
    /// Node whose traffic is worth relaying (the ground station).
    pub relay_target: NodeId,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        RelayPolicy {
            rssi_threshold_dbm: RELAY_RSSI_THRESHOLD_DBM,
            always_relay: false,
            relay_target: NodeId::GROUND,
        }
    }
}

/// Upstream side: decides which overheard frames cross the serial link.
pub struct UpstreamRelay {
    policy: RelayPolicy,
    mode: RelayMode,
    last_activity: Millis,
    pub stats: RelayStats,
}

impl UpstreamRelay {
    pub fn new(policy: RelayPolicy, now: Millis) -> Self {
        UpstreamRelay {
            policy,
            mode: RelayMode::Direct,
            last_activity: now,
            stats: RelayStats::default(),
        }
    }

    /// Evaluate an overheard frame. Returns the serial wire bytes to push
    /// to the secondary when the frame should be forwarded.
    pub fn handle_overheard(
        &mut self,
        overheard: &Overheard,
        serial: &mut SerialLink,
        now: Millis,
    ) -> Option<BytesMut> {
        self.stats.overheard += 1;

        let frame = &overheard.frame;
        let weak = overheard.rssi_dbm < self.policy.rssi_threshold_dbm;
        let should_forward = frame.dest == self.policy.relay_target
            && (self.policy.always_relay || weak || frame.relay_request);

        if !should_forward {
            return None;
        }

        let wire = serial.encode(frame.src, frame.dest, &frame.payload)?;
        self.stats.forwarded += 1;
        if weak {
            self.stats.weak_signals_detected += 1;
        }
        if self.mode == RelayMode::Direct {
            info!(
                rssi = overheard.rssi_dbm,
                requested = frame.relay_request,
                "relay mode engaged"
            );
        }
        self.mode = RelayMode::Relay;
        self.last_activity = now;
        Some(wire)
    }

    /// Record non-overheard relay traffic (frames coming back from the
    /// secondary for local delivery).
    pub fn note_activity(&mut self, now: Millis) {
        self.last_activity = now;
    }

    /// 30 s inactivity watchdog. Returns true when relay mode just dropped.
    pub fn tick(&mut self, now: Millis) -> bool {
        if self.mode == RelayMode::Relay
            && now.since(self.last_activity) > RELAY_ACTIVITY_TIMEOUT_MS
        {
            self.mode = RelayMode::Direct;
            info!("relay mode released after inactivity");
            return true;
        }
        false
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }
}

// ─── Downstream Secondary ───────────────────────────────────────────────────

/// Secondary side: bridges the serial link and the relay-frequency radio.
#[derive(Default)]
pub struct DownstreamRelay {
    /// Frames re-enqueued for long-range transmission toward the ground.
    pub relayed_out: u64,
    /// Frames from the ground pushed back over the serial link.
    pub relayed_back: u64,
}

impl DownstreamRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame arrived over the serial link from the primary: enqueue it on
    /// the relay-frequency radio toward its original destination, at its
    /// classified tier.
    pub fn on_serial_frame(
        &mut self,
        frame: &SerialFrame,
        scheduler: &mut LbtScheduler,
        now: Millis,
    ) -> Result<Tier, DropReason> {
        let result = scheduler.enqueue(&frame.payload, frame.dest, false, now);
        if result.is_ok() {
            self.relayed_out += 1;
        } else {
            debug!(?result, "relayed frame rejected by scheduler");
        }
        result
    }

    /// A frame arrived on the relay frequency from the far endpoint: wrap
    /// it for the serial link so the primary can deliver it to the host.
    pub fn on_relay_band_frame(
        &mut self,
        src: NodeId,
        dest: NodeId,
        payload: &[u8],
        serial: &mut SerialLink,
    ) -> Option<BytesMut> {
        let wire = serial.encode(src, dest, payload)?;
        self.relayed_back += 1;
        Some(wire)
    }
}

// ─── Ground-Side Mode Control ───────────────────────────────────────────────

/// Which radio(s) an outbound frame should leave on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSelection {
    Primary,
    RelayBand,
    Both,
}

/// Ground-station view of the link: declares relay mode after 3 s of
/// silence on the primary band, restores direct mode after 5 consecutive
/// direct packets from the drone.
pub struct GroundLinkMonitor {
    mode: RelayMode,
    drone_sys_id: u8,
    last_direct: Millis,
    consecutive_direct: u32,
    pub stats: RelayStats,
}

impl GroundLinkMonitor {
    pub fn new(drone_sys_id: u8, now: Millis) -> Self {
        GroundLinkMonitor {
            mode: RelayMode::Direct,
            drone_sys_id,
            last_direct: now,
            consecutive_direct: 0,
            stats: RelayStats::default(),
        }
    }

    /// A payload was delivered on the primary band. Returns true when this
    /// packet restored direct mode.
    pub fn note_primary_packet(&mut self, payload: &[u8], now: Millis) -> bool {
        self.stats.packets_from_primary += 1;

        let from_drone = MavHeader::peek(payload)
            .map(|h| h.sys_id == self.drone_sys_id)
            .unwrap_or(false);
        if !from_drone {
            return false;
        }

        self.last_direct = now;
        self.consecutive_direct += 1;

        if self.mode == RelayMode::Relay && self.consecutive_direct >= DIRECT_RESTORE_COUNT {
            self.mode = RelayMode::Direct;
            self.consecutive_direct = 0;
            info!("direct link restored, leaving relay mode");
            return true;
        }
        false
    }

    /// A payload was delivered on the relay band.
    pub fn note_relay_packet(&mut self) {
        self.stats.packets_from_relay += 1;
    }

    /// Drive the activation timeout. Returns true when relay mode just
    /// engaged.
    pub fn tick(&mut self, now: Millis) -> bool {
        if self.mode == RelayMode::Direct
            && now.since(self.last_direct) > NO_DIRECT_PACKETS_TIMEOUT_MS
        {
            self.mode = RelayMode::Relay;
            self.consecutive_direct = 0;
            self.stats.relay_activations += 1;
            info!("no direct packets, relay mode engaged");
            return true;
        }
        false
    }

    /// Route an outbound frame according to the current mode. Broadcast
    /// goes out on both bands.
    pub fn route_for(&self, dest: NodeId) -> RouteSelection {
        if dest == NodeId::BROADCAST {
            return RouteSelection::Both;
        }
        if dest == NodeId::DRONE && self.mode == RelayMode::Relay {
            return RouteSelection::RelayBand;
        }
        RouteSelection::Primary
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }
}

// ─── Drone-Side Relay Request ───────────────────────────────────────────────

/// Hysteresis on the rolling long-range RSSI: ask for relay below
/// −100 dBm, withdraw the request above −90 dBm, hold in between.
pub struct RelayRequestMonitor {
    active: bool,
}

impl RelayRequestMonitor {
    pub fn new() -> Self {
        RelayRequestMonitor { active: false }
    }

    /// Update from the receiver's rolling RSSI. Returns the current state.
    pub fn update(&mut self, avg_rssi_dbm: Option<f64>) -> bool {
        let Some(rssi) = avg_rssi_dbm else {
            return self.active;
        };
        if !self.active && rssi < RELAY_REQUEST_ON_DBM {
            self.active = true;
            info!(rssi, "weak long-range link, requesting relay");
        } else if self.active && rssi > RELAY_REQUEST_OFF_DBM {
            self.active = false;
            info!(rssi, "long-range link recovered, clearing relay request");
        }
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Default for RelayRequestMonitor {
    fn default() -> Self {
        Self::new()
    }
}

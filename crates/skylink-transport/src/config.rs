//! # Deployment Configuration
//!
//! Everything that varies between nodes of one deployment: identity, peer
//! MAC, radio parameters, relay policy, filtering tables, and queue sizing.
//! Deserializes from TOML via serde; `Default` reproduces the reference
//! drone configuration.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::classify::{Blacklist, RateLimiter, DEFAULT_BLACKLIST};
use crate::queue::{QueuedPacket, TIER_CAPACITIES, TIER_TTLS_MS};
use crate::radio::RadioParams;
use crate::relay::{RelayPolicy, RELAY_RSSI_THRESHOLD_DBM};
use crate::wire::NodeId;

/// Hard ceiling on total queue RAM (bytes).
const QUEUE_RAM_LIMIT: usize = 20 * 1024;

/// Bytes one queued packet occupies (payload plus bookkeeping).
const QUEUE_SLOT_SIZE: usize = std::mem::size_of::<QueuedPacket>();

// ─── Sections ───────────────────────────────────────────────────────────────

/// One rate-limit table entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub msg_id: u8,
    pub min_interval_ms: u64,
}

/// Relay behavior of this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Whether this node participates in relay orchestration at all.
    pub enabled: bool,
    /// Forward every overheard frame for the target, not just weak ones.
    pub always_relay: bool,
    /// RSSI threshold for the weak-signal trigger (dBm).
    pub rssi_threshold_dbm: f32,
    /// Parameters for the co-located relay-frequency radio.
    pub relay_radio: RadioParams,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            enabled: false,
            always_relay: false,
            rssi_threshold_dbm: RELAY_RSSI_THRESHOLD_DBM,
            relay_radio: RadioParams::relay_default(),
        }
    }
}

/// Queue sizing within the limits of the RAM budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacities: [usize; 3],
    pub ttls_ms: [u64; 3],
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            capacities: TIER_CAPACITIES,
            ttls_ms: TIER_TTLS_MS,
        }
    }
}

// ─── Node Config ────────────────────────────────────────────────────────────

/// Full per-node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's on-air identity.
    pub node_id: u8,
    /// Close-range peer MAC address.
    pub peer_mac: [u8; 6],
    /// Primary long-range radio parameters.
    pub radio: RadioParams,
    pub relay: RelayConfig,
    /// Message ids never transmitted or delivered.
    pub blacklist: Vec<u8>,
    /// Per-id minimum enqueue intervals.
    pub rate_limits: Vec<RateLimitEntry>,
    pub queue: QueueConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_id: NodeId::DRONE.0,
            peer_mac: [0; 6],
            radio: RadioParams::default(),
            relay: RelayConfig::default(),
            blacklist: DEFAULT_BLACKLIST.to_vec(),
            rate_limits: vec![
                RateLimitEntry {
                    msg_id: 24,
                    min_interval_ms: 500,
                },
                RateLimitEntry {
                    msg_id: 30,
                    min_interval_ms: 500,
                },
                RateLimitEntry {
                    msg_id: 33,
                    min_interval_ms: 333,
                },
            ],
            queue: QueueConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Check the configuration against the transport's structural limits.
    pub fn validate(&self) -> Result<()> {
        let q = &self.queue;
        for (i, &cap) in q.capacities.iter().enumerate() {
            ensure!(cap >= 2, "tier {i} capacity {cap} leaves no usable slot");
        }
        let ram: usize = q.capacities.iter().sum::<usize>() * QUEUE_SLOT_SIZE;
        ensure!(
            ram <= QUEUE_RAM_LIMIT,
            "queue RAM {ram} bytes exceeds the {QUEUE_RAM_LIMIT}-byte budget"
        );
        ensure!(
            q.ttls_ms[0] <= q.ttls_ms[1] && q.ttls_ms[1] <= q.ttls_ms[2],
            "tier TTLs must be non-decreasing: {:?}",
            q.ttls_ms
        );

        let r = &self.radio;
        ensure!(
            (5..=12).contains(&r.spreading_factor),
            "spreading factor {} out of range",
            r.spreading_factor
        );
        ensure!(
            (5..=8).contains(&r.coding_rate),
            "coding rate {} out of range",
            r.coding_rate
        );
        if self.relay.enabled {
            ensure!(
                self.relay.relay_radio.frequency_mhz != self.radio.frequency_mhz,
                "relay radio must use a distinct frequency"
            );
        }
        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        NodeId(self.node_id)
    }

    pub fn blacklist(&self) -> Blacklist {
        Blacklist::new(&self.blacklist)
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        let entries: Vec<(u8, u64)> = self
            .rate_limits
            .iter()
            .map(|e| (e.msg_id, e.min_interval_ms))
            .collect();
        RateLimiter::with_entries(&entries)
    }

    pub fn relay_policy(&self) -> RelayPolicy {
        RelayPolicy {
            rssi_threshold_dbm: self.relay.rssi_threshold_dbm,
            always_relay: self.relay.always_relay,
            relay_target: NodeId::GROUND,
        }
    }
}

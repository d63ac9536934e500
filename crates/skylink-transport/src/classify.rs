//! # Message Classification
//!
//! Maps a MAVLink message id to everything the send path needs to know:
//! blacklist membership, rate-limit interval, priority tier, and whether the
//! message is essential enough to spend long-range airtime on.
//!
//! Classification order on the send path is fixed: blacklist first, then
//! rate limit, then tier assignment. Each rejection is tracked per id so a
//! stats snapshot can show exactly which message types are being shed.

use serde::Serialize;

use crate::clock::Millis;

// ─── Priority Tiers ─────────────────────────────────────────────────────────

/// Long-range priority tier. The set is closed; every message id maps to
/// exactly one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum Tier {
    /// Commands that directly change vehicle behavior. Lowest latency.
    Critical = 0,
    /// Heartbeat and core situational telemetry.
    Important = 1,
    /// Everything else.
    Routine = 2,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Critical, Tier::Important, Tier::Routine];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Priority tier for a MAVLink message id.
///
/// Tier 0: COMMAND_LONG (76), SET_MODE (11), DO_SET_MODE (176),
/// PARAM_SET (23), MISSION_ITEM (39), MISSION_COUNT (44).
/// Tier 1: HEARTBEAT (0), GPS_RAW_INT (24), ATTITUDE (30),
/// GLOBAL_POSITION_INT (33).
pub fn tier_for(msg_id: u8) -> Tier {
    match msg_id {
        76 | 11 | 176 | 23 | 39 | 44 => Tier::Critical,
        0 | 24 | 30 | 33 => Tier::Important,
        _ => Tier::Routine,
    }
}

// ─── Essential Set ──────────────────────────────────────────────────────────

/// Message ids allowed onto the long-range link by the dual-band fan-out.
///
/// Independent of the tier mapping: VFR_HUD (74), COMMAND_ACK (77),
/// BATTERY_STATUS (147) and STATUSTEXT (253) are essential yet enqueue at
/// Routine.
pub const ESSENTIAL_MESSAGES: [u8; 8] = [0, 30, 33, 74, 76, 77, 147, 253];

#[inline]
pub fn is_essential(msg_id: u8) -> bool {
    ESSENTIAL_MESSAGES.contains(&msg_id)
}

// ─── Blacklist ──────────────────────────────────────────────────────────────

/// High-rate sensor traffic with no value over the long-range link.
/// Dropped before enqueue outbound and before delivery inbound.
pub const DEFAULT_BLACKLIST: [u8; 7] = [27, 88, 100, 106, 129, 132, 241];

/// Deployment-constant message-id blacklist.
#[derive(Debug, Clone)]
pub struct Blacklist {
    listed: [bool; 256],
}

impl Blacklist {
    pub fn new(ids: &[u8]) -> Self {
        let mut listed = [false; 256];
        for &id in ids {
            listed[id as usize] = true;
        }
        Blacklist { listed }
    }

    #[inline]
    pub fn contains(&self, msg_id: u8) -> bool {
        self.listed[msg_id as usize]
    }
}

impl Default for Blacklist {
    fn default() -> Self {
        Blacklist::new(&DEFAULT_BLACKLIST)
    }
}

// ─── Rate Limiting ──────────────────────────────────────────────────────────

/// Minimum interval between accepted enqueues of the same message id.
///
/// ATTITUDE (30) and GPS_RAW_INT (24) at 2 Hz, GLOBAL_POSITION_INT (33)
/// at 3 Hz. Everything else is unlimited.
pub fn min_interval_ms(msg_id: u8) -> Option<u64> {
    match msg_id {
        30 => Some(500),
        24 => Some(500),
        33 => Some(333),
        _ => None,
    }
}

/// Per-id minimum intervals and last-accepted timestamps, indexed by the
/// 8-bit message id. O(1) lookups.
pub struct RateLimiter {
    intervals_ms: [Option<u64>; 256],
    last_accepted: [Option<Millis>; 256],
}

impl RateLimiter {
    /// Limiter with the default interval table.
    pub fn new() -> Self {
        let mut intervals_ms = [None; 256];
        for id in 0..=255u8 {
            intervals_ms[id as usize] = min_interval_ms(id);
        }
        RateLimiter {
            intervals_ms,
            last_accepted: [None; 256],
        }
    }

    /// Limiter with deployment-specific `(msg_id, min_interval_ms)` entries.
    pub fn with_entries(entries: &[(u8, u64)]) -> Self {
        let mut intervals_ms = [None; 256];
        for &(id, interval) in entries {
            intervals_ms[id as usize] = Some(interval);
        }
        RateLimiter {
            intervals_ms,
            last_accepted: [None; 256],
        }
    }

    /// Whether `msg_id` arrived too soon after its last accepted enqueue.
    /// Does not record anything — call [`RateLimiter::note_accepted`] once
    /// the packet is actually admitted.
    pub fn should_limit(&self, msg_id: u8, now: Millis) -> bool {
        let Some(interval) = self.intervals_ms[msg_id as usize] else {
            return false;
        };
        match self.last_accepted[msg_id as usize] {
            Some(last) => now.since(last) < interval,
            None => false,
        }
    }

    pub fn note_accepted(&mut self, msg_id: u8, now: Millis) {
        self.last_accepted[msg_id as usize] = Some(now);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Classifier ─────────────────────────────────────────────────────────────

/// Verdict of the send-path classification chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Blacklisted,
    RateLimited,
    Admit(Tier),
}

/// Send-path classifier: blacklist, then rate limit, then tier.
pub struct Classifier {
    blacklist: Blacklist,
    rate: RateLimiter,
    /// Drops per message id, split by cause.
    pub blacklist_drops: Box<[u32; 256]>,
    pub rate_limit_drops: Box<[u32; 256]>,
}

impl Classifier {
    pub fn new(blacklist: Blacklist) -> Self {
        Self::with_rate_limiter(blacklist, RateLimiter::new())
    }

    pub fn with_rate_limiter(blacklist: Blacklist, rate: RateLimiter) -> Self {
        Classifier {
            blacklist,
            rate,
            blacklist_drops: Box::new([0; 256]),
            rate_limit_drops: Box::new([0; 256]),
        }
    }

    /// Classify an outbound message. Rejections bump the per-id drop
    /// counter. An `Admit` verdict does not yet refresh the rate window —
    /// call [`Classifier::note_accepted`] once the packet actually lands in
    /// a queue, so a queue-full drop cannot starve the next attempt.
    pub fn admit(&mut self, msg_id: u8, now: Millis) -> Admission {
        if self.blacklist.contains(msg_id) {
            self.blacklist_drops[msg_id as usize] += 1;
            return Admission::Blacklisted;
        }
        if self.rate.should_limit(msg_id, now) {
            self.rate_limit_drops[msg_id as usize] += 1;
            return Admission::RateLimited;
        }
        Admission::Admit(tier_for(msg_id))
    }

    /// Record a successful enqueue for rate limiting.
    pub fn note_accepted(&mut self, msg_id: u8, now: Millis) {
        self.rate.note_accepted(msg_id, now);
    }

    /// Receive-side blacklist check (defense in depth against misconfigured
    /// peers; the ground station must never see blacklisted traffic).
    pub fn is_blacklisted(&self, msg_id: u8) -> bool {
        self.blacklist.contains(msg_id)
    }

    pub fn reset_drop_counters(&mut self) {
        self.blacklist_drops.fill(0);
        self.rate_limit_drops.fill(0);
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Classifier::new(Blacklist::default())
    }
}

//! # Long-Range Scheduler
//!
//! Drains the tiered queue onto the radio, one transmission attempt per
//! [`LbtScheduler::step`] call. The policy per invocation:
//!
//! 1. Fairness gates — a minimum 10 ms gap between transmissions, and a
//!    50 ms cooldown after 5 back-to-back sends so a second transmitter on
//!    the channel gets a chance.
//! 2. Strict tier priority — T0, then T1, then T2; FIFO within a tier.
//! 3. Staleness — the head is dropped (not transmitted) once it outlives
//!    its tier TTL.
//! 4. Listen-before-talk — channel activity detection with an RSSI
//!    fallback, and exponential-random backoff while the channel is busy.
//!
//! Reliability is deliberately absent: the payload protocol carries its own
//! acknowledgments, so a frame is transmitted at most once. On a transmit
//! error the head is still popped and counted as a drop, uniformly across
//! tiers; chip-level recovery belongs to the transmit supervisor.

use bytes::Bytes;
use rand::RngExt;
use tracing::{debug, trace};

use crate::classify::{Admission, Classifier, Tier};
use crate::clock::{Millis, Sleeper};
use crate::queue::{QueuedPacket, TieredQueue};
use crate::radio::{ChannelScan, Radio, RadioParams};
use crate::stats::SchedulerStats;
use crate::watchdog::TxSupervisor;
use crate::wire::{AirFrame, MavHeader, NodeId, MAX_PAYLOAD};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Scheduler tuning knobs. Defaults match the reference deployment.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// RSSI below this is "channel clear" when CAD is unavailable (dBm).
    pub rssi_clear_threshold_dbm: f32,
    /// Listen-before-talk sub-attempts per step.
    pub lbt_max_attempts: u32,
    /// Lower edge of every backoff window (ms).
    pub min_backoff_ms: u64,
    /// Backoff window cap (ms).
    pub max_backoff_ms: u64,
    /// Minimum gap between successful transmissions (ms).
    pub min_tx_gap_ms: u64,
    /// Consecutive sends before the cooldown engages.
    pub burst_limit: u32,
    /// Cooldown length once the burst limit is reached (ms).
    pub cooldown_ms: u64,
    /// Idle time after which the consecutive-send counter clears (ms).
    pub idle_reset_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            rssi_clear_threshold_dbm: -90.0,
            lbt_max_attempts: 3,
            min_backoff_ms: 5,
            max_backoff_ms: 100,
            min_tx_gap_ms: 10,
            burst_limit: 5,
            cooldown_ms: 50,
            idle_reset_ms: 100,
        }
    }
}

// ─── Drop Reasons ───────────────────────────────────────────────────────────

/// Why an outbound packet never made it into a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Oversized,
    Blacklisted,
    RateLimited,
    QueueFull(Tier),
}

// ─── Scheduler ──────────────────────────────────────────────────────────────

/// Priority-queued, staleness-aware, listen-before-talk scheduler for one
/// long-range radio.
pub struct LbtScheduler {
    node_id: NodeId,
    config: SchedulerConfig,
    queue: TieredQueue,
    classifier: Classifier,
    supervisor: TxSupervisor,
    last_tx: Option<Millis>,
    consecutive_tx: u32,
    pub stats: SchedulerStats,
}

impl LbtScheduler {
    pub fn new(node_id: NodeId, params: RadioParams) -> Self {
        Self::with_config(
            node_id,
            params,
            SchedulerConfig::default(),
            TieredQueue::new(),
            Classifier::default(),
        )
    }

    pub fn with_config(
        node_id: NodeId,
        params: RadioParams,
        config: SchedulerConfig,
        queue: TieredQueue,
        classifier: Classifier,
    ) -> Self {
        LbtScheduler {
            node_id,
            config,
            queue,
            classifier,
            supervisor: TxSupervisor::new(params),
            last_tx: None,
            consecutive_tx: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Classify and enqueue an outbound MAVLink datagram.
    pub fn enqueue(
        &mut self,
        payload: &[u8],
        dest: NodeId,
        relay_requested: bool,
        now: Millis,
    ) -> Result<Tier, DropReason> {
        if payload.len() > MAX_PAYLOAD {
            return Err(DropReason::Oversized);
        }

        let msg_id = MavHeader::msg_id_or_invalid(payload);
        let tier = match self.classifier.admit(msg_id, now) {
            Admission::Blacklisted => return Err(DropReason::Blacklisted),
            Admission::RateLimited => return Err(DropReason::RateLimited),
            Admission::Admit(tier) => tier,
        };

        let pkt = QueuedPacket::new(payload, dest, tier, now, relay_requested)
            .ok_or(DropReason::Oversized)?;
        if self.queue.enqueue(tier, pkt).is_err() {
            self.stats.dropped_full[tier.index()] += 1;
            return Err(DropReason::QueueFull(tier));
        }
        self.classifier.note_accepted(msg_id, now);
        Ok(tier)
    }

    /// One transmission attempt. Returns promptly; may block for backoff
    /// sleeps (bounded by `lbt_max_attempts * max_backoff_ms`).
    pub fn step(&mut self, radio: &mut dyn Radio, sleeper: &mut dyn Sleeper, now: Millis) {
        // Fairness gates.
        if let Some(last) = self.last_tx {
            let since = now.since(last);
            if since < self.config.min_tx_gap_ms {
                return;
            }
            if self.consecutive_tx >= self.config.burst_limit && since < self.config.cooldown_ms {
                return;
            }
            if since > self.config.idle_reset_ms {
                self.consecutive_tx = 0;
            }
        }

        let Some(tier) = self.queue.first_nonempty() else {
            self.consecutive_tx = 0;
            return;
        };

        // Staleness is checked at dispatch, against the head only.
        let ttl = self.queue.ttl_ms(tier);
        let head_stale = self
            .queue
            .peek_head(tier)
            .map(|head| head.is_stale(now, ttl))
            .unwrap_or(false);
        if head_stale {
            self.queue.drop_head(tier);
            self.stats.dropped_stale[tier.index()] += 1;
            debug!(tier = tier.index(), "dropped stale head packet");
            return;
        }

        // Listen-before-talk with exponential-random backoff.
        for attempt in 0..self.config.lbt_max_attempts {
            if self.channel_clear(radio) {
                self.transmit_head(radio, sleeper, tier, now);
                return;
            }
            let window = (self.config.min_backoff_ms << (attempt + 1))
                .min(self.config.max_backoff_ms);
            let backoff = rand::rng().random_range(self.config.min_backoff_ms..=window);
            trace!(attempt, backoff, "channel busy, backing off");
            sleeper.sleep_ms(backoff);
            self.stats.backoff_events += 1;
        }
        // Channel stayed busy; the head remains queued for the next step.
    }

    /// Standby → CAD → receive. Falls back to an RSSI read when the chip
    /// cannot run CAD.
    fn channel_clear(&mut self, radio: &mut dyn Radio) -> bool {
        radio.standby();
        let scan = radio.scan_channel();
        radio.start_receive();

        match scan {
            Ok(ChannelScan::Clear) => {
                self.stats.cad_successes += 1;
                true
            }
            Ok(ChannelScan::PreambleDetected) => {
                self.stats.cad_failures += 1;
                self.stats.channel_busy_detections += 1;
                false
            }
            Err(_) => {
                self.stats.cad_failures += 1;
                if radio.rssi() < self.config.rssi_clear_threshold_dbm {
                    true
                } else {
                    self.stats.channel_busy_detections += 1;
                    false
                }
            }
        }
    }

    fn transmit_head(
        &mut self,
        radio: &mut dyn Radio,
        sleeper: &mut dyn Sleeper,
        tier: Tier,
        now: Millis,
    ) {
        let Some(head) = self.queue.peek_head(tier) else {
            return;
        };
        let frame = AirFrame {
            src: self.node_id,
            dest: head.dest,
            relay_request: head.relay_requested,
            payload: Bytes::copy_from_slice(head.payload()),
        };
        let wire = frame.encode();

        let result = self.supervisor.transmit(radio, sleeper, &wire);
        radio.start_receive();
        // Sent once, or charged to the failure counter: either way the head
        // is consumed (uniform across tiers).
        self.queue.drop_head(tier);

        match result {
            Ok(()) => {
                self.stats.packets_sent += 1;
                self.last_tx = Some(now);
                self.consecutive_tx += 1;
            }
            Err(err) => {
                self.stats.transmission_failures += 1;
                debug!(error = %err, tier = tier.index(), "transmit failed, packet dropped");
            }
        }
    }

    /// Drain every queue (shutdown). Returns the number discarded.
    pub fn drain(&mut self) -> usize {
        self.queue.clear()
    }

    pub fn queue(&self) -> &TieredQueue {
        &self.queue
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn supervisor(&self) -> &TxSupervisor {
        &self.supervisor
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Zero every counter. Queue contents are untouched.
    pub fn reset_stats(&mut self) {
        self.stats = SchedulerStats::default();
        self.classifier.reset_drop_counters();
    }
}

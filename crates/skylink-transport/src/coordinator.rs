//! # Dual-Band Coordinator
//!
//! The composer over the two links. Outbound, every MAVLink datagram goes
//! to the close-range path; only the essential subset additionally spends
//! long-range airtime. Inbound, close-range is polled first and a per-system
//! dedup table drops the second copy of anything that arrived on both bands.
//!
//! A 5 ms spacing sleep separates the two transmits when both paths fire —
//! back-to-back radio bursts brown out the shared supply on the reference
//! hardware. Simulation sleepers make it free.

use tracing::{debug, info};

use crate::classify::{is_essential, Blacklist, Classifier};
use crate::close_range::{CloseRangeDriver, CloseRangeTransport, PeerEdge};
use crate::clock::{Millis, Sleeper};
use crate::queue::TieredQueue;
use crate::radio::{Radio, RadioParams};
use crate::receiver::{LongRangeReceiver, Overheard, RxDispatch};
use crate::scheduler::{LbtScheduler, SchedulerConfig};
use crate::stats::{CoordinatorStats, TransportSnapshot};
use crate::wire::{MavHeader, NodeId};

/// Spacing between the close-range send and the long-range enqueue when
/// both paths are used (hardware power-supply guard).
pub const INTER_TRANSPORT_GAP_MS: u64 = 5;

// ─── Deduplication ──────────────────────────────────────────────────────────

/// Last delivered MAVLink sequence per system id.
///
/// A frame is a duplicate only on an exact sequence match. A forward
/// distance in (0, 128) is new; anything further is treated as
/// out-of-order/wraparound and accepted as well. Accepting always advances
/// the record.
pub struct DedupTable {
    last_seq: [Option<u8>; 256],
}

impl DedupTable {
    pub fn new() -> Self {
        DedupTable {
            last_seq: [None; 256],
        }
    }

    /// Returns true when `(sys_id, seq)` is an exact duplicate.
    pub fn is_duplicate(&mut self, sys_id: u8, seq: u8) -> bool {
        let slot = &mut self.last_seq[sys_id as usize];
        match *slot {
            None => {
                *slot = Some(seq);
                false
            }
            Some(last) => {
                let distance = seq.wrapping_sub(last);
                if distance == 0 {
                    true
                } else {
                    // Forward (< 128) and backward/wraparound alike advance.
                    *slot = Some(seq);
                    false
                }
            }
        }
    }
}

impl Default for DedupTable {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Send Outcome ───────────────────────────────────────────────────────────

/// Result of a dual-band send: which paths accepted the datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted {
        close_range: bool,
        long_range: bool,
    },
    /// Neither path took it.
    Rejected,
}

impl SendOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SendOutcome::Accepted { .. })
    }
}

// ─── Coordinator ────────────────────────────────────────────────────────────

/// Fan-out sender and deduplicating receiver over both links.
pub struct DualBandCoordinator<D: CloseRangeDriver> {
    close: CloseRangeTransport<D>,
    scheduler: LbtScheduler,
    lora_rx: LongRangeReceiver,
    dedup: DedupTable,
    pub stats: CoordinatorStats,
}

impl<D: CloseRangeDriver> DualBandCoordinator<D> {
    pub fn new(
        node_id: NodeId,
        driver: D,
        peer_mac: [u8; 6],
        params: RadioParams,
        blacklist: Blacklist,
        relay_enabled: bool,
    ) -> Self {
        let scheduler = LbtScheduler::with_config(
            node_id,
            params,
            SchedulerConfig::default(),
            TieredQueue::new(),
            Classifier::new(blacklist.clone()),
        );
        DualBandCoordinator {
            close: CloseRangeTransport::new(driver, peer_mac),
            scheduler,
            lora_rx: LongRangeReceiver::new(node_id, blacklist, relay_enabled),
            dedup: DedupTable::new(),
            stats: CoordinatorStats::default(),
        }
    }

    /// Send one MAVLink datagram: close-range always, long-range when the
    /// message id is in the essential set.
    pub fn send(
        &mut self,
        payload: &[u8],
        dest: NodeId,
        relay_requested: bool,
        sleeper: &mut dyn Sleeper,
        now: Millis,
    ) -> SendOutcome {
        let msg_id = MavHeader::msg_id_or_invalid(payload);
        let essential = is_essential(msg_id);

        let close_ok = self.close.send(payload).is_ok();

        if !essential {
            self.stats.lora_filtered_messages += 1;
            return if close_ok {
                SendOutcome::Accepted {
                    close_range: true,
                    long_range: false,
                }
            } else {
                SendOutcome::Rejected
            };
        }

        if close_ok {
            sleeper.sleep_ms(INTER_TRANSPORT_GAP_MS);
        }

        let long_ok = match self.scheduler.enqueue(payload, dest, relay_requested, now) {
            Ok(_) => true,
            Err(reason) => {
                debug!(msg_id, ?reason, "long-range enqueue rejected");
                false
            }
        };

        if close_ok || long_ok {
            SendOutcome::Accepted {
                close_range: close_ok,
                long_range: long_ok,
            }
        } else {
            SendOutcome::Rejected
        }
    }

    /// Receive one datagram, close-range first, deduplicated across bands.
    /// A consumed duplicate returns 0.
    pub fn receive(&mut self, buf: &mut [u8], now: Millis) -> usize {
        if self.close.available() {
            let n = self.close.receive(buf, now);
            if n > 0 {
                return self.dedup_filter(buf, n);
            }
        }

        if self.lora_rx.available() {
            let n = self.lora_rx.receive(buf);
            if n > 0 {
                return self.dedup_filter(buf, n);
            }
        }

        0
    }

    fn dedup_filter(&mut self, buf: &[u8], n: usize) -> usize {
        if let Some(header) = MavHeader::peek(&buf[..n]) {
            if self.dedup.is_duplicate(header.sys_id, header.seq) {
                self.stats.duplicate_packets_dropped += 1;
                return 0;
            }
        }
        n
    }

    /// Drive both links: long-range scheduling plus close-range
    /// reachability, logging link-state edges.
    pub fn process(&mut self, radio: &mut dyn Radio, sleeper: &mut dyn Sleeper, now: Millis) {
        self.scheduler.step(radio, sleeper, now);

        match self.close.process(now) {
            Some(PeerEdge::Acquired) => {
                self.stats.peer_acquired_transitions += 1;
                info!(event = "ESPNOW_IN_RANGE", "close-range peer in range");
            }
            Some(PeerEdge::Lost) => {
                self.stats.peer_lost_transitions += 1;
                info!(event = "ESPNOW_OUT_OF_RANGE", "close-range peer out of range");
            }
            None => {}
        }
    }

    /// Long-range packet-ready entry point. Returns the overheard frame
    /// when the receiver hands one to the relay orchestrator.
    pub fn on_lora_packet_ready(&mut self, radio: &mut dyn Radio) -> Option<Overheard> {
        match self.lora_rx.on_packet_ready(radio) {
            RxDispatch::ForRelay(overheard) => Some(overheard),
            _ => None,
        }
    }

    pub fn is_close_range_available(&self) -> bool {
        self.close.is_peer_reachable()
    }

    pub fn close(&self) -> &CloseRangeTransport<D> {
        &self.close
    }

    pub fn close_mut(&mut self) -> &mut CloseRangeTransport<D> {
        &mut self.close
    }

    pub fn scheduler(&self) -> &LbtScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut LbtScheduler {
        &mut self.scheduler
    }

    pub fn lora_rx_mut(&mut self) -> &mut LongRangeReceiver {
        &mut self.lora_rx
    }

    /// Copy every component's counters into one report.
    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            scheduler: self.scheduler.stats.clone(),
            long_range_rx: self.lora_rx.snapshot(),
            close_range: self.close.snapshot(),
            coordinator: self.stats.clone(),
        }
    }

    pub fn reset_stats(&mut self) {
        self.scheduler.reset_stats();
        self.lora_rx.reset_stats();
        self.close.reset_stats();
        self.stats = CoordinatorStats::default();
    }
}

//! # Close-Range Transport
//!
//! Single-peer connectionless datagram layer over an ESP-NOW-class driver.
//! High bandwidth, short reach — the dual-band coordinator sends everything
//! here and falls back to the long-range link for essentials only.
//!
//! Reception is callback-driven and may execute on a different hardware
//! context than the main loop, so the receive path is a single-slot
//! cross-context handoff: the driver writes the buffer, then publishes the
//! ready flag; the main loop observes the flag, then reads the buffer. A
//! frame arriving while the slot is occupied is dropped and counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::clock::Millis;
use crate::stats::CloseRangeStats;
use crate::wire::MAX_PAYLOAD;

/// Peer considered unreachable after this long without a reception.
pub const PEER_TIMEOUT_MS: u64 = 3000;

// ─── Driver Contract ────────────────────────────────────────────────────────

/// Close-range send failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseRangeError {
    /// Payload exceeds the 250-byte datagram limit.
    Oversized,
    /// The driver refused the send (radio busy, peer table full, ...).
    DriverRejected,
}

impl std::fmt::Display for CloseRangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseRangeError::Oversized => f.write_str("payload exceeds 250 bytes"),
            CloseRangeError::DriverRejected => f.write_str("driver rejected send"),
        }
    }
}

impl std::error::Error for CloseRangeError {}

/// The one operation the transport needs from the platform driver. Frame
/// reception and send-status callbacks are wired by platform glue into
/// [`SharedRxSlot::deliver`] and [`CloseRangeTransport::note_send_status`].
pub trait CloseRangeDriver {
    /// Non-blocking datagram send to the configured peer.
    fn send(&mut self, data: &[u8]) -> Result<(), CloseRangeError>;
}

// ─── Shared Receive Slot ────────────────────────────────────────────────────

struct SlotInner {
    buf: Mutex<([u8; MAX_PAYLOAD], u8, i8)>,
    /// Published after the buffer write; read before the buffer read.
    ready: AtomicBool,
    /// Any delivery attempt since the last `process` call, including ones
    /// dropped on overflow — reachability tracks the link, not the slot.
    activity: AtomicBool,
    overruns: AtomicU64,
}

/// Handle given to the driver's receive callback. Cloneable; the callback
/// context keeps one clone, the transport keeps the other.
#[derive(Clone)]
pub struct SharedRxSlot {
    inner: Arc<SlotInner>,
}

impl SharedRxSlot {
    pub fn new() -> Self {
        SharedRxSlot {
            inner: Arc::new(SlotInner {
                buf: Mutex::new(([0u8; MAX_PAYLOAD], 0, 0)),
                ready: AtomicBool::new(false),
                activity: AtomicBool::new(false),
                overruns: AtomicU64::new(0),
            }),
        }
    }

    /// Called from the driver's receive context. Drops the frame when the
    /// slot is still occupied or the payload is oversized.
    pub fn deliver(&self, data: &[u8], rssi_dbm: i8) {
        self.inner.activity.store(true, Ordering::Release);
        if data.len() > MAX_PAYLOAD {
            return;
        }
        if self.inner.ready.load(Ordering::Acquire) {
            self.inner.overruns.fetch_add(1, Ordering::Relaxed);
            return;
        }
        {
            let mut slot = self.inner.buf.lock().unwrap();
            slot.0[..data.len()].copy_from_slice(data);
            slot.1 = data.len() as u8;
            slot.2 = rssi_dbm;
        }
        // Publish only after the buffer is committed.
        self.inner.ready.store(true, Ordering::Release);
    }

    /// Main-loop side: pop the pending frame, if any. Returns the byte
    /// count and the RSSI recorded at delivery.
    pub fn try_take(&self, buf: &mut [u8]) -> Option<(usize, i8)> {
        if !self.inner.ready.load(Ordering::Acquire) {
            return None;
        }
        let (n, rssi) = {
            let slot = self.inner.buf.lock().unwrap();
            let n = (slot.1 as usize).min(buf.len());
            buf[..n].copy_from_slice(&slot.0[..n]);
            (n, slot.2)
        };
        self.inner.ready.store(false, Ordering::Release);
        Some((n, rssi))
    }

    fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    fn take_activity(&self) -> bool {
        self.inner.activity.swap(false, Ordering::AcqRel)
    }

    fn overruns(&self) -> u64 {
        self.inner.overruns.load(Ordering::Relaxed)
    }
}

impl Default for SharedRxSlot {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Link Edges ─────────────────────────────────────────────────────────────

/// Peer reachability transition reported by [`CloseRangeTransport::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEdge {
    Acquired,
    Lost,
}

// ─── Transport ──────────────────────────────────────────────────────────────

/// Close-range datagram transport bound to a single peer MAC.
pub struct CloseRangeTransport<D: CloseRangeDriver> {
    driver: D,
    peer_mac: [u8; 6],
    rx: SharedRxSlot,
    last_rx: Option<Millis>,
    reachable: bool,
    stats: CloseRangeStats,
}

impl<D: CloseRangeDriver> CloseRangeTransport<D> {
    pub fn new(driver: D, peer_mac: [u8; 6]) -> Self {
        CloseRangeTransport {
            driver,
            peer_mac,
            rx: SharedRxSlot::new(),
            last_rx: None,
            reachable: false,
            stats: CloseRangeStats::default(),
        }
    }

    /// Handle for the platform receive callback.
    pub fn rx_slot(&self) -> SharedRxSlot {
        self.rx.clone()
    }

    /// Send one datagram to the peer.
    pub fn send(&mut self, data: &[u8]) -> Result<(), CloseRangeError> {
        if data.len() > MAX_PAYLOAD {
            return Err(CloseRangeError::Oversized);
        }
        match self.driver.send(data) {
            Ok(()) => {
                self.stats.packets_sent += 1;
                Ok(())
            }
            Err(err) => {
                self.stats.send_failures += 1;
                Err(err)
            }
        }
    }

    /// Async send-status callback from the platform glue.
    pub fn note_send_status(&mut self, ok: bool) {
        if !ok {
            self.stats.send_failures += 1;
        }
    }

    pub fn available(&self) -> bool {
        self.rx.is_ready()
    }

    /// Pop the pending frame into `buf`. Updates reception bookkeeping.
    pub fn receive(&mut self, buf: &mut [u8], now: Millis) -> usize {
        match self.rx.try_take(buf) {
            Some((n, rssi)) => {
                self.stats.packets_received += 1;
                self.stats.last_rssi_dbm = rssi;
                self.last_rx = Some(now);
                n
            }
            None => 0,
        }
    }

    /// Drive reachability. Returns the edge when the state flips.
    pub fn process(&mut self, now: Millis) -> Option<PeerEdge> {
        if self.rx.take_activity() {
            self.last_rx = Some(now);
        }

        let in_range = match self.last_rx {
            Some(last) => now.since(last) <= PEER_TIMEOUT_MS,
            None => false,
        };

        match (in_range, self.reachable) {
            (true, false) => {
                self.reachable = true;
                debug!("close-range peer acquired");
                Some(PeerEdge::Acquired)
            }
            (false, true) => {
                self.reachable = false;
                self.stats.peer_unreachable_count += 1;
                debug!("close-range peer lost");
                Some(PeerEdge::Lost)
            }
            _ => None,
        }
    }

    pub fn is_peer_reachable(&self) -> bool {
        self.reachable
    }

    pub fn peer_mac(&self) -> [u8; 6] {
        self.peer_mac
    }

    /// Counter snapshot with the live flags filled in.
    pub fn snapshot(&self) -> CloseRangeStats {
        let mut stats = self.stats.clone();
        stats.peer_reachable = self.reachable;
        stats.rx_overruns = self.rx.overruns();
        stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = CloseRangeStats::default();
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

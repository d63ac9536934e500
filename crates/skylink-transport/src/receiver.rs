//! # Long-Range Receiver
//!
//! Dispatch path for CRC-valid frames coming off the radio. The interrupt
//! hook only raises [`crate::radio::PacketReadyFlag`]; the main loop then
//! calls [`LongRangeReceiver::on_packet_ready`], which reads the chip
//! buffer, parses the air frame, and routes it:
//!
//! - addressed to us (or broadcast) → blacklist check, then into the
//!   single-slot receive buffer (dropped when the slot is still occupied);
//! - addressed to another node → counted as ignored, and surfaced to the
//!   relay orchestrator as an overheard frame when relaying is enabled.
//!
//! The relay-request bit rides along with the overheard frame; it never
//! changes local delivery.

use tracing::trace;

use crate::classify::Blacklist;
use crate::radio::Radio;
use crate::stats::{Ewma, LongRangeRxStats};
use crate::wire::{AirFrame, MavHeader, NodeId, MAX_PAYLOAD};

/// Smoothing factor for the rolling RSSI/SNR averages.
const SIGNAL_EWMA_ALPHA: f64 = 0.125;

// ─── Overheard Frames ───────────────────────────────────────────────────────

/// A frame addressed to someone else, handed to the relay orchestrator.
#[derive(Debug, Clone)]
pub struct Overheard {
    pub frame: AirFrame,
    pub rssi_dbm: f32,
    pub snr_db: f32,
}

/// Outcome of one packet-ready dispatch.
#[derive(Debug)]
pub enum RxDispatch {
    /// Payload copied into the receive slot.
    Delivered,
    /// Message id is blacklisted; payload discarded.
    Blacklisted,
    /// The receive slot was still occupied; payload discarded.
    SlotBusy,
    /// Addressed to another node; relay not enabled for this receiver.
    Ignored,
    /// Addressed to another node; relay decision is the orchestrator's.
    ForRelay(Overheard),
    /// Header did not parse (wrong marker or inconsistent length).
    Invalid,
    /// The chip had nothing for us (spurious interrupt).
    Empty,
}

// ─── Receive Slot ───────────────────────────────────────────────────────────

struct SlotFrame {
    data: [u8; MAX_PAYLOAD],
    len: u8,
}

// ─── Receiver ───────────────────────────────────────────────────────────────

/// Long-range receive path for one radio.
pub struct LongRangeReceiver {
    node_id: NodeId,
    blacklist: Blacklist,
    /// Whether frames for other nodes should be surfaced for relaying.
    relay_enabled: bool,
    slot: Option<SlotFrame>,
    rssi_avg: Ewma,
    snr_avg: Ewma,
    stats: LongRangeRxStats,
}

impl LongRangeReceiver {
    pub fn new(node_id: NodeId, blacklist: Blacklist, relay_enabled: bool) -> Self {
        LongRangeReceiver {
            node_id,
            blacklist,
            relay_enabled,
            slot: None,
            rssi_avg: Ewma::new(SIGNAL_EWMA_ALPHA),
            snr_avg: Ewma::new(SIGNAL_EWMA_ALPHA),
            stats: LongRangeRxStats::default(),
        }
    }

    /// Read and dispatch the pending frame, then re-arm receive.
    pub fn on_packet_ready(&mut self, radio: &mut dyn Radio) -> RxDispatch {
        let mut buf = [0u8; MAX_PAYLOAD + 8];

        let pending = radio.packet_length();
        if pending > buf.len() {
            // Longer than any legal frame; discard without copying.
            self.stats.parse_errors += 1;
            let _ = radio.read_data(&mut buf);
            radio.start_receive();
            return RxDispatch::Invalid;
        }

        let n = match radio.read_data(&mut buf) {
            Ok(0) => {
                radio.start_receive();
                return RxDispatch::Empty;
            }
            Ok(n) => n,
            Err(_) => {
                self.stats.parse_errors += 1;
                radio.start_receive();
                return RxDispatch::Invalid;
            }
        };

        let dispatch = self.dispatch(&buf[..n], radio);
        radio.start_receive();
        dispatch
    }

    fn dispatch(&mut self, raw: &[u8], radio: &mut dyn Radio) -> RxDispatch {
        let Some(frame) = AirFrame::decode(raw) else {
            self.stats.parse_errors += 1;
            return RxDispatch::Invalid;
        };

        let rssi = radio.rssi();
        let snr = radio.snr();
        self.rssi_avg.update(rssi as f64);
        self.snr_avg.update(snr as f64);

        if !self.node_id.accepts(frame.dest) {
            self.stats.ignored += 1;
            trace!(src = frame.src.0, dest = frame.dest.0, "frame not for us");
            if self.relay_enabled {
                return RxDispatch::ForRelay(Overheard {
                    frame,
                    rssi_dbm: rssi,
                    snr_db: snr,
                });
            }
            return RxDispatch::Ignored;
        }

        let msg_id = MavHeader::msg_id_or_invalid(&frame.payload);
        if self.blacklist.contains(msg_id) {
            self.stats.dropped_blacklisted += 1;
            return RxDispatch::Blacklisted;
        }

        if self.slot.is_some() {
            self.stats.rx_overruns += 1;
            return RxDispatch::SlotBusy;
        }

        let mut data = [0u8; MAX_PAYLOAD];
        data[..frame.payload.len()].copy_from_slice(&frame.payload);
        self.slot = Some(SlotFrame {
            data,
            len: frame.payload.len() as u8,
        });
        self.stats.packets_received += 1;
        RxDispatch::Delivered
    }

    /// Whether a received payload is waiting in the slot.
    pub fn available(&self) -> bool {
        self.slot.is_some()
    }

    /// Pop the slot into `buf`, returning the number of bytes copied.
    pub fn receive(&mut self, buf: &mut [u8]) -> usize {
        match self.slot.take() {
            Some(frame) => {
                let n = (frame.len as usize).min(buf.len());
                buf[..n].copy_from_slice(&frame.data[..n]);
                n
            }
            None => 0,
        }
    }

    /// Counter snapshot with the rolling averages filled in.
    pub fn snapshot(&self) -> LongRangeRxStats {
        let mut stats = self.stats.clone();
        stats.avg_rssi_dbm = self.rssi_avg.value();
        stats.avg_snr_db = self.snr_avg.value();
        stats
    }

    /// Rolling RSSI in dBm; `None` before the first frame.
    pub fn avg_rssi_dbm(&self) -> Option<f64> {
        self.rssi_avg.has_samples().then(|| self.rssi_avg.value())
    }

    pub fn reset_stats(&mut self) {
        self.stats = LongRangeRxStats::default();
        self.rssi_avg.reset();
        self.snr_avg.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::testutil::ScriptedRadio;
    use bytes::Bytes;

    fn mav_v1(seq: u8, msg: u8) -> Vec<u8> {
        let mut pkt = vec![0xFEu8, 2, seq, 1, 1, msg];
        pkt.extend_from_slice(&[0u8; 4]);
        pkt
    }

    fn air(src: NodeId, dest: NodeId, payload: &[u8], relay: bool) -> Vec<u8> {
        AirFrame::new(src, dest, Bytes::copy_from_slice(payload), relay)
            .unwrap()
            .encode()
            .to_vec()
    }

    fn receiver(relay: bool) -> LongRangeReceiver {
        LongRangeReceiver::new(NodeId::GROUND, Blacklist::default(), relay)
    }

    #[test]
    fn delivers_addressed_frame() {
        let mut rx = receiver(false);
        let mut radio = ScriptedRadio::new();
        let payload = mav_v1(3, 0);
        radio.inject_frame(&air(NodeId::DRONE, NodeId::GROUND, &payload, false));

        assert!(matches!(
            rx.on_packet_ready(&mut radio),
            RxDispatch::Delivered
        ));
        assert!(rx.available());
        let mut buf = [0u8; MAX_PAYLOAD];
        let n = rx.receive(&mut buf);
        assert_eq!(&buf[..n], payload.as_slice());
        assert!(!rx.available());
        assert_eq!(rx.snapshot().packets_received, 1);
        assert!(radio.receiving);
    }

    #[test]
    fn delivers_broadcast_frame() {
        let mut rx = receiver(false);
        let mut radio = ScriptedRadio::new();
        radio.inject_frame(&air(NodeId::DRONE, NodeId::BROADCAST, &mav_v1(0, 0), false));
        assert!(matches!(
            rx.on_packet_ready(&mut radio),
            RxDispatch::Delivered
        ));
    }

    #[test]
    fn ignores_frame_for_other_node() {
        let mut rx = receiver(false);
        let mut radio = ScriptedRadio::new();
        radio.inject_frame(&air(NodeId::DRONE, NodeId::DRONE_SECONDARY, &mav_v1(0, 0), false));
        assert!(matches!(rx.on_packet_ready(&mut radio), RxDispatch::Ignored));
        assert_eq!(rx.snapshot().ignored, 1);
        assert!(!rx.available());
    }

    #[test]
    fn overheard_frame_surfaces_for_relay() {
        let mut rx = LongRangeReceiver::new(NodeId::DRONE_SECONDARY, Blacklist::default(), true);
        let mut radio = ScriptedRadio::new();
        radio.rssi_dbm = -97.0;
        radio.inject_frame(&air(NodeId::DRONE, NodeId::GROUND, &mav_v1(0, 0), true));

        match rx.on_packet_ready(&mut radio) {
            RxDispatch::ForRelay(overheard) => {
                assert_eq!(overheard.frame.dest, NodeId::GROUND);
                assert!(overheard.frame.relay_request);
                assert_eq!(overheard.rssi_dbm, -97.0);
            }
            other => panic!("expected ForRelay, got {other:?}"),
        }
        assert_eq!(rx.snapshot().ignored, 1);
    }

    #[test]
    fn blacklisted_payload_dropped_before_slot() {
        let mut rx = receiver(false);
        let mut radio = ScriptedRadio::new();
        radio.inject_frame(&air(NodeId::DRONE, NodeId::GROUND, &mav_v1(0, 27), false));
        assert!(matches!(
            rx.on_packet_ready(&mut radio),
            RxDispatch::Blacklisted
        ));
        assert!(!rx.available());
        assert_eq!(rx.snapshot().dropped_blacklisted, 1);
    }

    #[test]
    fn occupied_slot_drops_second_frame() {
        let mut rx = receiver(false);
        let mut radio = ScriptedRadio::new();
        radio.inject_frame(&air(NodeId::DRONE, NodeId::GROUND, &mav_v1(0, 0), false));
        rx.on_packet_ready(&mut radio);

        radio.inject_frame(&air(NodeId::DRONE, NodeId::GROUND, &mav_v1(1, 0), false));
        assert!(matches!(rx.on_packet_ready(&mut radio), RxDispatch::SlotBusy));
        assert_eq!(rx.snapshot().rx_overruns, 1);

        // The first payload is the one delivered.
        let mut buf = [0u8; MAX_PAYLOAD];
        let n = rx.receive(&mut buf);
        assert_eq!(buf[2], 0, "seq of the first frame");
        assert!(n > 0);
    }

    #[test]
    fn oversized_chip_frame_discarded_without_parsing() {
        let mut rx = receiver(false);
        let mut radio = ScriptedRadio::new();
        radio.inject_frame(&vec![0u8; 300]);
        assert!(matches!(rx.on_packet_ready(&mut radio), RxDispatch::Invalid));
        assert_eq!(rx.snapshot().parse_errors, 1);
        assert!(radio.receiving);
    }

    #[test]
    fn invalid_marker_counts_parse_error() {
        let mut rx = receiver(false);
        let mut radio = ScriptedRadio::new();
        radio.inject_frame(&[0x55, 1, 2, 3, 4]);
        assert!(matches!(rx.on_packet_ready(&mut radio), RxDispatch::Invalid));
        assert_eq!(rx.snapshot().parse_errors, 1);
    }

    #[test]
    fn signal_averages_track_samples() {
        let mut rx = receiver(false);
        let mut radio = ScriptedRadio::new();
        radio.rssi_dbm = -80.0;
        radio.snr_db = 6.0;
        radio.inject_frame(&air(NodeId::DRONE, NodeId::GROUND, &mav_v1(0, 0), false));
        rx.on_packet_ready(&mut radio);

        let snap = rx.snapshot();
        assert_eq!(snap.avg_rssi_dbm, -80.0);
        assert_eq!(snap.avg_snr_db, 6.0);
        assert_eq!(rx.avg_rssi_dbm(), Some(-80.0));
    }

    #[test]
    fn crc_mismatch_read_is_counted_and_dropped() {
        let mut rx = receiver(false);
        let mut radio = ScriptedRadio::new();
        radio.inject_frame(&air(NodeId::DRONE, NodeId::GROUND, &mav_v1(0, 0), false));
        radio.read_error = Some(crate::radio::RadioError::CrcMismatch);
        assert!(matches!(rx.on_packet_ready(&mut radio), RxDispatch::Invalid));
        assert_eq!(rx.snapshot().parse_errors, 1);
        assert!(!rx.available());
        assert!(radio.receiving);
    }

    #[test]
    fn spurious_interrupt_is_harmless() {
        let mut rx = receiver(false);
        let mut radio = ScriptedRadio::new();
        assert!(matches!(rx.on_packet_ready(&mut radio), RxDispatch::Empty));
        assert_eq!(rx.snapshot().packets_received, 0);
    }
}

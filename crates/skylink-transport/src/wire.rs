//! # Skylink Wire Format
//!
//! On-air framing for the long-range link plus the MAVLink header peeks the
//! rest of the transport keys off.
//!
//! ## Air Frame (4-byte header + payload)
//!
//! ```text
//! +--------+--------+--------+--------+================+
//! | marker |  src   |  dest  |  len   | payload 0..250 |
//! +--------+--------+--------+--------+================+
//! ```
//!
//! - `marker` is `0xAE`; the top bit (`0x80`) doubles as the in-band
//!   relay-request flag, so `0x2E` marks a frame whose sender judges its
//!   direct link too weak.
//! - The radio appends and validates a 2-byte CRC at the physical layer;
//!   this codec only ever sees CRC-valid bytes.
//!
//! The payload is an opaque MAVLink datagram. We never decode it — we only
//! locate four header bytes (magic, sequence, system id, message id) for
//! classification and deduplication.

use bytes::{BufMut, Bytes, BytesMut};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Air-frame marker byte.
pub const FRAME_MARKER: u8 = 0xAE;

/// Top bit of the marker byte: sender requests relay assistance.
///
/// `0xAE` already carries bit 7 high, so the relay variant is the marker
/// with that bit toggled low: `0x2E`. The discriminating bit is still bit 7.
pub const RELAY_REQUEST_FLAG: u8 = 0x80;

/// Marker value of a frame whose sender is asking for relay assistance.
pub const FRAME_MARKER_RELAY: u8 = FRAME_MARKER ^ RELAY_REQUEST_FLAG;

/// Fixed header size: marker + src + dest + len.
pub const HEADER_LEN: usize = 4;

/// Maximum payload carried by one frame.
pub const MAX_PAYLOAD: usize = 250;

/// MAVLink v1 magic byte.
pub const MAV_MAGIC_V1: u8 = 0xFE;

/// MAVLink v2 magic byte.
pub const MAV_MAGIC_V2: u8 = 0xFD;

/// Bytes of garbage tolerated before a buffer with no magic byte is abandoned.
pub const GARBAGE_THRESHOLD: usize = 100;

// ─── Node Identity ──────────────────────────────────────────────────────────

/// One-byte node address carried in every air frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u8);

impl NodeId {
    pub const GROUND: NodeId = NodeId(0);
    pub const DRONE: NodeId = NodeId(1);
    pub const DRONE_SECONDARY: NodeId = NodeId(2);
    pub const RELAY: NodeId = NodeId(3);
    pub const BROADCAST: NodeId = NodeId(0xFF);

    /// Whether a frame addressed to `dest` should be processed by `self`.
    #[inline]
    pub fn accepts(self, dest: NodeId) -> bool {
        dest == self || dest == NodeId::BROADCAST
    }
}

impl From<u8> for NodeId {
    fn from(raw: u8) -> Self {
        NodeId(raw)
    }
}

// ─── Air Frame ──────────────────────────────────────────────────────────────

/// A decoded long-range frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirFrame {
    pub src: NodeId,
    pub dest: NodeId,
    pub relay_request: bool,
    pub payload: Bytes,
}

impl AirFrame {
    /// Build a frame, rejecting oversized payloads.
    pub fn new(src: NodeId, dest: NodeId, payload: Bytes, relay_request: bool) -> Option<Self> {
        if payload.len() > MAX_PAYLOAD {
            return None;
        }
        Some(AirFrame {
            src,
            dest,
            relay_request,
            payload,
        })
    }

    /// Serialize the frame into wire bytes (header + payload).
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        let marker = if self.relay_request {
            FRAME_MARKER_RELAY
        } else {
            FRAME_MARKER
        };
        buf.put_u8(marker);
        buf.put_u8(self.src.0);
        buf.put_u8(self.dest.0);
        buf.put_u8(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a frame from raw radio bytes.
    ///
    /// Returns `None` on a wrong marker, a short buffer, or a length field
    /// that disagrees with the bytes actually present. Trailing bytes beyond
    /// the declared length (radio padding) are ignored.
    pub fn decode(raw: &[u8]) -> Option<AirFrame> {
        if raw.len() < HEADER_LEN {
            return None;
        }
        let marker = raw[0];
        if marker != FRAME_MARKER && marker != FRAME_MARKER_RELAY {
            return None;
        }
        let len = raw[3] as usize;
        if len > MAX_PAYLOAD || raw.len() < HEADER_LEN + len {
            return None;
        }
        Some(AirFrame {
            src: NodeId(raw[1]),
            dest: NodeId(raw[2]),
            relay_request: marker == FRAME_MARKER_RELAY,
            payload: Bytes::copy_from_slice(&raw[HEADER_LEN..HEADER_LEN + len]),
        })
    }

    /// Total on-air size (excluding the radio's CRC).
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

// ─── MAVLink Header Peek ────────────────────────────────────────────────────

/// The four MAVLink header fields the transport cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MavHeader {
    /// Magic byte: `0xFE` (v1) or `0xFD` (v2).
    pub version: u8,
    /// Packet sequence byte.
    pub seq: u8,
    /// Sending system id.
    pub sys_id: u8,
    /// Message id (low 8 bits for v2 — every classification key is <= 255).
    pub msg_id: u8,
}

impl MavHeader {
    /// Locate the header fields in a MAVLink datagram.
    ///
    /// v1: seq at byte 2, sys at byte 3, msg at byte 5.
    /// v2: seq at byte 4, sys at byte 5, msg low byte at byte 9.
    pub fn peek(data: &[u8]) -> Option<MavHeader> {
        match data.first()? {
            &MAV_MAGIC_V1 if data.len() >= 6 => Some(MavHeader {
                version: MAV_MAGIC_V1,
                seq: data[2],
                sys_id: data[3],
                msg_id: data[5],
            }),
            &MAV_MAGIC_V2 if data.len() >= 10 => Some(MavHeader {
                version: MAV_MAGIC_V2,
                seq: data[4],
                sys_id: data[5],
                msg_id: data[9],
            }),
            _ => None,
        }
    }

    /// Message id of a datagram, or `0xFF` when it carries no MAVLink magic.
    pub fn msg_id_or_invalid(data: &[u8]) -> u8 {
        MavHeader::peek(data).map(|h| h.msg_id).unwrap_or(0xFF)
    }
}

// ─── Stream Framing ─────────────────────────────────────────────────────────

/// Result of scanning a host byte stream for a complete MAVLink packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameScan {
    /// A complete packet of `len` bytes starts at offset 0.
    Complete(usize),
    /// The buffer starts at a magic byte but the packet is not all here yet.
    NeedMore,
    /// No magic byte at offset 0; drop `n` bytes to reach the first one.
    Skip(usize),
    /// No magic byte anywhere and the buffer exceeds the garbage threshold.
    Garbage,
}

/// Scan `buf` for a complete MAVLink v1/v2 packet.
///
/// Packet totals: v1 = payload_len + 8; v2 = payload_len + 12, plus 13 when
/// incompat-flag bit 0 (signature) is set.
pub fn find_complete_mavlink(buf: &[u8]) -> FrameScan {
    if buf.is_empty() {
        return FrameScan::NeedMore;
    }

    if buf[0] != MAV_MAGIC_V1 && buf[0] != MAV_MAGIC_V2 {
        match buf
            .iter()
            .position(|&b| b == MAV_MAGIC_V1 || b == MAV_MAGIC_V2)
        {
            Some(n) => return FrameScan::Skip(n),
            None if buf.len() >= GARBAGE_THRESHOLD => return FrameScan::Garbage,
            None => return FrameScan::NeedMore,
        }
    }

    // Need the length byte (and the incompat byte for v2) to size the packet.
    if buf.len() < 2 {
        return FrameScan::NeedMore;
    }
    let payload_len = buf[1] as usize;
    let total = if buf[0] == MAV_MAGIC_V1 {
        payload_len + 8
    } else {
        if buf.len() < 3 {
            return FrameScan::NeedMore;
        }
        let signed = buf[2] & 0x01 != 0;
        payload_len + 12 + if signed { 13 } else { 0 }
    };

    if buf.len() >= total {
        FrameScan::Complete(total)
    } else {
        FrameScan::NeedMore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mav_v1(seq: u8, sys: u8, msg: u8, payload_len: u8) -> Vec<u8> {
        let mut pkt = vec![MAV_MAGIC_V1, payload_len, seq, sys, 1, msg];
        pkt.extend(std::iter::repeat(0u8).take(payload_len as usize + 2));
        pkt
    }

    fn mav_v2(seq: u8, sys: u8, msg: u8, payload_len: u8) -> Vec<u8> {
        // magic, len, incompat, compat, seq, sys, comp, msg_lo..msg_hi
        let mut pkt = vec![MAV_MAGIC_V2, payload_len, 0, 0, seq, sys, 1, 0, 0, msg];
        pkt.extend(std::iter::repeat(0u8).take(payload_len as usize + 2));
        pkt
    }

    // ─── Air Frame ──────────────────────────────────────────────────────

    #[test]
    fn frame_roundtrip_plain() {
        let payload = Bytes::from_static(b"mavlink bytes");
        let frame =
            AirFrame::new(NodeId::DRONE, NodeId::GROUND, payload.clone(), false).unwrap();
        let wire = frame.encode();
        assert_eq!(wire[0], FRAME_MARKER);
        let decoded = AirFrame::decode(&wire).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn frame_roundtrip_relay_request() {
        let frame = AirFrame::new(
            NodeId::DRONE,
            NodeId::GROUND,
            Bytes::from_static(b"x"),
            true,
        )
        .unwrap();
        let wire = frame.encode();
        assert_eq!(wire[0], FRAME_MARKER_RELAY);
        let decoded = AirFrame::decode(&wire).unwrap();
        assert!(decoded.relay_request);
        assert_eq!(decoded.src, NodeId::DRONE);
    }

    #[test]
    fn frame_rejects_oversized_payload() {
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD + 1]);
        assert!(AirFrame::new(NodeId::DRONE, NodeId::GROUND, payload, false).is_none());
    }

    #[test]
    fn decode_rejects_wrong_marker() {
        assert!(AirFrame::decode(&[0xAA, 1, 0, 0]).is_none());
        assert!(AirFrame::decode(&[MAV_MAGIC_V1, 1, 0, 0]).is_none());
    }

    #[test]
    fn decode_rejects_truncated() {
        let frame = AirFrame::new(
            NodeId::DRONE,
            NodeId::GROUND,
            Bytes::from_static(b"hello"),
            false,
        )
        .unwrap();
        let wire = frame.encode();
        assert!(AirFrame::decode(&wire[..wire.len() - 1]).is_none());
        assert!(AirFrame::decode(&wire[..3]).is_none());
    }

    #[test]
    fn decode_ignores_radio_padding() {
        let frame = AirFrame::new(
            NodeId::GROUND,
            NodeId::DRONE,
            Bytes::from_static(b"abc"),
            false,
        )
        .unwrap();
        let mut wire = frame.encode().to_vec();
        wire.extend_from_slice(&[0xEE, 0xEE]);
        let decoded = AirFrame::decode(&wire).unwrap();
        assert_eq!(decoded.payload.as_ref(), b"abc");
    }

    #[test]
    fn broadcast_accepts_everyone() {
        assert!(NodeId::DRONE.accepts(NodeId::BROADCAST));
        assert!(NodeId::DRONE.accepts(NodeId::DRONE));
        assert!(!NodeId::DRONE.accepts(NodeId::GROUND));
    }

    proptest! {
        #[test]
        fn proptest_frame_roundtrip(
            src in 0u8..=255,
            dest in 0u8..=255,
            relay in proptest::bool::ANY,
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD),
        ) {
            let frame = AirFrame::new(
                NodeId(src),
                NodeId(dest),
                Bytes::from(payload.clone()),
                relay,
            ).unwrap();
            let wire = frame.encode();
            let decoded = AirFrame::decode(&wire).unwrap();
            prop_assert_eq!(decoded.src, NodeId(src));
            prop_assert_eq!(decoded.dest, NodeId(dest));
            prop_assert_eq!(decoded.relay_request, relay);
            prop_assert_eq!(decoded.payload.as_ref(), payload.as_slice());
        }
    }

    // ─── MAVLink Peek ───────────────────────────────────────────────────

    #[test]
    fn peek_v1_fields() {
        let pkt = mav_v1(5, 1, 30, 16);
        let hdr = MavHeader::peek(&pkt).unwrap();
        assert_eq!(hdr.version, MAV_MAGIC_V1);
        assert_eq!(hdr.seq, 5);
        assert_eq!(hdr.sys_id, 1);
        assert_eq!(hdr.msg_id, 30);
    }

    #[test]
    fn peek_v2_fields() {
        let pkt = mav_v2(9, 1, 76, 32);
        let hdr = MavHeader::peek(&pkt).unwrap();
        assert_eq!(hdr.version, MAV_MAGIC_V2);
        assert_eq!(hdr.seq, 9);
        assert_eq!(hdr.sys_id, 1);
        assert_eq!(hdr.msg_id, 76);
    }

    #[test]
    fn peek_rejects_non_mavlink() {
        assert!(MavHeader::peek(b"not mavlink").is_none());
        assert!(MavHeader::peek(&[]).is_none());
        assert_eq!(MavHeader::msg_id_or_invalid(b"junk"), 0xFF);
    }

    #[test]
    fn peek_rejects_short_headers() {
        assert!(MavHeader::peek(&[MAV_MAGIC_V1, 0, 1, 1, 1]).is_none());
        assert!(MavHeader::peek(&[MAV_MAGIC_V2, 0, 0, 0, 1, 1, 1, 0, 0]).is_none());
    }

    // ─── Stream Framing ─────────────────────────────────────────────────

    #[test]
    fn scan_complete_v1() {
        let pkt = mav_v1(0, 1, 0, 9);
        assert_eq!(find_complete_mavlink(&pkt), FrameScan::Complete(9 + 8));
    }

    #[test]
    fn scan_complete_v2_unsigned() {
        let pkt = mav_v2(0, 1, 0, 9);
        assert_eq!(find_complete_mavlink(&pkt), FrameScan::Complete(9 + 12));
    }

    #[test]
    fn scan_complete_v2_signed() {
        let mut pkt = mav_v2(0, 1, 0, 4);
        pkt[2] = 0x01; // incompat: signed
        pkt.extend(std::iter::repeat(0u8).take(13));
        assert_eq!(find_complete_mavlink(&pkt), FrameScan::Complete(4 + 12 + 13));
    }

    #[test]
    fn scan_incomplete_waits() {
        let pkt = mav_v1(0, 1, 0, 9);
        assert_eq!(find_complete_mavlink(&pkt[..5]), FrameScan::NeedMore);
        assert_eq!(find_complete_mavlink(&[MAV_MAGIC_V2]), FrameScan::NeedMore);
    }

    #[test]
    fn scan_skips_leading_noise() {
        let mut buf = vec![0x00, 0x11, 0x22];
        buf.extend(mav_v1(0, 1, 0, 2));
        assert_eq!(find_complete_mavlink(&buf), FrameScan::Skip(3));
    }

    #[test]
    fn scan_garbage_past_threshold() {
        let junk = vec![0x55u8; GARBAGE_THRESHOLD];
        assert_eq!(find_complete_mavlink(&junk), FrameScan::Garbage);
        let short_junk = vec![0x55u8; GARBAGE_THRESHOLD - 1];
        assert_eq!(find_complete_mavlink(&short_junk), FrameScan::NeedMore);
    }
}

//! # Host Bridge
//!
//! Glue between an opaque host byte stream (flight controller on the drone,
//! ground-control software on the ground) and the coordinator:
//!
//! - [`MavStreamScanner`] accumulates raw stream bytes and yields complete
//!   MAVLink datagrams, resynchronizing across garbage.
//! - [`EventLog`] is the bounded in-memory log behind the operator's
//!   `DUMP` / `SIZE` / `CLEAR` / `HELP` control commands.

use std::collections::VecDeque;

use tracing::debug;

use crate::wire::{find_complete_mavlink, FrameScan};

/// Scan buffer capacity. Generous for a serial stream: two max-size
/// signed MAVLink v2 packets.
const SCAN_BUFFER_CAP: usize = 560;

// ─── Stream Scanner ─────────────────────────────────────────────────────────

/// Incremental MAVLink packet extractor over a byte stream.
pub struct MavStreamScanner {
    buf: VecDeque<u8>,
    /// Bytes discarded while hunting for a magic byte.
    pub bytes_skipped: u64,
    /// Whole-buffer discards after a garbage run.
    pub garbage_flushes: u64,
}

impl MavStreamScanner {
    pub fn new() -> Self {
        MavStreamScanner {
            buf: VecDeque::with_capacity(SCAN_BUFFER_CAP),
            bytes_skipped: 0,
            garbage_flushes: 0,
        }
    }

    /// Append raw stream bytes. Input beyond the buffer capacity is
    /// discarded (the stream is resynchronized by the scan logic anyway).
    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.buf.len() >= SCAN_BUFFER_CAP {
                self.bytes_skipped += 1;
                continue;
            }
            self.buf.push_back(b);
        }
    }

    /// Extract the next complete MAVLink packet, if any.
    pub fn next_packet(&mut self) -> Option<Vec<u8>> {
        loop {
            let scan = find_complete_mavlink(self.buf.make_contiguous());
            match scan {
                FrameScan::Complete(len) => {
                    let packet: Vec<u8> = self.buf.drain(..len).collect();
                    return Some(packet);
                }
                FrameScan::Skip(n) => {
                    self.buf.drain(..n);
                    self.bytes_skipped += n as u64;
                }
                FrameScan::Garbage => {
                    debug!(len = self.buf.len(), "flushing garbage stream data");
                    self.bytes_skipped += self.buf.len() as u64;
                    self.buf.clear();
                    self.garbage_flushes += 1;
                    return None;
                }
                FrameScan::NeedMore => return None,
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for MavStreamScanner {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Event Log ──────────────────────────────────────────────────────────────

/// Default event-log budget in bytes.
const EVENT_LOG_CAP_BYTES: usize = 64 * 1024;

/// Bounded in-memory event log. Oldest lines fall off once the byte budget
/// is exceeded.
pub struct EventLog {
    lines: VecDeque<String>,
    bytes: usize,
    cap_bytes: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_LOG_CAP_BYTES)
    }

    pub fn with_capacity(cap_bytes: usize) -> Self {
        EventLog {
            lines: VecDeque::new(),
            bytes: 0,
            cap_bytes,
        }
    }

    /// Append one event line.
    pub fn record(&mut self, line: impl Into<String>) {
        let line = line.into();
        self.bytes += line.len() + 1;
        self.lines.push_back(line);
        while self.bytes > self.cap_bytes {
            if let Some(evicted) = self.lines.pop_front() {
                self.bytes -= evicted.len() + 1;
            } else {
                break;
            }
        }
    }

    /// Full log text, newline-terminated lines.
    pub fn dump(&self) -> String {
        let mut out = String::with_capacity(self.bytes);
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.bytes = 0;
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Operator Commands ──────────────────────────────────────────────────────

/// Control-channel commands understood by the host bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Dump,
    Size,
    Clear,
    Help,
}

impl OperatorCommand {
    /// Parse one command line (case-insensitive, surrounding whitespace
    /// ignored). Unknown input yields `None`.
    pub fn parse(line: &str) -> Option<OperatorCommand> {
        match line.trim().to_ascii_uppercase().as_str() {
            "DUMP" => Some(OperatorCommand::Dump),
            "SIZE" => Some(OperatorCommand::Size),
            "CLEAR" => Some(OperatorCommand::Clear),
            "HELP" => Some(OperatorCommand::Help),
            _ => None,
        }
    }

    /// Execute against the log, producing the response text.
    pub fn execute(self, log: &mut EventLog) -> String {
        match self {
            OperatorCommand::Dump => log.dump(),
            OperatorCommand::Size => format!(
                "Log size: {} bytes ({} lines)",
                log.size_bytes(),
                log.line_count()
            ),
            OperatorCommand::Clear => {
                log.clear();
                "Log cleared".to_string()
            }
            OperatorCommand::Help => "DUMP, SIZE, CLEAR, HELP".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::GARBAGE_THRESHOLD;

    fn mav_v1(seq: u8, payload_len: u8) -> Vec<u8> {
        let mut pkt = vec![0xFEu8, payload_len, seq, 1, 1, 0];
        pkt.extend(std::iter::repeat(0u8).take(payload_len as usize + 2));
        pkt
    }

    // ─── Scanner ────────────────────────────────────────────────────────

    #[test]
    fn scanner_extracts_complete_packet() {
        let mut scanner = MavStreamScanner::new();
        let pkt = mav_v1(0, 9);
        scanner.push(&pkt);
        assert_eq!(scanner.next_packet().unwrap(), pkt);
        assert_eq!(scanner.next_packet(), None);
        assert_eq!(scanner.buffered(), 0);
    }

    #[test]
    fn scanner_waits_for_split_packet() {
        let mut scanner = MavStreamScanner::new();
        let pkt = mav_v1(1, 20);
        scanner.push(&pkt[..10]);
        assert_eq!(scanner.next_packet(), None);
        scanner.push(&pkt[10..]);
        assert_eq!(scanner.next_packet().unwrap(), pkt);
    }

    #[test]
    fn scanner_skips_noise_between_packets() {
        let mut scanner = MavStreamScanner::new();
        let a = mav_v1(1, 4);
        let b = mav_v1(2, 4);
        scanner.push(&[0x10, 0x20]);
        scanner.push(&a);
        scanner.push(&[0x30]);
        scanner.push(&b);
        assert_eq!(scanner.next_packet().unwrap(), a);
        assert_eq!(scanner.next_packet().unwrap(), b);
        assert_eq!(scanner.bytes_skipped, 3);
    }

    #[test]
    fn scanner_flushes_garbage_runs() {
        let mut scanner = MavStreamScanner::new();
        scanner.push(&vec![0x55u8; GARBAGE_THRESHOLD + 10]);
        assert_eq!(scanner.next_packet(), None);
        assert_eq!(scanner.garbage_flushes, 1);
        assert_eq!(scanner.buffered(), 0);

        // Clean recovery afterwards.
        let pkt = mav_v1(0, 4);
        scanner.push(&pkt);
        assert_eq!(scanner.next_packet().unwrap(), pkt);
    }

    #[test]
    fn scanner_extracts_back_to_back_packets() {
        let mut scanner = MavStreamScanner::new();
        let a = mav_v1(1, 0);
        let b = mav_v1(2, 0);
        let mut stream = a.clone();
        stream.extend_from_slice(&b);
        scanner.push(&stream);
        assert_eq!(scanner.next_packet().unwrap(), a);
        assert_eq!(scanner.next_packet().unwrap(), b);
    }

    // ─── Event Log ──────────────────────────────────────────────────────

    #[test]
    fn log_records_and_dumps_in_order() {
        let mut log = EventLog::new();
        log.record("TX_DUAL seq=1");
        log.record("RX_LORA seq=2");
        assert_eq!(log.dump(), "TX_DUAL seq=1\nRX_LORA seq=2\n");
        assert_eq!(log.line_count(), 2);
    }

    #[test]
    fn log_evicts_oldest_past_budget() {
        let mut log = EventLog::with_capacity(32);
        log.record("first entry - 0123456789");
        log.record("second entry - 0123456789");
        assert_eq!(log.line_count(), 1);
        assert!(log.dump().starts_with("second"));
        assert!(log.size_bytes() <= 32);
    }

    // ─── Commands ───────────────────────────────────────────────────────

    #[test]
    fn commands_parse_case_insensitively() {
        assert_eq!(OperatorCommand::parse("dump"), Some(OperatorCommand::Dump));
        assert_eq!(OperatorCommand::parse(" SIZE \n"), Some(OperatorCommand::Size));
        assert_eq!(OperatorCommand::parse("Clear"), Some(OperatorCommand::Clear));
        assert_eq!(OperatorCommand::parse("help"), Some(OperatorCommand::Help));
        assert_eq!(OperatorCommand::parse("REBOOT"), None);
        assert_eq!(OperatorCommand::parse(""), None);
    }

    #[test]
    fn command_execution_round() {
        let mut log = EventLog::new();
        log.record("EVENT one");

        let size = OperatorCommand::Size.execute(&mut log);
        assert!(size.contains("1 lines"), "{size}");

        let dump = OperatorCommand::Dump.execute(&mut log);
        assert_eq!(dump, "EVENT one\n");

        assert_eq!(OperatorCommand::Clear.execute(&mut log), "Log cleared");
        assert_eq!(log.line_count(), 0);
        assert_eq!(OperatorCommand::Help.execute(&mut log), "DUMP, SIZE, CLEAR, HELP");
    }
}

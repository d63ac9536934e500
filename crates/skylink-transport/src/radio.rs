//! # Radio Driver Contract
//!
//! The transport consumes a LoRa-class chip driver through this trait; it
//! never talks SPI itself. Implementations are expected to be blocking in
//! the driver sense — `transmit` returns when the chip has finished — and
//! to validate the physical-layer CRC so that `read_data` only ever yields
//! CRC-valid frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ─── Parameters ─────────────────────────────────────────────────────────────

/// Radio initialization parameters. Held by the transmit supervisor so a
/// chip reset can re-initialize with the same configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioParams {
    pub frequency_mhz: f32,
    pub bandwidth_khz: f32,
    pub spreading_factor: u8,
    pub coding_rate: u8,
    pub sync_word: u8,
    pub tx_power_dbm: i8,
}

impl Default for RadioParams {
    fn default() -> Self {
        RadioParams {
            frequency_mhz: 930.0,
            bandwidth_khz: 500.0,
            spreading_factor: 7,
            coding_rate: 5,
            sync_word: 0x12,
            tx_power_dbm: 4,
        }
    }
}

impl RadioParams {
    /// Reference relay-radio configuration (secondary frequency).
    pub fn relay_default() -> Self {
        RadioParams {
            frequency_mhz: 902.0,
            ..Default::default()
        }
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Driver-level failure. Fatal kinds force an immediate chip reset instead
/// of the usual retry ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Transient transmit/receive failure (busy, timeout waiting for TX done).
    TxFailed,
    /// The pending frame failed the physical-layer CRC.
    CrcMismatch,
    /// Chip did not answer on the bus.
    ChipNotFound,
    /// SPI command timed out or was rejected.
    SpiTimeout,
    /// Rejected frequency/bandwidth/SF/CR/power configuration.
    InvalidParams,
    /// CAD is unsupported or failed to run.
    CadUnavailable,
}

impl RadioError {
    /// Whether this error warrants an immediate chip reset.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            RadioError::ChipNotFound | RadioError::SpiTimeout | RadioError::InvalidParams
        )
    }
}

impl std::fmt::Display for RadioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RadioError::TxFailed => "transmit failed",
            RadioError::CrcMismatch => "crc mismatch",
            RadioError::ChipNotFound => "chip not found",
            RadioError::SpiTimeout => "spi timeout",
            RadioError::InvalidParams => "invalid radio parameters",
            RadioError::CadUnavailable => "cad unavailable",
        };
        f.write_str(s)
    }
}

impl std::error::Error for RadioError {}

// ─── Channel Activity Detection ─────────────────────────────────────────────

/// Outcome of a channel-activity scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelScan {
    Clear,
    PreambleDetected,
}

// ─── Driver Trait ───────────────────────────────────────────────────────────

/// The operations the transport needs from a long-range radio chip.
pub trait Radio {
    fn init(&mut self, params: &RadioParams) -> Result<(), RadioError>;
    fn set_crc(&mut self, enabled: bool) -> Result<(), RadioError>;
    fn start_receive(&mut self);
    fn standby(&mut self);
    fn transmit(&mut self, data: &[u8]) -> Result<(), RadioError>;
    /// Copy the pending frame into `buf`, returning its length.
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, RadioError>;
    fn packet_length(&mut self) -> usize;
    fn rssi(&mut self) -> f32;
    fn snr(&mut self) -> f32;
    /// Channel activity detection. Requires standby; the caller owns the
    /// standby/receive mode dance.
    fn scan_channel(&mut self) -> Result<ChannelScan, RadioError>;
    fn reset(&mut self);
}

// ─── Packet-Ready Flag ──────────────────────────────────────────────────────

/// Shared flag set by the radio's packet-ready interrupt hook and consumed
/// by the main loop. The flag carries no payload — the frame itself stays in
/// the chip's buffer until the main loop calls `read_data`.
#[derive(Clone, Default)]
pub struct PacketReadyFlag {
    flag: Arc<AtomicBool>,
}

impl PacketReadyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the interrupt context.
    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Consume the flag. Returns true at most once per raise.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ─── Test Support ───────────────────────────────────────────────────────────

/// Scriptable in-memory radio for unit and scenario tests.
pub mod testutil {
    use super::*;
    use std::collections::VecDeque;

    /// A radio whose CAD results, failures, and inbound frames are scripted
    /// by the test. Records every transmission and mode change.
    pub struct ScriptedRadio {
        /// Frames handed to `transmit`, in order.
        pub transmissions: Vec<Vec<u8>>,
        /// Pending CAD outcomes; `Clear` once exhausted.
        pub scan_script: VecDeque<Result<ChannelScan, RadioError>>,
        /// Remaining transmit calls that should fail.
        pub failing_transmits: u32,
        /// Error used for scripted failures (default `TxFailed`).
        pub fail_with: Option<RadioError>,
        /// Frame returned by the next `read_data`.
        pub rx_frame: Option<Vec<u8>>,
        /// Error returned by the next `read_data` instead of a frame.
        pub read_error: Option<RadioError>,
        pub rssi_dbm: f32,
        pub snr_db: f32,
        pub resets: u32,
        pub inits: u32,
        pub crc_enabled: bool,
        pub receiving: bool,
        pub standby_count: u32,
    }

    impl ScriptedRadio {
        pub fn new() -> Self {
            ScriptedRadio {
                transmissions: Vec::new(),
                scan_script: VecDeque::new(),
                failing_transmits: 0,
                fail_with: None,
                rx_frame: None,
                read_error: None,
                rssi_dbm: -110.0,
                snr_db: 8.0,
                resets: 0,
                inits: 0,
                crc_enabled: false,
                receiving: false,
                standby_count: 0,
            }
        }

        pub fn fail_next_transmits(&mut self, n: u32) {
            self.failing_transmits = n;
        }

        /// Queue CAD outcomes for the next scans.
        pub fn script_scans(
            &mut self,
            results: impl IntoIterator<Item = Result<ChannelScan, RadioError>>,
        ) {
            self.scan_script.extend(results);
        }

        /// Stage a frame as if the chip had just received it.
        pub fn inject_frame(&mut self, frame: &[u8]) {
            self.rx_frame = Some(frame.to_vec());
        }
    }

    impl Default for ScriptedRadio {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Radio for ScriptedRadio {
        fn init(&mut self, _params: &RadioParams) -> Result<(), RadioError> {
            self.inits += 1;
            Ok(())
        }

        fn set_crc(&mut self, enabled: bool) -> Result<(), RadioError> {
            self.crc_enabled = enabled;
            Ok(())
        }

        fn start_receive(&mut self) {
            self.receiving = true;
        }

        fn standby(&mut self) {
            self.receiving = false;
            self.standby_count += 1;
        }

        fn transmit(&mut self, data: &[u8]) -> Result<(), RadioError> {
            if self.failing_transmits > 0 {
                self.failing_transmits -= 1;
                return Err(self.fail_with.unwrap_or(RadioError::TxFailed));
            }
            self.transmissions.push(data.to_vec());
            Ok(())
        }

        fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, RadioError> {
            if let Some(err) = self.read_error.take() {
                self.rx_frame = None;
                return Err(err);
            }
            match self.rx_frame.take() {
                Some(frame) => {
                    let n = frame.len().min(buf.len());
                    buf[..n].copy_from_slice(&frame[..n]);
                    Ok(n)
                }
                None => Ok(0),
            }
        }

        fn packet_length(&mut self) -> usize {
            self.rx_frame.as_ref().map(|f| f.len()).unwrap_or(0)
        }

        fn rssi(&mut self) -> f32 {
            self.rssi_dbm
        }

        fn snr(&mut self) -> f32 {
            self.snr_db
        }

        fn scan_channel(&mut self) -> Result<ChannelScan, RadioError> {
            self.scan_script
                .pop_front()
                .unwrap_or(Ok(ChannelScan::Clear))
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }
}

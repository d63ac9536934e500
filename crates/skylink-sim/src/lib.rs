//! # skylink-sim
//!
//! In-memory media for exercising the transport end-to-end without
//! hardware: a shared-frequency [`Airwaves`] bus carrying long-range
//! frames between [`SimRadio`] stations, and a linked close-range driver
//! pair whose reachability can be toggled mid-test.
//!
//! Everything is deliberately synchronous — a `transmit` lands in every
//! listening station's inbox before the call returns, and tests drive
//! delivery by pumping the packet-ready flags exactly like a main loop
//! would.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use skylink_transport::close_range::{CloseRangeDriver, CloseRangeError, SharedRxSlot};
use skylink_transport::radio::{
    ChannelScan, PacketReadyFlag, Radio, RadioError, RadioParams,
};

// ─── Airwaves ───────────────────────────────────────────────────────────────

/// Frequencies are bucketed to 0.1 MHz for matching.
fn freq_key(mhz: f32) -> u32 {
    (mhz * 10.0).round() as u32
}

struct Station {
    freq: u32,
    inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
    flag: PacketReadyFlag,
}

#[derive(Default)]
struct AirInner {
    stations: Vec<Station>,
}

/// A shared long-range medium. Stations on the same frequency hear each
/// other; different frequencies never interfere.
#[derive(Clone, Default)]
pub struct Airwaves {
    inner: Arc<Mutex<AirInner>>,
}

impl Airwaves {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new station. The returned radio starts tuned to
    /// `params.frequency_mhz`; its packet-ready flag is shared with the
    /// caller for main-loop pumping.
    pub fn attach(&self, params: &RadioParams, flag: PacketReadyFlag) -> SimRadio {
        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        let mut inner = self.inner.lock().unwrap();
        let id = inner.stations.len();
        inner.stations.push(Station {
            freq: freq_key(params.frequency_mhz),
            inbox: inbox.clone(),
            flag: flag.clone(),
        });
        SimRadio {
            id,
            freq: freq_key(params.frequency_mhz),
            airwaves: self.inner.clone(),
            inbox,
            rssi_dbm: -110.0,
            snr_db: 8.0,
            scan_script: VecDeque::new(),
            receiving: false,
            resets: 0,
        }
    }

    fn broadcast(inner: &Arc<Mutex<AirInner>>, from: usize, freq: u32, frame: &[u8]) {
        let inner = inner.lock().unwrap();
        for (id, station) in inner.stations.iter().enumerate() {
            if id == from || station.freq != freq {
                continue;
            }
            station.inbox.lock().unwrap().push_back(frame.to_vec());
            station.flag.raise();
        }
    }
}

// ─── SimRadio ───────────────────────────────────────────────────────────────

/// A station on the [`Airwaves`]. Ambient RSSI/SNR and CAD results are
/// owned by the test that owns the radio.
pub struct SimRadio {
    id: usize,
    freq: u32,
    airwaves: Arc<Mutex<AirInner>>,
    inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// RSSI this station reports for whatever it hears.
    pub rssi_dbm: f32,
    pub snr_db: f32,
    /// Pending CAD outcomes; `Clear` once exhausted.
    pub scan_script: VecDeque<Result<ChannelScan, RadioError>>,
    pub receiving: bool,
    pub resets: u32,
}

impl SimRadio {
    /// Frames waiting to be read.
    pub fn pending(&self) -> usize {
        self.inbox.lock().unwrap().len()
    }
}

impl Radio for SimRadio {
    fn init(&mut self, params: &RadioParams) -> Result<(), RadioError> {
        self.freq = freq_key(params.frequency_mhz);
        // Retune the receiving side too.
        let mut inner = self.airwaves.lock().unwrap();
        if let Some(station) = inner.stations.get_mut(self.id) {
            station.freq = self.freq;
        }
        Ok(())
    }

    fn set_crc(&mut self, _enabled: bool) -> Result<(), RadioError> {
        Ok(())
    }

    fn start_receive(&mut self) {
        self.receiving = true;
    }

    fn standby(&mut self) {
        self.receiving = false;
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), RadioError> {
        Airwaves::broadcast(&self.airwaves, self.id, self.freq, data);
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, RadioError> {
        match self.inbox.lock().unwrap().pop_front() {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn packet_length(&mut self) -> usize {
        self.inbox
            .lock()
            .unwrap()
            .front()
            .map(|f| f.len())
            .unwrap_or(0)
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
        self.inbox.lock().unwrap().clear();
    }
}

// ─── Close-Range Pair ───────────────────────────────────────────────────────

/// Control handle for one direction of a linked close-range pair.
#[derive(Clone)]
pub struct CloseRangeControl {
    peer_slot: Arc<Mutex<Option<SharedRxSlot>>>,
    connected: Arc<Mutex<bool>>,
    rssi_dbm: Arc<Mutex<i8>>,
}

impl CloseRangeControl {
    /// Wire this driver's output to the peer transport's receive slot.
    pub fn connect_to(&self, slot: SharedRxSlot) {
        *self.peer_slot.lock().unwrap() = Some(slot);
    }

    /// Toggle radio range. A disconnected driver still accepts sends (the
    /// datagrams vanish in the air, exactly like the real thing).
    pub fn set_connected(&self, connected: bool) {
        *self.connected.lock().unwrap() = connected;
    }

    pub fn set_rssi(&self, rssi_dbm: i8) {
        *self.rssi_dbm.lock().unwrap() = rssi_dbm;
    }
}

/// Driver half of a linked close-range pair.
pub struct SimCloseRange {
    control: CloseRangeControl,
    /// When true, `send` itself reports failure (driver-level reject).
    pub reject_sends: bool,
}

impl SimCloseRange {
    pub fn new() -> (SimCloseRange, CloseRangeControl) {
        let control = CloseRangeControl {
            peer_slot: Arc::new(Mutex::new(None)),
            connected: Arc::new(Mutex::new(true)),
            rssi_dbm: Arc::new(Mutex::new(-40)),
        };
        (
            SimCloseRange {
                control: control.clone(),
                reject_sends: false,
            },
            control,
        )
    }
}

impl CloseRangeDriver for SimCloseRange {
    fn send(&mut self, data: &[u8]) -> Result<(), CloseRangeError> {
        if self.reject_sends {
            return Err(CloseRangeError::DriverRejected);
        }
        let connected = *self.control.connected.lock().unwrap();
        if connected {
            if let Some(slot) = self.control.peer_slot.lock().unwrap().as_ref() {
                slot.deliver(data, *self.control.rssi_dbm.lock().unwrap());
            }
        }
        // The driver accepted the datagram either way; delivery is best
        // effort, like a connectionless radio.
        Ok(())
    }
}

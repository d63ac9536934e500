//! # Transport Statistics
//!
//! Per-component counters plus rolling signal-quality averages. Every
//! counter is single-writer (owned by its component); snapshots are plain
//! serializable copies assembled on demand — the aggregator copies, never
//! retains references.

use serde::Serialize;

// ─── EWMA ───────────────────────────────────────────────────────────────────

/// Exponentially weighted moving average, used for the rolling RSSI/SNR
/// figures surfaced in stats snapshots.
#[derive(Debug, Clone)]
pub struct Ewma {
    /// Smoothing factor (0.0 - 1.0). Higher = more responsive.
    alpha: f64,
    value: f64,
    initialized: bool,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        assert!((0.0..=1.0).contains(&alpha), "alpha must be in [0, 1]");
        Ewma {
            alpha,
            value: 0.0,
            initialized: false,
        }
    }

    /// Update with a new sample and return the smoothed value.
    pub fn update(&mut self, sample: f64) -> f64 {
        if !self.initialized {
            self.value = sample;
            self.initialized = true;
        } else {
            self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Whether at least one sample has been applied.
    pub fn has_samples(&self) -> bool {
        self.initialized
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
        self.initialized = false;
    }
}

// ─── Long-Range Scheduler ───────────────────────────────────────────────────

/// Counters owned by the long-range scheduler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    /// Frames handed to the radio successfully.
    pub packets_sent: u64,
    /// Enqueue rejections, per tier, because the ring was full.
    pub dropped_full: [u64; 3],
    /// Head drops at dispatch time, per tier, because the TTL expired.
    pub dropped_stale: [u64; 3],
    /// Transmits that failed even after the retry ladder.
    pub transmission_failures: u64,
    /// Times the channel was found busy (CAD preamble or RSSI above threshold).
    pub channel_busy_detections: u64,
    /// Backoff sleeps taken.
    pub backoff_events: u64,
    /// CAD scans reporting a clear channel.
    pub cad_successes: u64,
    /// CAD scans that detected activity or failed outright.
    pub cad_failures: u64,
}

impl SchedulerStats {
    pub fn total_dropped(&self) -> u64 {
        self.dropped_full.iter().sum::<u64>() + self.dropped_stale.iter().sum::<u64>()
    }
}

// ─── Long-Range Receiver ────────────────────────────────────────────────────

/// Counters owned by the long-range receive path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LongRangeRxStats {
    /// CRC-valid frames delivered locally.
    pub packets_received: u64,
    /// Frames that failed header parsing after the radio's CRC passed.
    pub parse_errors: u64,
    /// Frames dropped because their message id is blacklisted.
    pub dropped_blacklisted: u64,
    /// Frames addressed to someone else.
    pub ignored: u64,
    /// Frames dropped because the single receive slot was still occupied.
    pub rx_overruns: u64,
    /// Rolling received signal strength, dBm.
    pub avg_rssi_dbm: f64,
    /// Rolling signal-to-noise ratio, dB.
    pub avg_snr_db: f64,
}

// ─── Close-Range Transport ──────────────────────────────────────────────────

/// Counters owned by the close-range transport.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CloseRangeStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Driver-rejected sends.
    pub send_failures: u64,
    /// Reachable → unreachable edges.
    pub peer_unreachable_count: u64,
    /// Frames dropped because the single receive slot was still occupied.
    pub rx_overruns: u64,
    /// Most recent RSSI reported by the driver, dBm.
    pub last_rssi_dbm: i8,
    pub peer_reachable: bool,
}

// ─── Dual-Band Coordinator ──────────────────────────────────────────────────

/// Counters owned by the dual-band coordinator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStats {
    /// Non-essential messages kept off the long-range link.
    pub lora_filtered_messages: u64,
    /// Exact-duplicate frames consumed by the dedup rule.
    pub duplicate_packets_dropped: u64,
    /// Close-range peer became reachable.
    pub peer_acquired_transitions: u64,
    /// Close-range peer was lost.
    pub peer_lost_transitions: u64,
}

// ─── Inter-Module Serial Link ───────────────────────────────────────────────

/// Counters owned by the inter-module serial link.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SerialLinkStats {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub checksum_errors: u64,
    pub buffer_overflows: u64,
}

impl SerialLinkStats {
    /// Fraction of inbound frames lost to checksum failures.
    pub fn error_rate(&self) -> f64 {
        let total = self.rx_packets + self.checksum_errors;
        if total == 0 {
            0.0
        } else {
            self.checksum_errors as f64 / total as f64
        }
    }
}

// ─── Relay Orchestration ────────────────────────────────────────────────────

/// Counters shared by the relay roles (upstream, downstream, ground).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    /// Frames heard on the primary band addressed to another node.
    pub overheard: u64,
    /// Overheard frames forwarded over the serial link.
    pub forwarded: u64,
    /// Forwards triggered by a weak RSSI reading.
    pub weak_signals_detected: u64,
    /// Direct → relay transitions on the ground side.
    pub relay_activations: u64,
    /// Frames the ground station received on the primary band.
    pub packets_from_primary: u64,
    /// Frames the ground station received on the relay band.
    pub packets_from_relay: u64,
}

// ─── Transmit Supervision ───────────────────────────────────────────────────

/// Counters owned by the transmit retry supervisor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SupervisorStats {
    /// Individual transmit attempts that returned an error.
    pub failed_attempts: u64,
    /// Full chip resets (consecutive-failure limit or fatal error).
    pub radio_resets: u64,
}

// ─── Aggregate Snapshot ─────────────────────────────────────────────────────

/// Point-in-time copy of every component's counters, for host reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportSnapshot {
    pub scheduler: SchedulerStats,
    pub long_range_rx: LongRangeRxStats,
    pub close_range: CloseRangeStats,
    pub coordinator: CoordinatorStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_first_sample_sets_value() {
        let mut ewma = Ewma::new(0.125);
        ewma.update(-92.0);
        assert_eq!(ewma.value(), -92.0);
        assert!(ewma.has_samples());
    }

    #[test]
    fn ewma_smooths_toward_new_value() {
        let mut ewma = Ewma::new(0.5);
        ewma.update(-100.0);
        let v = ewma.update(-80.0);
        assert!((v - -90.0).abs() < 0.001, "EWMA 0.5 should average: got {v}");
    }

    #[test]
    fn ewma_reset_forgets_history() {
        let mut ewma = Ewma::new(0.5);
        ewma.update(-100.0);
        ewma.reset();
        assert!(!ewma.has_samples());
        ewma.update(-50.0);
        assert_eq!(ewma.value(), -50.0);
    }

    #[test]
    fn scheduler_total_dropped_sums_all_tiers() {
        let stats = SchedulerStats {
            dropped_full: [1, 2, 3],
            dropped_stale: [4, 0, 1],
            ..Default::default()
        };
        assert_eq!(stats.total_dropped(), 11);
    }

    #[test]
    fn serial_error_rate() {
        let stats = SerialLinkStats {
            rx_packets: 98,
            checksum_errors: 2,
            ..Default::default()
        };
        assert!((stats.error_rate() - 0.02).abs() < 1e-9);
        assert_eq!(SerialLinkStats::default().error_rate(), 0.0);
    }

    #[test]
    fn snapshot_serializes() {
        let snap = TransportSnapshot::default();
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"scheduler\""));
        assert!(json.contains("\"duplicate_packets_dropped\""));
    }
}

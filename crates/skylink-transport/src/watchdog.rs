//! # Watchdogs & Transmit Recovery
//!
//! Two mechanisms keep a link degraded-but-alive:
//!
//! - [`ActivityMonitor`] — a latched timeout: each healthy→timed-out and
//!   timed-out→healthy transition surfaces exactly one edge, so the caller
//!   logs once per episode instead of once per poll.
//! - [`TxSupervisor`] — wraps driver transmits with a bounded retry ladder
//!   (50/100/200 ms) and a process-global consecutive-failure count. Five
//!   consecutive failures, or any known-fatal error, reset the chip and
//!   re-initialize it with the stored parameters.

use tracing::warn;

use crate::clock::{Millis, Sleeper};
use crate::radio::{Radio, RadioError, RadioParams};
use crate::stats::SupervisorStats;

/// Inter-module serial activity timeout.
pub const SERIAL_ACTIVITY_TIMEOUT_MS: u64 = 1000;
/// Relay inactivity timeout.
pub const RELAY_ACTIVITY_TIMEOUT_MS: u64 = 30_000;
/// Peer-module responsiveness timeout.
pub const PEER_MODULE_TIMEOUT_MS: u64 = 5000;

// ─── Activity Monitor ───────────────────────────────────────────────────────

/// A transition reported by [`ActivityMonitor::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEdge {
    TimedOut,
    Recovered,
}

/// Link-activity timer with one-shot edge reporting.
#[derive(Debug)]
pub struct ActivityMonitor {
    timeout_ms: u64,
    last_activity: Millis,
    timed_out: bool,
}

impl ActivityMonitor {
    pub fn new(timeout_ms: u64, now: Millis) -> Self {
        ActivityMonitor {
            timeout_ms,
            last_activity: now,
            timed_out: false,
        }
    }

    /// Record activity on the monitored link.
    pub fn note_activity(&mut self, now: Millis) {
        self.last_activity = now;
    }

    /// Evaluate the timer. Returns an edge only on a state change.
    pub fn check(&mut self, now: Millis) -> Option<WatchdogEdge> {
        let expired = now.since(self.last_activity) > self.timeout_ms;
        match (expired, self.timed_out) {
            (true, false) => {
                self.timed_out = true;
                Some(WatchdogEdge::TimedOut)
            }
            (false, true) => {
                self.timed_out = false;
                Some(WatchdogEdge::Recovered)
            }
            _ => None,
        }
    }

    pub fn is_healthy(&self, now: Millis) -> bool {
        now.since(self.last_activity) <= self.timeout_ms
    }

    pub fn last_activity(&self) -> Millis {
        self.last_activity
    }
}

// ─── Relay-Node Watchdog Set ────────────────────────────────────────────────

/// The three activity timers a relay node runs: inter-module serial
/// traffic, relay forwarding, and peer-module responsiveness.
pub struct RelayNodeWatchdogs {
    pub serial: ActivityMonitor,
    pub relay: ActivityMonitor,
    pub peer_module: ActivityMonitor,
}

impl RelayNodeWatchdogs {
    pub fn new(now: Millis) -> Self {
        RelayNodeWatchdogs {
            serial: ActivityMonitor::new(SERIAL_ACTIVITY_TIMEOUT_MS, now),
            relay: ActivityMonitor::new(RELAY_ACTIVITY_TIMEOUT_MS, now),
            peer_module: ActivityMonitor::new(PEER_MODULE_TIMEOUT_MS, now),
        }
    }

    /// Check all three, logging each edge once.
    pub fn check_all(&mut self, now: Millis) {
        for (name, monitor) in [
            ("serial", &mut self.serial),
            ("relay", &mut self.relay),
            ("peer-module", &mut self.peer_module),
        ] {
            match monitor.check(now) {
                Some(WatchdogEdge::TimedOut) => warn!(link = name, "activity timeout"),
                Some(WatchdogEdge::Recovered) => warn!(link = name, "activity restored"),
                None => {}
            }
        }
    }
}

// ─── Transmit Supervisor ────────────────────────────────────────────────────

/// Retries per transmit call, after the initial attempt.
pub const TX_MAX_RETRIES: u32 = 3;
/// First retry delay; doubles each retry (50/100/200 ms).
pub const TX_INITIAL_BACKOFF_MS: u64 = 50;
/// Consecutive failures (across calls) before the chip is reset.
pub const TX_RESET_THRESHOLD: u32 = 5;

/// Transmit wrapper owning the retry/reset policy for one radio.
pub struct TxSupervisor {
    params: RadioParams,
    consecutive_failures: u32,
    pub stats: SupervisorStats,
}

impl TxSupervisor {
    pub fn new(params: RadioParams) -> Self {
        TxSupervisor {
            params,
            consecutive_failures: 0,
            stats: SupervisorStats::default(),
        }
    }

    /// Transmit `data`, retrying transient failures with exponential spacing.
    ///
    /// The consecutive-failure count persists across calls: a success resets
    /// it, and reaching [`TX_RESET_THRESHOLD`] — or hitting a fatal error —
    /// resets the chip, re-applies the stored parameters, re-enables CRC,
    /// and re-arms receive.
    pub fn transmit(
        &mut self,
        radio: &mut dyn Radio,
        sleeper: &mut dyn Sleeper,
        data: &[u8],
    ) -> Result<(), RadioError> {
        let mut backoff_ms = TX_INITIAL_BACKOFF_MS;
        let mut last_err = RadioError::TxFailed;

        for attempt in 0..=TX_MAX_RETRIES {
            match radio.transmit(data) {
                Ok(()) => {
                    self.consecutive_failures = 0;
                    return Ok(());
                }
                Err(err) => {
                    last_err = err;
                    self.stats.failed_attempts += 1;
                    self.consecutive_failures += 1;
                    warn!(
                        attempt = attempt + 1,
                        consecutive = self.consecutive_failures,
                        error = %err,
                        "radio transmit failed"
                    );

                    if err.is_fatal() || self.consecutive_failures >= TX_RESET_THRESHOLD {
                        self.reset_radio(radio);
                        return Err(err);
                    }

                    if attempt < TX_MAX_RETRIES {
                        sleeper.sleep_ms(backoff_ms);
                        backoff_ms *= 2;
                    }
                }
            }
        }

        Err(last_err)
    }

    /// Chip reset + full re-initialization with the stored parameters.
    fn reset_radio(&mut self, radio: &mut dyn Radio) {
        warn!("resetting radio after repeated transmit failures");
        radio.reset();
        if let Err(err) = radio.init(&self.params) {
            warn!(error = %err, "radio re-init failed after reset");
        }
        if let Err(err) = radio.set_crc(true) {
            warn!(error = %err, "re-enabling crc failed after reset");
        }
        radio.start_receive();
        self.stats.radio_resets += 1;
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn params(&self) -> &RadioParams {
        &self.params
    }
}

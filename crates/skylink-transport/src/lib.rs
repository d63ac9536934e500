//! # skylink-transport
//!
//! Dual-band MAVLink transport: a close-range datagram link carries
//! everything, a long-range LoRa-class link carries the essentials through
//! a priority-queued, staleness-aware, listen-before-talk scheduler, and an
//! optional two-radio relay extends the long-range path when the direct
//! link fades.
//!
//! ## Crate structure
//!
//! - [`wire`] — on-air framing, MAVLink header peeks, stream scanning
//! - [`classify`] — tier table, essential set, blacklist, rate limiting
//! - [`queue`] — three fixed-capacity priority rings with staleness TTLs
//! - [`scheduler`] — listen-before-talk transmit scheduler
//! - [`receiver`] — long-range dispatch (local / ignored / overheard)
//! - [`close_range`] — single-peer datagram transport with reachability
//! - [`coordinator`] — dual-band fan-out and cross-band deduplication
//! - [`serial_link`] — Fletcher-16-framed inter-module byte protocol
//! - [`relay`] — upstream/downstream/ground relay orchestration
//! - [`watchdog`] — latched activity timers, transmit retry and chip reset
//! - [`radio`] — the consumed radio-driver contract
//! - [`clock`] — injected monotonic time and sleeping
//! - [`stats`] — counters, EWMA signal averages, snapshots
//! - [`config`] — per-deployment configuration
//! - [`bridge`] — host byte-stream scanning and the operator event log

pub mod bridge;
pub mod classify;
pub mod clock;
pub mod close_range;
pub mod config;
pub mod coordinator;
pub mod queue;
pub mod radio;
pub mod receiver;
pub mod relay;
pub mod scheduler;
pub mod serial_link;
pub mod stats;
pub mod watchdog;
pub mod wire;

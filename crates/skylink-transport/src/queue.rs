//! # Tiered Packet Queue
//!
//! Three fixed-capacity ring buffers, one per priority tier, each with its
//! own staleness TTL. Rings reserve one slot so that `head == tail` means
//! empty and `(tail + 1) % cap == head` means full; maximum occupancy is
//! `cap - 1`.
//!
//! Staleness is evaluated only against the head packet and only when the
//! scheduler dispatches — the queue itself runs no timers.

use crate::classify::Tier;
use crate::clock::Millis;
use crate::wire::{NodeId, MAX_PAYLOAD};

/// Per-tier ring capacities (one slot of each is reserved).
pub const TIER_CAPACITIES: [usize; 3] = [10, 20, 30];

/// Per-tier staleness TTLs in milliseconds.
pub const TIER_TTLS_MS: [u64; 3] = [1000, 2000, 5000];

// Total queue RAM stays under the 20 KiB budget.
const _: () = assert!(
    (TIER_CAPACITIES[0] + TIER_CAPACITIES[1] + TIER_CAPACITIES[2])
        * std::mem::size_of::<QueuedPacket>()
        <= 20 * 1024
);

// ─── Queued Packet ──────────────────────────────────────────────────────────

/// A packet waiting for long-range airtime. Payload storage is inline so the
/// data path never allocates.
#[derive(Clone)]
pub struct QueuedPacket {
    data: [u8; MAX_PAYLOAD],
    len: u8,
    pub dest: NodeId,
    pub tier: Tier,
    pub enqueued_at: Millis,
    pub relay_requested: bool,
}

impl QueuedPacket {
    /// Copy `payload` into a queue slot. Returns `None` when oversized.
    pub fn new(
        payload: &[u8],
        dest: NodeId,
        tier: Tier,
        enqueued_at: Millis,
        relay_requested: bool,
    ) -> Option<Self> {
        if payload.len() > MAX_PAYLOAD {
            return None;
        }
        let mut data = [0u8; MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);
        Some(QueuedPacket {
            data,
            len: payload.len() as u8,
            dest,
            tier,
            enqueued_at,
            relay_requested,
        })
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Whether the packet has outlived its tier's TTL.
    #[inline]
    pub fn is_stale(&self, now: Millis, ttl_ms: u64) -> bool {
        now.since(self.enqueued_at) > ttl_ms
    }
}

impl std::fmt::Debug for QueuedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedPacket")
            .field("len", &self.len)
            .field("dest", &self.dest)
            .field("tier", &self.tier)
            .field("enqueued_at", &self.enqueued_at)
            .field("relay_requested", &self.relay_requested)
            .finish()
    }
}

// ─── Ring ───────────────────────────────────────────────────────────────────

/// Fixed-capacity ring with one reserved slot.
struct Ring {
    slots: Vec<Option<QueuedPacket>>,
    head: usize,
    tail: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring needs room for the reserved slot");
        Ring {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
        }
    }

    #[inline]
    fn cap(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    #[inline]
    fn is_full(&self) -> bool {
        (self.tail + 1) % self.cap() == self.head
    }

    #[inline]
    fn count(&self) -> usize {
        (self.tail + self.cap() - self.head) % self.cap()
    }

    fn push(&mut self, pkt: QueuedPacket) -> Result<(), QueueFull> {
        if self.is_full() {
            return Err(QueueFull);
        }
        self.slots[self.tail] = Some(pkt);
        self.tail = (self.tail + 1) % self.cap();
        Ok(())
    }

    fn peek(&self) -> Option<&QueuedPacket> {
        if self.is_empty() {
            None
        } else {
            self.slots[self.head].as_ref()
        }
    }

    fn pop(&mut self) -> Option<QueuedPacket> {
        if self.is_empty() {
            return None;
        }
        let pkt = self.slots[self.head].take();
        self.head = (self.head + 1) % self.cap();
        pkt
    }
}

// ─── Tiered Queue ───────────────────────────────────────────────────────────

/// Enqueue rejected: the tier's ring is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// The three priority rings plus their TTLs.
pub struct TieredQueue {
    rings: [Ring; 3],
    ttls_ms: [u64; 3],
}

impl TieredQueue {
    pub fn new() -> Self {
        Self::with_config(TIER_CAPACITIES, TIER_TTLS_MS)
    }

    pub fn with_config(capacities: [usize; 3], ttls_ms: [u64; 3]) -> Self {
        TieredQueue {
            rings: [
                Ring::new(capacities[0]),
                Ring::new(capacities[1]),
                Ring::new(capacities[2]),
            ],
            ttls_ms,
        }
    }

    pub fn enqueue(&mut self, tier: Tier, pkt: QueuedPacket) -> Result<(), QueueFull> {
        self.rings[tier.index()].push(pkt)
    }

    pub fn peek_head(&self, tier: Tier) -> Option<&QueuedPacket> {
        self.rings[tier.index()].peek()
    }

    pub fn drop_head(&mut self, tier: Tier) -> Option<QueuedPacket> {
        self.rings[tier.index()].pop()
    }

    pub fn count(&self, tier: Tier) -> usize {
        self.rings[tier.index()].count()
    }

    pub fn is_empty(&self, tier: Tier) -> bool {
        self.rings[tier.index()].is_empty()
    }

    pub fn is_full(&self, tier: Tier) -> bool {
        self.rings[tier.index()].is_full()
    }

    /// Total packets across all tiers.
    pub fn depth(&self) -> usize {
        Tier::ALL.iter().map(|&t| self.count(t)).sum()
    }

    pub fn ttl_ms(&self, tier: Tier) -> u64 {
        self.ttls_ms[tier.index()]
    }

    /// Highest-priority tier with a queued packet.
    pub fn first_nonempty(&self) -> Option<Tier> {
        Tier::ALL.into_iter().find(|&t| !self.is_empty(t))
    }

    /// Drain everything (shutdown path). Returns the number discarded.
    pub fn clear(&mut self) -> usize {
        let mut n = 0;
        for tier in Tier::ALL {
            while self.drop_head(tier).is_some() {
                n += 1;
            }
        }
        n
    }
}

impl Default for TieredQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(tag: u8, tier: Tier, at: u64) -> QueuedPacket {
        QueuedPacket::new(&[tag; 8], NodeId::GROUND, tier, Millis::from_ms(at), false).unwrap()
    }

    #[test]
    fn fifo_within_tier() {
        let mut q = TieredQueue::new();
        for tag in 0..5u8 {
            q.enqueue(Tier::Routine, pkt(tag, Tier::Routine, 0)).unwrap();
        }
        for tag in 0..5u8 {
            let head = q.drop_head(Tier::Routine).unwrap();
            assert_eq!(head.payload()[0], tag);
        }
        assert!(q.is_empty(Tier::Routine));
    }

    #[test]
    fn capacity_reserves_one_slot() {
        let mut q = TieredQueue::new();
        // Tier 0 capacity is 10, so 9 packets fit.
        for tag in 0..9u8 {
            q.enqueue(Tier::Critical, pkt(tag, Tier::Critical, 0)).unwrap();
        }
        assert!(q.is_full(Tier::Critical));
        assert_eq!(
            q.enqueue(Tier::Critical, pkt(9, Tier::Critical, 0)),
            Err(QueueFull)
        );
        assert_eq!(q.count(Tier::Critical), 9);
    }

    #[test]
    fn count_tracks_wraparound() {
        let mut q = TieredQueue::new();
        // Cycle enough packets through tier 0 (cap 10) to wrap the indices.
        for round in 0..4 {
            for tag in 0..7u8 {
                q.enqueue(Tier::Critical, pkt(tag, Tier::Critical, 0)).unwrap();
            }
            assert_eq!(q.count(Tier::Critical), 7, "round {round}");
            for _ in 0..7 {
                q.drop_head(Tier::Critical).unwrap();
            }
            assert_eq!(q.count(Tier::Critical), 0);
        }
    }

    #[test]
    fn empty_and_full_are_mutually_exclusive() {
        let mut q = TieredQueue::with_config([2, 2, 2], TIER_TTLS_MS);
        assert!(q.is_empty(Tier::Critical) && !q.is_full(Tier::Critical));
        q.enqueue(Tier::Critical, pkt(0, Tier::Critical, 0)).unwrap();
        assert!(!q.is_empty(Tier::Critical) && q.is_full(Tier::Critical));
    }

    #[test]
    fn peek_does_not_consume() {
        let mut q = TieredQueue::new();
        q.enqueue(Tier::Important, pkt(7, Tier::Important, 100)).unwrap();
        assert_eq!(q.peek_head(Tier::Important).unwrap().payload()[0], 7);
        assert_eq!(q.count(Tier::Important), 1);
    }

    #[test]
    fn first_nonempty_prefers_critical() {
        let mut q = TieredQueue::new();
        assert_eq!(q.first_nonempty(), None);
        q.enqueue(Tier::Routine, pkt(0, Tier::Routine, 0)).unwrap();
        assert_eq!(q.first_nonempty(), Some(Tier::Routine));
        q.enqueue(Tier::Critical, pkt(1, Tier::Critical, 0)).unwrap();
        assert_eq!(q.first_nonempty(), Some(Tier::Critical));
    }

    #[test]
    fn staleness_uses_tier_ttl() {
        let q = TieredQueue::new();
        let p = pkt(0, Tier::Critical, 1000);
        assert!(!p.is_stale(Millis::from_ms(2000), q.ttl_ms(Tier::Critical)));
        assert!(p.is_stale(Millis::from_ms(2001), q.ttl_ms(Tier::Critical)));
        assert!(!p.is_stale(Millis::from_ms(2001), q.ttl_ms(Tier::Routine)));
    }

    #[test]
    fn clear_drains_all_tiers() {
        let mut q = TieredQueue::new();
        q.enqueue(Tier::Critical, pkt(0, Tier::Critical, 0)).unwrap();
        q.enqueue(Tier::Important, pkt(1, Tier::Important, 0)).unwrap();
        q.enqueue(Tier::Routine, pkt(2, Tier::Routine, 0)).unwrap();
        assert_eq!(q.clear(), 3);
        assert_eq!(q.depth(), 0);
    }

    #[test]
    fn oversized_payload_rejected_at_construction() {
        assert!(QueuedPacket::new(
            &[0u8; MAX_PAYLOAD + 1],
            NodeId::GROUND,
            Tier::Routine,
            Millis::ZERO,
            false
        )
        .is_none());
    }
}

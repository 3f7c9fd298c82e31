//! Datagram transport seam and the in-memory conditioned link.

use std::collections::BTreeSet;

use crate::conditioner::LinkConditioner;

/// Unreliable, unordered datagram delivery polled once per tick.
pub trait Transport: Send {
    fn send(&mut self, now_ms: u64, bytes: Vec<u8>);

    /// Next datagram due at `now_ms`, if any.
    fn receive(&mut self, now_ms: u64) -> Option<Vec<u8>>;
}

/// Counters of one [`ConditionedLink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct LinkStats {
    pub sent: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub bytes_sent: u64,
}

#[derive(Debug)]
struct InFlight {
    deliver_at: u64,
    index: u64,
    bytes: Vec<u8>,
}

/// One direction of a simulated connection.
#[derive(Debug)]
pub struct ConditionedLink {
    conditioner: LinkConditioner,
    rng: fastrand::Rng,
    in_flight: Vec<InFlight>,
    forced_drops: BTreeSet<u64>,
    stats: LinkStats,
}

impl ConditionedLink {
    #[must_use]
    pub fn new(conditioner: LinkConditioner, seed: u64) -> Self {
        Self {
            conditioner,
            rng: fastrand::Rng::with_seed(seed),
            in_flight: Vec::new(),
            forced_drops: BTreeSet::new(),
            stats: LinkStats::default(),
        }
    }

    /// Drops the packet with send index `index` regardless of conditions.
    pub fn drop_packet(&mut self, index: u64) {
        self.forced_drops.insert(index);
    }

    pub fn set_conditioner(&mut self, conditioner: LinkConditioner) {
        self.conditioner = conditioner;
    }

    #[must_use]
    pub const fn conditioner(&self) -> &LinkConditioner {
        &self.conditioner
    }

    #[must_use]
    pub const fn stats(&self) -> LinkStats {
        self.stats
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl Transport for ConditionedLink {
    fn send(&mut self, now_ms: u64, bytes: Vec<u8>) {
        let index = self.stats.sent;
        self.stats.sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;
        if self.forced_drops.remove(&index) {
            self.stats.dropped += 1;
            return;
        }
        match self.conditioner.sample(&mut self.rng) {
            Some(delay) => self.in_flight.push(InFlight {
                deliver_at: now_ms + u64::from(delay),
                index,
                bytes,
            }),
            None => self.stats.dropped += 1,
        }
    }

    fn receive(&mut self, now_ms: u64) -> Option<Vec<u8>> {
        let (position, _) = self
            .in_flight
            .iter()
            .enumerate()
            .filter(|(_, packet)| packet.deliver_at <= now_ms)
            .min_by_key(|(_, packet)| (packet.deliver_at, packet.index))?;
        self.stats.delivered += 1;
        Some(self.in_flight.swap_remove(position).bytes)
    }
}

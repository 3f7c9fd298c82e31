//! Fixed-depth snapshot history keyed by wrap-aware ticks.

use std::num::NonZeroUsize;

use thiserror::Error;

use crate::types::NetworkTick;

/// Default number of snapshots kept per ghost.
pub const DEFAULT_HISTORY_DEPTH: usize = 32;

/// Errors that can occur when inserting into a history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// Ticks must be strictly increasing.
    #[error("tick {new_tick} is not newer than {last_tick}")]
    OutOfOrder {
        last_tick: NetworkTick,
        new_tick: NetworkTick,
    },
    #[error("cannot store the invalid tick")]
    InvalidTick,
}

/// A fixed-capacity ring buffer of values keyed by tick.
#[derive(Debug, Clone)]
pub struct SnapshotHistory<T> {
    entries: Vec<Option<Entry<T>>>,
    head: usize,
    len: usize,
    last_tick: NetworkTick,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    tick: NetworkTick,
    value: T,
}

impl<T> SnapshotHistory<T> {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        let cap = capacity.get();
        let mut entries = Vec::with_capacity(cap);
        entries.resize_with(cap, || None);
        Self {
            entries,
            head: 0,
            len: 0,
            last_tick: NetworkTick::INVALID,
        }
    }

    /// A history of [`DEFAULT_HISTORY_DEPTH`] entries.
    #[must_use]
    pub fn with_default_depth() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_HISTORY_DEPTH).unwrap_or(NonZeroUsize::MIN))
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Newest stored tick, or the invalid tick when empty.
    #[must_use]
    pub const fn last_tick(&self) -> NetworkTick {
        self.last_tick
    }

    /// Inserts a value at `tick`, which must be newer than every stored tick.
    ///
    /// When full, the oldest entry is overwritten.
    pub fn insert(&mut self, tick: NetworkTick, value: T) -> Result<(), HistoryError> {
        if !tick.is_valid() {
            return Err(HistoryError::InvalidTick);
        }
        if self.last_tick.is_valid() && !tick.is_newer_than(self.last_tick) {
            return Err(HistoryError::OutOfOrder {
                last_tick: self.last_tick,
                new_tick: tick,
            });
        }

        let cap = self.entries.len();
        if self.len < cap {
            let idx = (self.head + self.len) % cap;
            self.entries[idx] = Some(Entry { tick, value });
            self.len += 1;
        } else {
            self.entries[self.head] = Some(Entry { tick, value });
            self.head = (self.head + 1) % cap;
        }
        self.last_tick = tick;
        Ok(())
    }

    /// Value stored at exactly `tick`. Never returns a neighbouring tick.
    #[must_use]
    pub fn get(&self, tick: NetworkTick) -> Option<&T> {
        self.iter().find(|(t, _)| *t == tick).map(|(_, v)| v)
    }

    /// Newest entry at or before `tick`.
    #[must_use]
    pub fn latest_at_or_before(&self, tick: NetworkTick) -> Option<(NetworkTick, &T)> {
        self.iter().rev().find(|(t, _)| tick.ticks_since(*t) >= 0)
    }

    /// Oldest entry strictly after `tick`.
    #[must_use]
    pub fn earliest_after(&self, tick: NetworkTick) -> Option<(NetworkTick, &T)> {
        self.iter().find(|(t, _)| t.is_newer_than(tick))
    }

    /// Newest entry.
    #[must_use]
    pub fn latest(&self) -> Option<(NetworkTick, &T)> {
        self.iter().next_back()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
        self.head = 0;
        self.len = 0;
        self.last_tick = NetworkTick::INVALID;
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (NetworkTick, &T)> {
        let cap = self.entries.len();
        (0..self.len).filter_map(move |i| {
            let idx = (self.head + i) % cap;
            self.entries[idx]
                .as_ref()
                .map(|entry| (entry.tick, &entry.value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(v: u32) -> NetworkTick {
        NetworkTick::new(v)
    }

    fn history(cap: usize) -> SnapshotHistory<u32> {
        SnapshotHistory::new(NonZeroUsize::new(cap).unwrap())
    }

    #[test]
    fn exact_lookup_never_returns_neighbours() {
        let mut h = history(4);
        h.insert(t(10), 1).unwrap();
        h.insert(t(12), 2).unwrap();
        assert_eq!(h.get(t(10)), Some(&1));
        assert_eq!(h.get(t(11)), None);
        assert_eq!(h.get(t(12)), Some(&2));
    }

    #[test]
    fn latest_at_or_before_and_earliest_after() {
        let mut h = history(3);
        h.insert(t(10), 1).unwrap();
        h.insert(t(20), 2).unwrap();
        h.insert(t(30), 3).unwrap();
        assert_eq!(h.latest_at_or_before(t(25)).map(|(t, _)| t), Some(t(20)));
        assert_eq!(h.latest_at_or_before(t(30)).map(|(t, _)| t), Some(t(30)));
        assert_eq!(h.latest_at_or_before(t(5)), None);
        assert_eq!(h.earliest_after(t(20)).map(|(t, _)| t), Some(t(30)));
        assert_eq!(h.earliest_after(t(30)), None);
        assert_eq!(h.latest().map(|(_, v)| *v), Some(3));
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut h = history(2);
        for tick in 1..=3 {
            h.insert(t(tick), tick).unwrap();
        }
        assert_eq!(h.get(t(1)), None);
        assert_eq!(h.get(t(3)), Some(&3));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn rejects_out_of_order_and_duplicate_ticks() {
        let mut h = history(2);
        h.insert(t(10), 1).unwrap();
        assert!(matches!(
            h.insert(t(9), 2),
            Err(HistoryError::OutOfOrder { .. })
        ));
        assert!(h.insert(t(10), 2).is_err());
        assert_eq!(h.insert(NetworkTick::INVALID, 3), Err(HistoryError::InvalidTick));
    }

    #[test]
    fn ordering_survives_tick_wraparound() {
        let mut h = history(4);
        h.insert(t(u32::MAX - 1), 1).unwrap();
        h.insert(t(u32::MAX), 2).unwrap();
        h.insert(t(0), 3).unwrap();
        h.insert(t(1), 4).unwrap();
        assert_eq!(
            h.latest_at_or_before(t(0)).map(|(t, _)| t),
            Some(t(0))
        );
        assert_eq!(
            h.latest_at_or_before(t(u32::MAX)).map(|(_, v)| *v),
            Some(2)
        );
        assert!(h.insert(t(u32::MAX), 5).is_err());
    }

    #[test]
    fn clear_resets_ordering() {
        let mut h = history(2);
        h.insert(t(10), 1).unwrap();
        h.clear();
        assert!(h.is_empty());
        h.insert(t(3), 2).unwrap();
        assert_eq!(h.last_tick(), t(3));
    }

    #[test]
    fn stress_insert_wraparound() {
        let mut h = history(3);
        for tick in 1..=50 {
            h.insert(t(tick), tick).unwrap();
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.latest_at_or_before(t(47)), None);
        assert_eq!(h.latest_at_or_before(t(49)).map(|(t, _)| t), Some(t(49)));
    }
}

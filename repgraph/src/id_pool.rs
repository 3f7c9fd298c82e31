//! Ghost id allocation with delayed reuse, and stable prespawn id ranges.

use std::collections::{BTreeMap, VecDeque};

use codec::{GhostId, NetworkTick};

use crate::error::{ServerError, ServerResult};

/// Hands out ghost ids. Released ids are reused oldest first once their
/// cooldown has elapsed.
#[derive(Debug, Clone)]
pub struct GhostIdPool {
    next: u32,
    cooldown_ticks: u32,
    released: VecDeque<(GhostId, NetworkTick)>,
}

impl GhostIdPool {
    #[must_use]
    pub const fn new(cooldown_ticks: u32) -> Self {
        Self {
            next: 0,
            cooldown_ticks,
            released: VecDeque::new(),
        }
    }

    /// Allocates an id at `now`.
    pub fn allocate(&mut self, now: NetworkTick) -> ServerResult<GhostId> {
        if let Some(&(id, at)) = self.released.front() {
            if i64::from(now.ticks_since(at)) >= i64::from(self.cooldown_ticks) {
                self.released.pop_front();
                return Ok(id);
            }
        }
        if self.next >= GhostId::PRESPAWN_BIT {
            return Err(ServerError::IdsExhausted);
        }
        let id = GhostId::new(self.next);
        self.next += 1;
        Ok(id)
    }

    /// Returns an id whose despawn every connection has acknowledged.
    pub fn release(&mut self, id: GhostId, now: NetworkTick) {
        debug_assert!(!id.is_prespawn(), "prespawn ids are never pooled");
        self.released.push_back((id, now));
    }

    /// Ids waiting out their cooldown.
    #[must_use]
    pub fn cooling_down(&self) -> usize {
        self.released.len()
    }
}

/// A contiguous id range owned by one prespawn scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrespawnRange {
    pub scene_hash: u64,
    pub first: GhostId,
    pub len: u32,
}

impl PrespawnRange {
    /// Id of the `index`th ghost of the scene.
    #[must_use]
    pub fn id(&self, index: u32) -> Option<GhostId> {
        (index < self.len).then(|| GhostId::new(self.first.raw() + index))
    }

    #[must_use]
    pub fn contains(&self, id: GhostId) -> bool {
        id.raw()
            .checked_sub(self.first.raw())
            .is_some_and(|offset| offset < self.len)
    }
}

/// Reserves one id range per scene content hash. A scene that is loaded
/// again gets its previous range back.
#[derive(Debug, Clone)]
pub struct PrespawnRanges {
    range_size: u32,
    next_base: u32,
    ranges: BTreeMap<u64, PrespawnRange>,
}

impl PrespawnRanges {
    #[must_use]
    pub const fn new(range_size: u32) -> Self {
        Self {
            range_size,
            next_base: 0,
            ranges: BTreeMap::new(),
        }
    }

    /// Reserves (or returns the existing) range for `scene_hash`.
    pub fn reserve(&mut self, scene_hash: u64, count: u32) -> ServerResult<PrespawnRange> {
        if count > self.range_size {
            return Err(ServerError::PrespawnRangeExceeded {
                scene_hash,
                requested: count,
                capacity: self.range_size,
            });
        }
        if let Some(range) = self.ranges.get(&scene_hash) {
            return Ok(*range);
        }
        let base = self.next_base;
        let end = base
            .checked_add(self.range_size)
            .filter(|&end| end <= GhostId::PRESPAWN_BIT)
            .ok_or(ServerError::IdsExhausted)?;
        self.next_base = end;
        let range = PrespawnRange {
            scene_hash,
            first: GhostId::new(GhostId::PRESPAWN_BIT | base),
            len: self.range_size,
        };
        log::debug!("prespawn scene {scene_hash:016X} reserved {}..+{}", range.first, range.len);
        self.ranges.insert(scene_hash, range);
        Ok(range)
    }

    #[must_use]
    pub fn get(&self, scene_hash: u64) -> Option<&PrespawnRange> {
        self.ranges.get(&scene_hash)
    }

    /// Every reserved range in scene-hash order.
    pub fn iter(&self) -> impl Iterator<Item = &PrespawnRange> {
        self.ranges.values()
    }
}

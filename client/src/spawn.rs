//! Matching new server ghosts against locally predicted spawns.

use codec::{GhostId, NetworkTick};
use schema::GhostTypeId;

use crate::world::LocalEntity;

/// An entity the client spawned ahead of the server, waiting to be claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictedSpawn {
    pub entity: LocalEntity,
    pub ghost_type: GhostTypeId,
    /// Tick the client simulated the spawn at.
    pub spawn_tick: NetworkTick,
}

/// A ghost the server just announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewGhost {
    pub ghost_id: GhostId,
    pub ghost_type: GhostTypeId,
    pub spawn_tick: NetworkTick,
}

/// Decides whether a new ghost is one of the pending predicted spawns.
///
/// Classifiers run in registration order; the first to return an index
/// claims that pending spawn, which then leaves the pending list.
pub trait SpawnClassifier: Send {
    fn classify(&self, ghost: &NewGhost, pending: &[PredictedSpawn]) -> Option<usize>;
}

/// Claims the pending spawn of the same type closest in spawn tick, within
/// `max_tick_distance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickProximityClassifier {
    pub max_tick_distance: u32,
}

impl Default for TickProximityClassifier {
    fn default() -> Self {
        Self {
            max_tick_distance: 5,
        }
    }
}

impl SpawnClassifier for TickProximityClassifier {
    fn classify(&self, ghost: &NewGhost, pending: &[PredictedSpawn]) -> Option<usize> {
        pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.ghost_type == ghost.ghost_type)
            .map(|(i, p)| (i, ghost.spawn_tick.ticks_since(p.spawn_tick).unsigned_abs()))
            .filter(|(_, distance)| *distance <= self.max_tick_distance)
            .min_by_key(|(i, distance)| (*distance, *i))
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(entity: u64, ghost_type: u32, tick: u32) -> PredictedSpawn {
        PredictedSpawn {
            entity: LocalEntity(entity),
            ghost_type: GhostTypeId::new(ghost_type),
            spawn_tick: NetworkTick::new(tick),
        }
    }

    fn ghost(ghost_type: u32, tick: u32) -> NewGhost {
        NewGhost {
            ghost_id: GhostId::new(1),
            ghost_type: GhostTypeId::new(ghost_type),
            spawn_tick: NetworkTick::new(tick),
        }
    }

    #[test]
    fn closest_tick_of_same_type_wins() {
        let classifier = TickProximityClassifier::default();
        let list = [pending(1, 0, 100), pending(2, 1, 101), pending(3, 0, 102)];
        assert_eq!(classifier.classify(&ghost(0, 103), &list), Some(2));
        assert_eq!(classifier.classify(&ghost(1, 99), &list), Some(1));
    }

    #[test]
    fn distant_or_mistyped_spawns_are_not_claimed() {
        let classifier = TickProximityClassifier {
            max_tick_distance: 2,
        };
        let list = [pending(1, 0, 100)];
        assert_eq!(classifier.classify(&ghost(0, 110), &list), None);
        assert_eq!(classifier.classify(&ghost(2, 100), &list), None);
        assert_eq!(classifier.classify(&ghost(0, 100), &[]), None);
    }
}

//! Read access to server-side ghost state.

use std::collections::HashMap;

use codec::{GhostId, GhostState};

/// Where the send system reads current component values from.
pub trait WorldView {
    /// Current state of `ghost`, or `None` to skip it this tick.
    fn state(&self, ghost: GhostId) -> Option<&GhostState>;
}

/// A plain map, used by tests and the simulation harness.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorldView {
    states: HashMap<GhostId, GhostState>,
}

impl MemoryWorldView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ghost: GhostId, state: GhostState) {
        self.states.insert(ghost, state);
    }

    pub fn get_mut(&mut self, ghost: GhostId) -> Option<&mut GhostState> {
        self.states.get_mut(&ghost)
    }

    pub fn remove(&mut self, ghost: GhostId) -> Option<GhostState> {
        self.states.remove(&ghost)
    }
}

impl WorldView for MemoryWorldView {
    fn state(&self, ghost: GhostId) -> Option<&GhostState> {
        self.states.get(&ghost)
    }
}

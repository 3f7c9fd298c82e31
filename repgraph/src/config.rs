//! Server configuration.

use std::num::NonZeroUsize;

use codec::DEFAULT_HISTORY_DEPTH;

/// Contains config properties used by [`crate::GhostServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerConfig {
    /// Simulation ticks per second. Max send rates divide into this.
    pub tick_rate: u32,
    /// Byte budget of one snapshot packet, header included.
    pub max_snapshot_bytes: usize,
    /// Ticks a released ghost id waits after every connection acknowledged
    /// its despawn.
    pub id_reuse_cooldown_ticks: u32,
    /// Sent snapshots kept per ghost per connection as delta baselines.
    pub history_depth: NonZeroUsize,
    /// Size of the id range each prespawn scene reserves.
    pub prespawn_range_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_snapshot_bytes: 1400,
            id_reuse_cooldown_ticks: 120,
            history_depth: NonZeroUsize::new(DEFAULT_HISTORY_DEPTH).unwrap_or(NonZeroUsize::MIN),
            prespawn_range_size: 1024,
        }
    }
}

impl ServerConfig {
    /// Small budgets and short cooldowns for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_snapshot_bytes: 512,
            id_reuse_cooldown_ticks: 4,
            history_depth: NonZeroUsize::new(16).unwrap_or(NonZeroUsize::MIN),
            prespawn_range_size: 64,
            ..Self::default()
        }
    }
}

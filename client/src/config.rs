//! Client configuration.

use std::num::NonZeroUsize;

use codec::{ConnectionId, DEFAULT_HISTORY_DEPTH};

use crate::interpolation::PredictionSmoothing;

/// Contains config properties used by [`crate::GhostClient`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Server simulation ticks per second.
    pub tick_rate: u32,
    /// Requested interpolation delay. Never below
    /// [`crate::MIN_INTERPOLATION_TICKS`].
    pub interpolation_ticks: u32,
    /// Upper bound of the jitter-derived interpolation delay.
    pub max_interpolation_ticks: u32,
    /// How far past the newest snapshot extrapolating fields may go.
    pub max_extrapolation_ticks: u32,
    /// Grace period for locally spawned predicted ghosts, measured from their
    /// spawn tick against the interpolation tick.
    pub predicted_spawn_timeout_ticks: u32,
    /// Ticks of input lead added to the predicted tick.
    pub command_slack_ticks: u32,
    /// Clock error beyond which time snaps instead of converging.
    pub resync_threshold_ticks: u32,
    /// Received snapshots kept per ghost.
    pub history_depth: NonZeroUsize,
    /// Connection id the server assigned to this client, once known.
    pub local_connection: Option<ConnectionId>,
    /// Error smoothing for predicted ghosts; `None` snaps to corrections.
    pub prediction_smoothing: Option<PredictionSmoothing>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            interpolation_ticks: 2,
            max_interpolation_ticks: 16,
            max_extrapolation_ticks: 6,
            predicted_spawn_timeout_ticks: 10,
            command_slack_ticks: 2,
            resync_threshold_ticks: 10,
            history_depth: NonZeroUsize::new(DEFAULT_HISTORY_DEPTH).unwrap_or(NonZeroUsize::MIN),
            local_connection: None,
            prediction_smoothing: None,
        }
    }
}

impl ClientConfig {
    /// Short windows for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_interpolation_ticks: 8,
            predicted_spawn_timeout_ticks: 4,
            history_depth: NonZeroUsize::new(16).unwrap_or(NonZeroUsize::MIN),
            ..Self::default()
        }
    }

    /// Milliseconds per simulation tick.
    #[must_use]
    pub fn tick_ms(&self) -> f32 {
        1000.0 / self.tick_rate.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.tick_rate, 60);
        assert!(config.local_connection.is_none());
        assert!((config.tick_ms() - 16.666_666).abs() < 1e-3);
    }

    #[test]
    fn testing_config_is_tighter() {
        let test = ClientConfig::for_testing();
        let default = ClientConfig::default();
        assert!(test.predicted_spawn_timeout_ticks < default.predicted_spawn_timeout_ticks);
        assert!(test.history_depth < default.history_depth);
    }
}

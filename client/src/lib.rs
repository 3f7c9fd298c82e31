//! Client-side ghost replication for ghostline.
//!
//! The receive system decodes snapshot packets into per-ghost histories,
//! spawns and despawns local entities through the [`GhostWorld`] trait, and
//! writes interpolated or predicted state into them every frame.
//!
//! # Features
//!
//! - All-or-nothing packet application with duplicate and reorder tolerance
//! - Spawn classification against locally predicted spawns
//! - Prespawned scene ghosts bound once their scene is registered
//! - Entity references resolved only while their referent exists
//! - Clock model with jitter-aware interpolation delay and extrapolation
//! - Queued switching between predicted and interpolated representation

mod config;
mod error;
mod interpolation;
mod receive;
mod spawn;
mod switching;
mod time;
mod world;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use interpolation::{
    blend_states, blend_values, field_distance, sample_state, smooth_field, PredictionSmoothing,
};
pub use receive::{ClientStats, GhostClient};
pub use spawn::{NewGhost, PredictedSpawn, SpawnClassifier, TickProximityClassifier};
pub use switching::{PredictionState, PredictionSwitchQueue, SwitchRequest, TransformBlend};
pub use time::{NetworkTime, RttEstimator, TickTime, MIN_INTERPOLATION_TICKS};
pub use world::{GhostWorld, LocalEntity, MemoryWorld};

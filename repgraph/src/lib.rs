//! Server-side ghost replication: decide what each connection receives.
//!
//! This crate owns the live ghost set, the per-connection view of it, and
//! the send system that turns both into snapshot packets through `codec`.
//!
//! # Features
//!
//! - Relevancy filtering with allow and deny lists
//! - Ghost id pooling with acknowledged, delayed reuse
//! - Stable id ranges for prespawned scene ghosts
//! - Priority-ordered greedy packing within a byte budget
//! - Despawn notices repeated until acknowledged

mod config;
mod error;
mod id_pool;
mod relevancy;
mod server;
mod world;

pub use codec::AckWindow;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use id_pool::{GhostIdPool, PrespawnRange, PrespawnRanges};
pub use relevancy::{Relevancy, RelevancyMode};
pub use server::{ConnectionStats, GhostServer};
pub use world::{MemoryWorldView, WorldView};

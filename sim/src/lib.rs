//! Simulated networking for ghostline.
//!
//! This crate wires a [`repgraph::GhostServer`] and any number of
//! [`client::GhostClient`]s through in-memory links with configurable
//! latency, jitter, and loss. End-to-end scenarios and benchmarks run on top
//! of it.
//!
//! # Features
//!
//! - [`LinkConditioner`] presets from perfect to poor
//! - [`Transport`] seam with a seeded [`ConditionedLink`] implementation
//! - [`Harness`] that steps snapshots, commands, acks, and rpcs per tick
//!
//! # Design Principles
//!
//! - **Reproducible** - Every random draw comes from a seeded generator.
//! - **Single-threaded** - One step is one fixed tick; no wall clock.

mod conditioner;
mod error;
mod harness;
mod transport;

pub use conditioner::LinkConditioner;
pub use error::{SimError, SimResult};
pub use harness::{Harness, HarnessConfig, HarnessStats, SimClient, SERVER_CONNECTION};
pub use transport::{ConditionedLink, LinkStats, Transport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_api_exports() {
        let _ = LinkConditioner::default();
        let _ = HarnessConfig::for_testing();
        let _ = ConditionedLink::new(LinkConditioner::perfect(), 0);

        let _: SimResult<()> = Ok(());
    }
}

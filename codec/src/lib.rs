//! Ghost snapshot encoding and decoding for ghostline.
//!
//! This crate ties together bitstream, wire, and schema: it quantizes ghost
//! state, delta-encodes it against acknowledged baselines, and packs the
//! resulting records into size-bounded snapshot packets.
//!
//! # Features
//!
//! - Field quantization and change detection on the quantized form
//! - Per-ghost records with spawn info, enable bits, and group children
//! - Wrap-aware snapshot history and 64-tick acknowledgement windows
//! - All-or-nothing snapshot decoding with explicit limits
//!
//! # Design Principles
//!
//! - **Correctness first** - All invariants are documented and tested.
//! - **Deterministic** - Same inputs produce same outputs.
//! - **Untrusted input** - Every decoded value is range checked.

mod ack;
mod error;
mod history;
mod limits;
mod packet;
mod record;
mod state;
mod types;
mod value;

pub use ack::{AckWindow, SnapshotAck, ACK_WINDOW_BITS};
pub use error::{CodecError, CodecResult, LimitKind, ValueReason};
pub use history::{HistoryError, SnapshotHistory, DEFAULT_HISTORY_DEPTH};
pub use limits::CodecLimits;
pub use packet::{decode_snapshot, SnapshotBuilder, SnapshotPacket, TimeSync};
pub use record::{
    merge_masked, read_record, write_record, BaselineSource, GhostRecord, NoBaselines, SpawnInfo,
};
pub use state::{ComponentState, GhostState, QuantizedState};
pub use types::{ConnectionId, GhostId, GhostRef, NetworkTick};
pub use value::{dequantize, lane_count, normalize, quantize, FieldValue, Quantized};
pub use wire::Limits as WireLimits;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_api_exports() {
        let _ = NetworkTick::new(0);
        let _ = GhostId::new(0);
        let _ = WireLimits::default();
        let _ = CodecLimits::default();
        let _ = AckWindow::new();

        let _: CodecResult<()> = Ok(());
    }

    #[test]
    fn limits_reexported() {
        let limits = WireLimits::default();
        assert!(limits.max_packet_bytes > 0);
    }
}

//! Error types for codec operations.

use std::fmt;

use thiserror::Error;

use crate::types::{GhostId, NetworkTick};

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding snapshots.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("wire error: {0}")]
    Wire(#[from] wire::DecodeError),

    #[error("wire encode error: {0}")]
    Encode(#[from] wire::EncodeError),

    #[error("bitstream error: {0}")]
    Bitstream(#[from] bitstream::BitError),

    /// Peers disagree on the registry. Protocol-fatal.
    #[error("schema hash mismatch: expected 0x{expected:016X}, found 0x{found:016X}")]
    SchemaMismatch { expected: u64, found: u64 },

    /// The packet is not of the kind the caller expected.
    #[error("unexpected packet flags 0x{flags:04X}")]
    UnexpectedPacketKind { flags: u16 },

    #[error("unknown ghost type {raw}")]
    UnknownGhostType { raw: u32 },

    /// A delta names a baseline the receiver no longer (or never) had.
    #[error("ghost {ghost} has no baseline at tick {tick}")]
    MissingBaseline { ghost: GhostId, tick: NetworkTick },

    #[error("ghost {ghost}: baseline distance must be positive")]
    InvalidBaselineDistance { ghost: GhostId },

    /// Group children cannot carry children of their own.
    #[error("ghost {ghost}: nested group children")]
    NestedGroup { ghost: GhostId },

    #[error("ghost state does not match ghost type `{ghost_type}`")]
    StateShapeMismatch { ghost_type: String },

    #[error("field `{field}`: {reason}")]
    InvalidValue { field: String, reason: ValueReason },

    #[error("{kind} limit exceeded: {actual} > {limit}")]
    LimitsExceeded {
        kind: LimitKind,
        limit: usize,
        actual: usize,
    },

    #[error("section {section:?} has {remaining_bits} trailing bits")]
    TrailingSectionData {
        section: wire::SectionTag,
        remaining_bits: usize,
    },

    #[error("duplicate section {section:?}")]
    DuplicateSection { section: wire::SectionTag },
}

/// Why a field value was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueReason {
    /// The value variant does not fit the field kind.
    KindMismatch { expected: String },
    OutOfRange { bits: u8 },
    NotFinite,
    StringTooLong { len: usize, max: usize },
    InvalidUtf8,
}

impl fmt::Display for ValueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KindMismatch { expected } => write!(f, "expected a {expected} value"),
            Self::OutOfRange { bits } => write!(f, "value does not fit in {bits} bits"),
            Self::NotFinite => write!(f, "non-finite value cannot be quantized"),
            Self::StringTooLong { len, max } => write!(f, "string of {len} bytes exceeds {max}"),
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
        }
    }
}

/// Codec limit that was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    GhostsPerSnapshot,
    DespawnsPerSnapshot,
    ChildrenPerGhost,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GhostsPerSnapshot => "ghosts per snapshot",
            Self::DespawnsPerSnapshot => "despawns per snapshot",
            Self::ChildrenPerGhost => "children per ghost",
        };
        write!(f, "{name}")
    }
}

impl CodecError {
    /// `true` for errors that mean the peers cannot talk at all.
    #[must_use]
    pub const fn is_protocol_fatal(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. })
    }
}

//! Error types for bitstream operations.

use thiserror::Error;

/// Result type for bitstream operations.
pub type BitResult<T> = Result<T, BitError>;

/// Errors that can occur during bit-level encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitError {
    /// Attempted to read past the end of the buffer.
    #[error("attempted to read {requested} bits but only {available} bits available")]
    UnexpectedEof {
        /// Number of bits requested.
        requested: usize,
        /// Number of bits available.
        available: usize,
    },

    /// Invalid bit count for the operation.
    #[error("invalid bit count {bits}, maximum allowed is {max_bits}")]
    InvalidBitCount {
        /// The invalid bit count provided.
        bits: usize,
        /// Maximum allowed bits for this operation.
        max_bits: usize,
    },

    /// Value exceeds the range representable by the specified number of bits.
    #[error("value {value} cannot be represented in {bits} bits")]
    ValueOutOfRange {
        /// The value that was out of range.
        value: u64,
        /// Number of bits available.
        bits: usize,
    },

    /// A byte-aligned operation was attempted mid-byte.
    #[error("byte-aligned access at unaligned bit position {bit_position}")]
    MisalignedAccess {
        /// Current bit position of the reader.
        bit_position: usize,
    },

    /// A varint ran past its maximum encoded length.
    #[error("varint exceeds maximum encoded length")]
    InvalidVarint,

    /// A change-mask range does not fit inside the mask.
    #[error("mask range {start_bit}+{num_bits} exceeds mask of {capacity} bits")]
    MaskRangeOutOfBounds {
        /// First bit of the requested range.
        start_bit: usize,
        /// Width of the requested range.
        num_bits: usize,
        /// Mask capacity in bits.
        capacity: usize,
    },
}

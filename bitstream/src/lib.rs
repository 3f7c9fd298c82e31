//! Low-level bit packing primitives for ghostline.
//!
//! This crate provides [`BitWriter`] and [`BitReader`] for bit-level encoding
//! and decoding, and [`ChangeMask`] for per-field change flags and sliding
//! acknowledgement windows.
//!
//! # Design Principles
//!
//! - **No unsafe code** - Mask spans are bounds-checked word slices.
//! - **Bounded operations** - All reads/writes are bounds-checked.
//! - **No domain knowledge** - This crate knows nothing about ghosts, ticks, or components.
//! - **Explicit errors** - All failures return structured errors, never panic.
//!
//! # Example
//!
//! ```
//! use bitstream::{BitReader, BitWriter, ChangeMask};
//!
//! let mut writer = BitWriter::new();
//! writer.write_bit(true);
//! writer.write_bits(42, 7).unwrap();
//! writer.write_packed_i64(-3);
//!
//! let bytes = writer.finish();
//!
//! let mut reader = BitReader::new(&bytes);
//! assert!(reader.read_bit().unwrap());
//! assert_eq!(reader.read_bits(7).unwrap(), 42);
//! assert_eq!(reader.read_packed_i64().unwrap(), -3);
//!
//! let mut mask = ChangeMask::new(64);
//! mask.copy_to(0b1_0101, 30, 5).unwrap();
//! assert_eq!(mask.copy_from(30, 5).unwrap(), 0b1_0101);
//! ```

mod error;
mod mask;
mod reader;
mod writer;

pub use error::{BitError, BitResult};
pub use mask::ChangeMask;
pub use reader::BitReader;
pub use writer::BitWriter;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_roundtrip() {
        let writer = BitWriter::new();
        let bytes = writer.finish();
        assert!(bytes.is_empty());

        let reader = BitReader::new(&bytes);
        assert!(reader.is_empty());
    }

    #[test]
    fn bits_roundtrip_various_sizes() {
        let test_cases = [
            (0b1010u64, 4),
            (0xFFu64, 8),
            (0xABCDu64, 16),
            (0x1234_5678u64, 32),
            (u64::MAX, 64),
        ];

        for (value, bits) in test_cases {
            let mut writer = BitWriter::new();
            writer.write_bits(value, bits).unwrap();
            let bytes = writer.finish();

            let mut reader = BitReader::new(&bytes);
            assert_eq!(
                reader.read_bits(bits).unwrap(),
                value,
                "roundtrip failed for {bits}-bit value {value}"
            );
        }
    }

    #[test]
    fn mixed_roundtrip() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        writer.write_bits(0b1010, 4).unwrap();
        writer.write_packed_u32(70_000);
        writer.align_to_byte();
        writer.write_varu32(300).unwrap();
        writer.write_bits(42, 7).unwrap();
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_bits(4).unwrap(), 0b1010);
        assert_eq!(reader.read_packed_u32().unwrap(), 70_000);
        reader.align_to_byte().unwrap();
        assert_eq!(reader.read_varu32().unwrap(), 300);
        assert_eq!(reader.read_bits(7).unwrap(), 42);
    }
}

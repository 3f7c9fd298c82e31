//! Bit-level writer for encoding packed binary data.

use crate::error::{BitError, BitResult};

/// A bit-level writer for encoding packed binary data.
///
/// Bits are packed MSB-first within each byte. Writes are accumulated in an
/// internal buffer; call [`finish`](Self::finish) to get the final bytes.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    /// The accumulated bytes.
    bytes: Vec<u8>,
    /// Current byte being written (not yet pushed to bytes).
    current_byte: u8,
    /// Number of bits written to `current_byte` (0-7).
    bit_count: u8,
}

impl BitWriter {
    /// Creates a new empty `BitWriter`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `BitWriter` with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            current_byte: 0,
            bit_count: 0,
        }
    }

    /// Returns the number of bits written so far.
    #[must_use]
    pub fn bits_written(&self) -> usize {
        self.bytes.len() * 8 + self.bit_count as usize
    }

    /// Returns the number of bytes the buffer would occupy if finished now.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.bits_written().div_ceil(8)
    }

    /// Clears the writer, keeping its allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.current_byte = 0;
        self.bit_count = 0;
    }

    /// Writes a single bit.
    pub fn write_bit(&mut self, value: bool) {
        self.current_byte = (self.current_byte << 1) | u8::from(value);
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.bytes.push(self.current_byte);
            self.current_byte = 0;
            self.bit_count = 0;
        }
    }

    /// Writes up to 64 bits from an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::InvalidBitCount`] if `bits > 64`.
    /// Returns [`BitError::ValueOutOfRange`] if `value` doesn't fit in `bits`.
    pub fn write_bits(&mut self, value: u64, bits: u8) -> BitResult<()> {
        if bits > 64 {
            return Err(BitError::InvalidBitCount {
                bits: bits as usize,
                max_bits: 64,
            });
        }
        if bits == 0 {
            return Ok(());
        }
        if bits < 64 && value >= (1u64 << bits) {
            return Err(BitError::ValueOutOfRange {
                value,
                bits: bits as usize,
            });
        }
        for i in (0..bits).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
        Ok(())
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        while self.bit_count != 0 {
            self.write_bit(false);
        }
    }

    /// Writes a byte-aligned `u8`.
    pub fn write_u8_aligned(&mut self, value: u8) -> BitResult<()> {
        self.ensure_aligned()?;
        self.bytes.push(value);
        Ok(())
    }

    /// Writes a byte-aligned `u16` (little-endian).
    pub fn write_u16_aligned(&mut self, value: u16) -> BitResult<()> {
        self.write_bytes_aligned(&value.to_le_bytes())
    }

    /// Writes a byte-aligned `u32` (little-endian).
    pub fn write_u32_aligned(&mut self, value: u32) -> BitResult<()> {
        self.write_bytes_aligned(&value.to_le_bytes())
    }

    /// Writes a byte-aligned `u64` (little-endian).
    pub fn write_u64_aligned(&mut self, value: u64) -> BitResult<()> {
        self.write_bytes_aligned(&value.to_le_bytes())
    }

    /// Writes raw bytes at a byte boundary.
    pub fn write_bytes_aligned(&mut self, bytes: &[u8]) -> BitResult<()> {
        self.ensure_aligned()?;
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    /// Writes a byte-aligned varint `u32`.
    pub fn write_varu32(&mut self, value: u32) -> BitResult<()> {
        self.write_varu64(u64::from(value))
    }

    /// Writes a byte-aligned zigzag varint `i32`.
    pub fn write_vars32(&mut self, value: i32) -> BitResult<()> {
        self.write_varu32(zigzag32(value))
    }

    /// Writes a byte-aligned varint `u64`.
    pub fn write_varu64(&mut self, mut value: u64) -> BitResult<()> {
        self.ensure_aligned()?;
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.bytes.push(byte);
                return Ok(());
            }
            self.bytes.push(byte | 0x80);
        }
    }

    /// Writes an unaligned varint: 7-bit groups, each preceded by a
    /// continuation bit.
    pub fn write_packed_u64(&mut self, mut value: u64) {
        loop {
            let group = value & 0x7F;
            value >>= 7;
            self.write_bit(value != 0);
            for i in (0..7).rev() {
                self.write_bit((group >> i) & 1 == 1);
            }
            if value == 0 {
                return;
            }
        }
    }

    /// Writes an unaligned varint `u32`.
    pub fn write_packed_u32(&mut self, value: u32) {
        self.write_packed_u64(u64::from(value));
    }

    /// Writes an unaligned zigzag varint `i64`.
    pub fn write_packed_i64(&mut self, value: i64) {
        self.write_packed_u64(zigzag64(value));
    }

    /// Appends every bit written to `other`, preserving bit granularity.
    pub fn append(&mut self, other: &Self) {
        if self.bit_count == 0 {
            self.bytes.extend_from_slice(&other.bytes);
        } else {
            for &byte in &other.bytes {
                for i in (0..8).rev() {
                    self.write_bit((byte >> i) & 1 == 1);
                }
            }
        }
        for i in (0..other.bit_count).rev() {
            self.write_bit((other.current_byte >> i) & 1 == 1);
        }
    }

    /// Finishes writing and returns the byte buffer.
    ///
    /// If the last byte is incomplete, it is padded with zeros on the right.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.bytes
    }

    /// Finishes writing and appends to the provided buffer.
    pub fn finish_into(mut self, buf: &mut Vec<u8>) {
        self.align_to_byte();
        buf.append(&mut self.bytes);
    }

    fn ensure_aligned(&self) -> BitResult<()> {
        if self.bit_count != 0 {
            return Err(BitError::MisalignedAccess {
                bit_position: self.bits_written(),
            });
        }
        Ok(())
    }
}

pub(crate) const fn zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

pub(crate) const fn zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

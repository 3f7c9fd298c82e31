//! Bit-level reader with bounded operations.

use crate::error::{BitError, BitResult};

/// A bit-level reader for decoding packed binary data.
///
/// All read operations are bounds-checked and return errors on failure.
/// The reader never panics on malformed input.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a new `BitReader` from a byte slice.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Returns the number of bits remaining to read.
    #[must_use]
    pub const fn bits_remaining(&self) -> usize {
        self.data
            .len()
            .saturating_mul(8)
            .saturating_sub(self.bit_pos)
    }

    /// Returns `true` if there are no more bits to read.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits_remaining() == 0
    }

    /// Returns the current bit position.
    #[must_use]
    pub const fn bit_position(&self) -> usize {
        self.bit_pos
    }

    /// Reads a single bit as a boolean.
    pub fn read_bit(&mut self) -> BitResult<bool> {
        self.ensure_bits(1)?;
        let byte_idx = self.bit_pos / 8;
        let bit_idx = self.bit_pos % 8;
        let bit = (self.data[byte_idx] >> (7 - bit_idx)) & 1;
        self.bit_pos += 1;
        Ok(bit == 1)
    }

    /// Reads up to 64 bits as an unsigned integer.
    pub fn read_bits(&mut self, bits: u8) -> BitResult<u64> {
        if bits > 64 {
            return Err(BitError::InvalidBitCount {
                bits: bits as usize,
                max_bits: 64,
            });
        }
        self.ensure_bits(bits as usize)?;
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value)
    }

    /// Aligns to the next byte boundary.
    pub fn align_to_byte(&mut self) -> BitResult<()> {
        let rem = self.bit_pos % 8;
        if rem == 0 {
            return Ok(());
        }
        let skip = 8 - rem;
        self.ensure_bits(skip)?;
        self.bit_pos += skip;
        Ok(())
    }

    /// Reads a byte-aligned `u8`.
    pub fn read_u8_aligned(&mut self) -> BitResult<u8> {
        let [byte] = self.read_aligned_array::<1>()?;
        Ok(byte)
    }

    /// Reads a byte-aligned `u16` (little-endian).
    pub fn read_u16_aligned(&mut self) -> BitResult<u16> {
        Ok(u16::from_le_bytes(self.read_aligned_array::<2>()?))
    }

    /// Reads a byte-aligned `u32` (little-endian).
    pub fn read_u32_aligned(&mut self) -> BitResult<u32> {
        Ok(u32::from_le_bytes(self.read_aligned_array::<4>()?))
    }

    /// Reads a byte-aligned `u64` (little-endian).
    pub fn read_u64_aligned(&mut self) -> BitResult<u64> {
        Ok(u64::from_le_bytes(self.read_aligned_array::<8>()?))
    }

    /// Borrows `len` bytes at a byte boundary.
    pub fn read_bytes_aligned(&mut self, len: usize) -> BitResult<&'a [u8]> {
        self.ensure_aligned()?;
        self.ensure_bits(len.saturating_mul(8))?;
        let idx = self.bit_pos / 8;
        let slice = &self.data[idx..idx + len];
        self.bit_pos += len * 8;
        Ok(slice)
    }

    /// Reads a byte-aligned varint `u32`.
    pub fn read_varu32(&mut self) -> BitResult<u32> {
        let value = self.read_var(5)?;
        u32::try_from(value).map_err(|_| BitError::InvalidVarint)
    }

    /// Reads a byte-aligned zigzag varint `i32`.
    pub fn read_vars32(&mut self) -> BitResult<i32> {
        let value = self.read_varu32()?;
        Ok(((value >> 1) as i32) ^ (-((value & 1) as i32)))
    }

    /// Reads a byte-aligned varint `u64`.
    pub fn read_varu64(&mut self) -> BitResult<u64> {
        self.read_var(10)
    }

    /// Reads an unaligned varint written by
    /// [`BitWriter::write_packed_u64`](crate::BitWriter::write_packed_u64).
    pub fn read_packed_u64(&mut self) -> BitResult<u64> {
        let mut result = 0u64;
        for group in 0..10u32 {
            let more = self.read_bit()?;
            let bits = self.read_bits(7)?;
            let shift = group * 7;
            if shift == 63 && bits > 1 {
                return Err(BitError::InvalidVarint);
            }
            result |= bits << shift;
            if !more {
                return Ok(result);
            }
        }
        Err(BitError::InvalidVarint)
    }

    /// Reads an unaligned varint `u32`.
    pub fn read_packed_u32(&mut self) -> BitResult<u32> {
        let value = self.read_packed_u64()?;
        u32::try_from(value).map_err(|_| BitError::InvalidVarint)
    }

    /// Reads an unaligned zigzag varint `i64`.
    pub fn read_packed_i64(&mut self) -> BitResult<i64> {
        let value = self.read_packed_u64()?;
        Ok(((value >> 1) as i64) ^ (-((value & 1) as i64)))
    }

    fn read_var(&mut self, max_bytes: u32) -> BitResult<u64> {
        self.ensure_aligned()?;
        let mut result = 0u64;
        for i in 0..max_bytes {
            let byte = self.read_u8_aligned()?;
            result |= u64::from(byte & 0x7F) << (i * 7);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(BitError::InvalidVarint)
    }

    fn ensure_aligned(&self) -> BitResult<()> {
        if self.bit_pos % 8 != 0 {
            return Err(BitError::MisalignedAccess {
                bit_position: self.bit_pos,
            });
        }
        Ok(())
    }

    fn ensure_bits(&self, bits: usize) -> BitResult<()> {
        let available = self.bits_remaining();
        if bits > available {
            return Err(BitError::UnexpectedEof {
                requested: bits,
                available,
            });
        }
        Ok(())
    }

    fn read_aligned_array<const N: usize>(&mut self) -> BitResult<[u8; N]> {
        let slice = self.read_bytes_aligned(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

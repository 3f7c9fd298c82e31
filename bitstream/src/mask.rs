//! Bounds-checked change-mask bit spans.
//!
//! A [`ChangeMask`] is a flat array of 32-bit words addressed by bit index.
//! Bit `i` lives in word `i / 32` at position `i % 32` (LSB first). Ranges
//! of up to 32 bits may straddle a word boundary.

use crate::error::{BitError, BitResult};
use crate::reader::BitReader;
use crate::writer::BitWriter;

const WORD_BITS: usize = 32;

/// A fixed-width bit buffer used for per-field change flags and ack windows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeMask {
    words: Vec<u32>,
    bit_len: usize,
}

impl ChangeMask {
    /// Creates a zeroed mask holding `bit_len` bits.
    #[must_use]
    pub fn new(bit_len: usize) -> Self {
        Self {
            words: vec![0; bit_len.div_ceil(WORD_BITS)],
            bit_len,
        }
    }

    /// Number of addressable bits.
    #[must_use]
    pub const fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Backing words.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Returns `true` if any bit is set.
    #[must_use]
    pub fn any(&self) -> bool {
        self.words.iter().any(|&w| w != 0)
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Reads a single bit.
    pub fn get(&self, bit: usize) -> BitResult<bool> {
        Ok(self.copy_from(bit, 1)? == 1)
    }

    /// Sets or clears a single bit.
    pub fn set(&mut self, bit: usize, value: bool) -> BitResult<()> {
        self.reset(bit, 1)?;
        self.copy_to(u32::from(value), bit, 1)
    }

    /// Clears `num_bits` bits starting at `start_bit`.
    pub fn reset(&mut self, start_bit: usize, num_bits: usize) -> BitResult<()> {
        self.check_word_range(start_bit, num_bits)?;
        if num_bits == 0 {
            return Ok(());
        }
        let idx = start_bit / WORD_BITS;
        let shift = start_bit % WORD_BITS;
        let first = num_bits.min(WORD_BITS - shift);
        self.words[idx] &= !(low_bits(first) << shift);
        if num_bits > first {
            self.words[idx + 1] &= !low_bits(num_bits - first);
        }
        Ok(())
    }

    /// ORs `value` into `num_bits` bits starting at `start_bit`.
    ///
    /// Callers reset the range first. `value` must not have bits set at or
    /// above `num_bits`; such bits land in the neighbouring range.
    pub fn copy_to(&mut self, value: u32, start_bit: usize, num_bits: usize) -> BitResult<()> {
        self.check_word_range(start_bit, num_bits)?;
        debug_assert!(
            num_bits >= WORD_BITS || u64::from(value) >> num_bits == 0,
            "value {value:#x} wider than {num_bits} bits"
        );
        if num_bits == 0 {
            return Ok(());
        }
        let idx = start_bit / WORD_BITS;
        let shift = start_bit % WORD_BITS;
        self.words[idx] |= value << shift;
        if shift + num_bits > WORD_BITS {
            self.words[idx + 1] |= value >> (WORD_BITS - shift);
        }
        Ok(())
    }

    /// Reads `num_bits` bits starting at `start_bit`.
    pub fn copy_from(&self, start_bit: usize, num_bits: usize) -> BitResult<u32> {
        self.check_word_range(start_bit, num_bits)?;
        if num_bits == 0 {
            return Ok(0);
        }
        let idx = start_bit / WORD_BITS;
        let shift = start_bit % WORD_BITS;
        let mut value = self.words[idx] >> shift;
        if shift + num_bits > WORD_BITS {
            value |= self.words[idx + 1] << (WORD_BITS - shift);
        }
        Ok(value & low_bits(num_bits))
    }

    /// Moves every bit up by `count` positions; bits shifted past the end
    /// are dropped and the low bits become zero.
    pub fn shift_up(&mut self, count: usize) {
        if count >= self.bit_len {
            self.clear();
            return;
        }
        for bit in (0..self.bit_len).rev() {
            let value = bit
                .checked_sub(count)
                .is_some_and(|src| self.bit_unchecked(src));
            self.set_unchecked(bit, value);
        }
    }

    /// Writes `num_bits` bits starting at `start_bit` to `writer`.
    pub fn write_range(
        &self,
        writer: &mut BitWriter,
        start_bit: usize,
        num_bits: usize,
    ) -> BitResult<()> {
        self.check_range(start_bit, num_bits)?;
        let mut offset = 0;
        while offset < num_bits {
            let chunk = (num_bits - offset).min(WORD_BITS);
            let value = self.copy_from(start_bit + offset, chunk)?;
            writer.write_bits(u64::from(value), chunk as u8)?;
            offset += chunk;
        }
        Ok(())
    }

    /// Reads `num_bits` bits from `reader` into the range at `start_bit`.
    ///
    /// The range is reset first; values come from a bounded read so they
    /// never exceed the chunk width.
    pub fn read_range(
        &mut self,
        reader: &mut BitReader<'_>,
        start_bit: usize,
        num_bits: usize,
    ) -> BitResult<()> {
        self.check_range(start_bit, num_bits)?;
        let mut offset = 0;
        while offset < num_bits {
            let chunk = (num_bits - offset).min(WORD_BITS);
            let value = reader.read_bits(chunk as u8)?;
            self.reset(start_bit + offset, chunk)?;
            self.copy_to(value as u32, start_bit + offset, chunk)?;
            offset += chunk;
        }
        Ok(())
    }

    /// Iterates the indices of set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.bit_len).filter(|&bit| self.bit_unchecked(bit))
    }

    fn bit_unchecked(&self, bit: usize) -> bool {
        (self.words[bit / WORD_BITS] >> (bit % WORD_BITS)) & 1 == 1
    }

    fn set_unchecked(&mut self, bit: usize, value: bool) {
        let word = &mut self.words[bit / WORD_BITS];
        let flag = 1u32 << (bit % WORD_BITS);
        if value {
            *word |= flag;
        } else {
            *word &= !flag;
        }
    }

    fn check_word_range(&self, start_bit: usize, num_bits: usize) -> BitResult<()> {
        if num_bits > WORD_BITS {
            return Err(BitError::InvalidBitCount {
                bits: num_bits,
                max_bits: WORD_BITS,
            });
        }
        self.check_range(start_bit, num_bits)
    }

    fn check_range(&self, start_bit: usize, num_bits: usize) -> BitResult<()> {
        let end = start_bit.checked_add(num_bits);
        if end.map_or(true, |end| end > self.bit_len) {
            return Err(BitError::MaskRangeOutOfBounds {
                start_bit,
                num_bits,
                capacity: self.bit_len,
            });
        }
        Ok(())
    }
}

const fn low_bits(count: usize) -> u32 {
    if count >= WORD_BITS {
        u32::MAX
    } else {
        (1u32 << count) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_across_word_boundary_leaves_neighbours() {
        let mut mask = ChangeMask::new(256);
        mask.copy_to((1 << 20) - 1, 0, 20).unwrap();
        mask.copy_to(u32::MAX >> 3, 29, 29).unwrap();
        mask.reset(20, 9).unwrap();

        mask.copy_to(0b1_0110_1011, 20, 9).unwrap();
        assert_eq!(mask.copy_from(20, 9).unwrap(), 0b1_0110_1011);
        assert_eq!(mask.copy_from(0, 20).unwrap(), (1 << 20) - 1);
        assert_eq!(mask.copy_from(29, 29).unwrap(), u32::MAX >> 3);
    }

    #[test]
    fn straddling_range_roundtrips() {
        let mut mask = ChangeMask::new(64);
        mask.copy_to(0x1FF, 28, 9).unwrap();
        assert_eq!(mask.words(), &[0xF000_0000, 0x1F]);
        assert_eq!(mask.copy_from(28, 9).unwrap(), 0x1FF);
        mask.reset(28, 9).unwrap();
        assert!(!mask.any());
    }

    #[test]
    fn full_word_copy() {
        let mut mask = ChangeMask::new(96);
        mask.copy_to(0xDEAD_BEEF, 40, 32).unwrap();
        assert_eq!(mask.copy_from(40, 32).unwrap(), 0xDEAD_BEEF);
        assert_eq!(mask.count_ones(), 0xDEAD_BEEFu32.count_ones());
    }

    #[test]
    fn reset_only_clears_range() {
        let mut mask = ChangeMask::new(64);
        mask.copy_to(u32::MAX, 0, 32).unwrap();
        mask.copy_to(u32::MAX, 32, 32).unwrap();
        mask.reset(30, 4).unwrap();
        assert_eq!(mask.words(), &[0x3FFF_FFFF, 0xFFFF_FFFC]);
    }

    #[test]
    fn out_of_range_is_an_error() {
        let mut mask = ChangeMask::new(40);
        assert!(matches!(
            mask.copy_to(1, 39, 2),
            Err(BitError::MaskRangeOutOfBounds { .. })
        ));
        assert!(matches!(
            mask.copy_from(usize::MAX, 2),
            Err(BitError::MaskRangeOutOfBounds { .. })
        ));
        assert!(mask.reset(0, 41).is_err());
        let wide = ChangeMask::new(128);
        assert!(matches!(
            wide.copy_from(0, 33),
            Err(BitError::InvalidBitCount { bits: 33, .. })
        ));
    }

    #[test]
    fn shift_up_drops_high_bits() {
        let mut mask = ChangeMask::new(64);
        mask.set(0, true).unwrap();
        mask.set(63, true).unwrap();
        mask.shift_up(2);
        assert!(mask.get(2).unwrap());
        assert_eq!(mask.count_ones(), 1);
        mask.shift_up(64);
        assert!(!mask.any());
    }

    #[test]
    fn wire_roundtrip_of_wide_range() {
        let mut mask = ChangeMask::new(70);
        for bit in [0, 5, 31, 32, 33, 69] {
            mask.set(bit, true).unwrap();
        }
        let mut writer = BitWriter::new();
        mask.write_range(&mut writer, 0, 70).unwrap();
        let bytes = writer.finish();

        let mut decoded = ChangeMask::new(70);
        let mut reader = BitReader::new(&bytes);
        decoded.read_range(&mut reader, 0, 70).unwrap();
        assert_eq!(decoded, mask);
        assert_eq!(
            decoded.iter_ones().collect::<Vec<_>>(),
            vec![0, 5, 31, 32, 33, 69]
        );
    }
}

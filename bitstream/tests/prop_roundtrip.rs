use bitstream::{BitReader, BitWriter, ChangeMask};
use proptest::prelude::*;

/// One field as a ghost record lays it out: a presence bit, a fixed-width
/// prefix, then a packed delta.
#[derive(Clone, Debug)]
struct Field {
    present: bool,
    width: u8,
    prefix: u64,
    delta: i64,
}

fn field_strategy() -> impl Strategy<Value = Field> {
    (any::<bool>(), 1u8..=64, any::<u64>(), any::<i64>()).prop_map(
        |(present, width, prefix, delta)| Field {
            present,
            width,
            prefix: if width == 64 {
                prefix
            } else {
                prefix & ((1u64 << width) - 1)
            },
            delta,
        },
    )
}

proptest! {
    #[test]
    fn unaligned_fields_then_aligned_trailer(
        fields in prop::collection::vec(field_strategy(), 1..48),
        count in any::<u32>(),
        stamp in any::<u32>(),
    ) {
        let mut writer = BitWriter::new();
        for field in &fields {
            writer.write_bit(field.present);
            if field.present {
                writer.write_bits(field.prefix, field.width).unwrap();
                writer.write_packed_i64(field.delta);
            }
        }
        writer.align_to_byte();
        writer.write_varu32(count).unwrap();
        writer.write_u32_aligned(stamp).unwrap();
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        for field in &fields {
            prop_assert_eq!(reader.read_bit().unwrap(), field.present);
            if field.present {
                prop_assert_eq!(reader.read_bits(field.width).unwrap(), field.prefix);
                prop_assert_eq!(reader.read_packed_i64().unwrap(), field.delta);
            }
        }
        reader.align_to_byte().unwrap();
        prop_assert_eq!(reader.read_varu32().unwrap(), count);
        prop_assert_eq!(reader.read_u32_aligned().unwrap(), stamp);
        prop_assert!(reader.is_empty());
    }

    #[test]
    fn mask_range_leaves_neighbours_untouched(
        start in 0usize..224,
        num in 1usize..=32,
        value in any::<u32>(),
        background in any::<u32>(),
    ) {
        let value = if num == 32 { value } else { value & ((1u32 << num) - 1) };
        let mut mask = ChangeMask::new(256);
        for word in 0..8 {
            mask.copy_to(background, word * 32, 32).unwrap();
        }
        let before = mask.clone();

        mask.reset(start, num).unwrap();
        mask.copy_to(value, start, num).unwrap();
        prop_assert_eq!(mask.copy_from(start, num).unwrap(), value);

        for bit in (0..256).filter(|b| *b < start || *b >= start + num) {
            prop_assert_eq!(mask.get(bit).unwrap(), before.get(bit).unwrap());
        }
    }
}

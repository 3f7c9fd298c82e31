use bitstream::{BitReader, BitWriter, ChangeMask};

#[test]
fn change_mask_survives_wire_at_unaligned_offset() {
    let mut mask = ChangeMask::new(45);
    mask.copy_to(0b101, 30, 3).unwrap();
    mask.set(44, true).unwrap();

    let mut writer = BitWriter::new();
    writer.write_bits(0b11, 2).unwrap();
    mask.write_range(&mut writer, 0, 45).unwrap();
    writer.write_bit(true);
    let bytes = writer.finish();

    let mut reader = BitReader::new(&bytes);
    assert_eq!(reader.read_bits(2).unwrap(), 0b11);
    let mut decoded = ChangeMask::new(45);
    decoded.read_range(&mut reader, 0, 45).unwrap();
    assert!(reader.read_bit().unwrap());
    assert_eq!(decoded, mask);
}

#[test]
fn truncated_mask_read_fails() {
    let bytes = [0xFF, 0xFF];
    let mut reader = BitReader::new(&bytes);
    let mut mask = ChangeMask::new(20);
    assert!(mask.read_range(&mut reader, 0, 20).is_err());
}

use proptest::prelude::*;
use wire::{decode_packet, Limits, PacketFlags, PacketWriter, SectionTag};

proptest! {
    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode_packet(&bytes, &Limits::for_testing());
    }

    #[test]
    fn written_packets_decode(
        tick in any::<u32>(),
        hash in any::<u64>(),
        despawn in prop::collection::vec(any::<u8>(), 0..64),
        ghosts in prop::collection::vec(any::<u8>(), 0..300),
    ) {
        let mut writer = PacketWriter::new(PacketFlags::snapshot(), hash, tick);
        writer.push_section(SectionTag::GhostDespawn, &despawn).unwrap();
        writer.push_section(SectionTag::GhostSnapshot, &ghosts).unwrap();
        let bytes = writer.finish(usize::MAX).unwrap();

        let packet = decode_packet(&bytes, &Limits::default()).unwrap();
        prop_assert_eq!(packet.header.tick, tick);
        prop_assert_eq!(packet.header.schema_hash, hash);
        prop_assert_eq!(packet.section(SectionTag::GhostDespawn).unwrap(), &despawn[..]);
        prop_assert_eq!(packet.section(SectionTag::GhostSnapshot).unwrap(), &ghosts[..]);
    }
}

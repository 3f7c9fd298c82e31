#![no_main]

use codec::{decode_snapshot, CodecLimits, NoBaselines};
use libfuzzer_sys::fuzz_target;
use schema::{ComponentType, FieldDef, FieldKind, GhostRegistry, GhostTypeDef, StringCapacity};
use wire::{PacketFlags, PacketWriter, SectionTag};

fn registry() -> GhostRegistry {
    GhostRegistry::builder()
        .component(ComponentType::single(
            "Body",
            vec![
                FieldDef::new("position", FieldKind::float3(100)),
                FieldDef::new("rotation", FieldKind::quaternion(1000)),
                FieldDef::new("hp", FieldKind::int32()),
                FieldDef::new("name", FieldKind::fixed_string(StringCapacity::Bytes32)),
                FieldDef::new("target", FieldKind::Entity),
            ],
        ))
        .ghost(GhostTypeDef::new("Actor").component("Body"))
        .build()
        .unwrap()
}

const TAGS: [SectionTag; 3] = [
    SectionTag::GhostSnapshot,
    SectionTag::GhostDespawn,
    SectionTag::TimeSync,
];

fuzz_target!(|data: &[u8]| {
    let registry = registry();
    let limits = CodecLimits::for_testing();
    let wire_limits = wire::Limits::for_testing();

    // Raw bytes mostly fail the header checks.
    let _ = decode_snapshot(&registry, data, &wire_limits, &limits, &NoBaselines);

    // Frame the input behind a valid header so the section decoders run.
    let mut writer = PacketWriter::new(PacketFlags::snapshot(), registry.hash(), 7);
    let mut idx = 0usize;
    while idx < data.len() {
        let tag = TAGS[usize::from(data[idx]) % TAGS.len()];
        let len = usize::from(data.get(idx + 1).copied().unwrap_or(0));
        let start = (idx + 2).min(data.len());
        let end = (start + len).min(data.len());
        if writer.push_section(tag, &data[start..end]).is_err() {
            break;
        }
        idx = end.max(idx + 2);
    }
    if let Ok(bytes) = writer.finish(wire_limits.max_packet_bytes) {
        let _ = decode_snapshot(&registry, &bytes, &wire_limits, &limits, &NoBaselines);
    }
});

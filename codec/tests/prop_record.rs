use bitstream::{BitReader, BitWriter};
use codec::{
    read_record, write_record, CodecLimits, FieldValue, GhostId, GhostRecord, GhostState,
    NetworkTick, NoBaselines, QuantizedState,
};
use proptest::prelude::*;
use schema::{ComponentType, FieldDef, FieldKind, GhostRegistry, GhostTypeDef, GhostTypeId};

fn registry() -> GhostRegistry {
    GhostRegistry::builder()
        .component(ComponentType::single(
            "Body",
            vec![
                FieldDef::new("alive", FieldKind::Bool),
                FieldDef::new("hp", FieldKind::int32()),
                FieldDef::new("ammo", FieldKind::uint64()),
                FieldDef::new("pos", FieldKind::float2(100)),
                FieldDef::new("exact", FieldKind::float(0)),
                FieldDef::new("mass", FieldKind::double(1000)),
            ],
        ))
        .ghost(GhostTypeDef::new("Body").component("Body"))
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn records_decode_to_the_encoded_state(
        id in 0u32..=0x7FFF_FFFF,
        tick in 1u32..,
        alive in any::<bool>(),
        hp in any::<i32>(),
        ammo in any::<u64>(),
        x in -1.0e6f32..1.0e6,
        y in -1.0e6f32..1.0e6,
        exact in any::<f32>(),
        mass in -1.0e9f64..1.0e9,
    ) {
        let registry = registry();
        let layout = &registry.ghosts()[0];
        let mut state = GhostState::default_for(layout);
        state.set_field(0, 0, FieldValue::Bool(alive));
        state.set_field(0, 1, FieldValue::Int(i64::from(hp)));
        state.set_field(0, 2, FieldValue::UInt(ammo));
        state.set_field(0, 3, FieldValue::Float2([x, y]));
        state.set_field(0, 4, FieldValue::Float(exact));
        state.set_field(0, 5, FieldValue::Double(mass));
        let state = QuantizedState::from_state(layout, &state).unwrap();

        let record = GhostRecord {
            ghost_id: GhostId::new(id),
            ghost_type: GhostTypeId::new(0),
            spawn: None,
            baseline: None,
            mask: state.diff(&QuantizedState::default_for(layout)),
            state,
            children: Vec::new(),
        };
        let tick = NetworkTick::new(tick);
        let mut w = BitWriter::new();
        write_record(&mut w, &registry, tick, &record, &NoBaselines).unwrap();
        let bytes = w.finish();
        let decoded = read_record(
            &mut BitReader::new(&bytes),
            &registry,
            tick,
            &NoBaselines,
            &CodecLimits::default(),
        )
        .unwrap();
        prop_assert_eq!(decoded, record);
    }

    #[test]
    fn garbage_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let registry = registry();
        let _ = read_record(
            &mut BitReader::new(&bytes),
            &registry,
            NetworkTick::new(5),
            &NoBaselines,
            &CodecLimits::for_testing(),
        );
    }
}

//! Snapshot packet assembly and decoding.
//!
//! A snapshot packet carries up to three sections:
//!
//! - `GhostDespawn`: aligned varint count, then aligned varint ghost ids.
//! - `TimeSync`: aligned `u32` echoed client time, `u32` server hold time.
//! - `GhostSnapshot`: aligned varint record count, then bit-packed records.

use bitstream::{BitReader, BitWriter};
use schema::GhostRegistry;
use wire::{decode_packet, Limits, PacketFlags, PacketWriter, SectionTag, HEADER_SIZE};

use crate::error::{CodecError, CodecResult, LimitKind};
use crate::limits::CodecLimits;
use crate::record::{read_record, BaselineSource, GhostRecord};
use crate::types::{GhostId, NetworkTick};

/// Worst-case framing of one section: tag plus a five byte length.
const SECTION_OVERHEAD: usize = 1 + 5;
const VARINT_MAX: usize = 5;
const TIME_SYNC_LEN: usize = 8;

/// Round-trip timing echoed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSync {
    /// Client timestamp from the newest ack.
    pub echo_ms: u32,
    /// Time the server held that ack before this send.
    pub hold_ms: u32,
}

/// A decoded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPacket {
    pub tick: NetworkTick,
    pub despawns: Vec<GhostId>,
    pub records: Vec<GhostRecord>,
    pub time_sync: Option<TimeSync>,
}

/// Packs despawns and encoded records into a single size-bounded packet.
#[derive(Debug)]
pub struct SnapshotBuilder {
    schema_hash: u64,
    tick: NetworkTick,
    budget: usize,
    despawns: Vec<GhostId>,
    time_sync: Option<TimeSync>,
    records: BitWriter,
    record_count: u32,
}

impl SnapshotBuilder {
    #[must_use]
    pub fn new(registry: &GhostRegistry, tick: NetworkTick, budget: usize) -> Self {
        Self {
            schema_hash: registry.hash(),
            tick,
            budget,
            despawns: Vec::new(),
            time_sync: None,
            records: BitWriter::new(),
            record_count: 0,
        }
    }

    /// Number of records accepted so far.
    #[must_use]
    pub const fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Queues a despawn notice if it still fits.
    pub fn push_despawn(&mut self, ghost: GhostId) -> bool {
        if self.estimate(self.records.bits_written(), self.despawns.len() + 1) > self.budget {
            return false;
        }
        self.despawns.push(ghost);
        true
    }

    pub fn set_time_sync(&mut self, sync: TimeSync) {
        self.time_sync = Some(sync);
    }

    /// Appends an encoded record if the packet stays within budget.
    pub fn try_push(&mut self, record: &BitWriter) -> bool {
        let bits = self.records.bits_written() + record.bits_written();
        if self.estimate(bits, self.despawns.len()) > self.budget {
            return false;
        }
        self.records.append(record);
        self.record_count += 1;
        true
    }

    /// Whether `record` fits a packet carrying nothing else.
    #[must_use]
    pub fn fits_alone(&self, record: &BitWriter) -> bool {
        HEADER_SIZE + SECTION_OVERHEAD + VARINT_MAX + record.bits_written().div_ceil(8)
            <= self.budget
    }

    /// `true` when nothing but timing would be sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.record_count == 0 && self.despawns.is_empty()
    }

    /// Produces the framed packet.
    pub fn finish(self) -> CodecResult<Vec<u8>> {
        let mut packet = PacketWriter::new(PacketFlags::snapshot(), self.schema_hash, self.tick.value());

        if !self.despawns.is_empty() {
            let mut body = BitWriter::with_capacity(VARINT_MAX * (self.despawns.len() + 1));
            body.write_varu32(len_u32(self.despawns.len()))?;
            for ghost in &self.despawns {
                body.write_varu32(ghost.raw())?;
            }
            packet.push_section(SectionTag::GhostDespawn, &body.finish())?;
        }

        if let Some(sync) = self.time_sync {
            let mut body = BitWriter::with_capacity(TIME_SYNC_LEN);
            body.write_u32_aligned(sync.echo_ms)?;
            body.write_u32_aligned(sync.hold_ms)?;
            packet.push_section(SectionTag::TimeSync, &body.finish())?;
        }

        if self.record_count > 0 {
            let mut body = BitWriter::with_capacity(VARINT_MAX + self.records.byte_len());
            body.write_varu32(self.record_count)?;
            body.append(&self.records);
            packet.push_section(SectionTag::GhostSnapshot, &body.finish())?;
        }

        Ok(packet.finish(self.budget)?)
    }

    fn estimate(&self, record_bits: usize, despawns: usize) -> usize {
        let mut size = HEADER_SIZE;
        if despawns > 0 {
            size += SECTION_OVERHEAD + VARINT_MAX * (despawns + 1);
        }
        if self.time_sync.is_some() {
            size += SECTION_OVERHEAD + TIME_SYNC_LEN;
        }
        if record_bits > 0 {
            size += SECTION_OVERHEAD + VARINT_MAX + record_bits.div_ceil(8);
        }
        size
    }
}

/// Decodes a snapshot packet. Either every record decodes or none is
/// returned.
pub fn decode_snapshot(
    registry: &GhostRegistry,
    bytes: &[u8],
    wire_limits: &Limits,
    limits: &CodecLimits,
    baselines: &dyn BaselineSource,
) -> CodecResult<SnapshotPacket> {
    let packet = decode_packet(bytes, wire_limits)?;
    let header = packet.header;
    if !header.flags.is_snapshot() {
        return Err(CodecError::UnexpectedPacketKind {
            flags: header.flags.raw(),
        });
    }
    if header.schema_hash != registry.hash() {
        return Err(CodecError::SchemaMismatch {
            expected: registry.hash(),
            found: header.schema_hash,
        });
    }
    for (i, section) in packet.sections.iter().enumerate() {
        if packet.sections[..i].iter().any(|s| s.tag == section.tag) {
            return Err(CodecError::DuplicateSection {
                section: section.tag,
            });
        }
    }

    let tick = NetworkTick::new(header.tick);
    let despawns = match packet.section(SectionTag::GhostDespawn) {
        Some(body) => decode_despawns(body, limits)?,
        None => Vec::new(),
    };
    let time_sync = packet
        .section(SectionTag::TimeSync)
        .map(decode_time_sync)
        .transpose()?;
    let records = match packet.section(SectionTag::GhostSnapshot) {
        Some(body) => decode_records(registry, tick, body, limits, baselines)?,
        None => Vec::new(),
    };

    log::trace!(
        "decoded snapshot {tick}: {} records, {} despawns",
        records.len(),
        despawns.len()
    );
    Ok(SnapshotPacket {
        tick,
        despawns,
        records,
        time_sync,
    })
}

fn decode_despawns(body: &[u8], limits: &CodecLimits) -> CodecResult<Vec<GhostId>> {
    let mut r = BitReader::new(body);
    let count = r.read_varu32()? as usize;
    if count > limits.max_despawns_per_snapshot {
        return Err(CodecError::LimitsExceeded {
            kind: LimitKind::DespawnsPerSnapshot,
            limit: limits.max_despawns_per_snapshot,
            actual: count,
        });
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(GhostId::new(r.read_varu32()?));
    }
    ensure_consumed(&r, SectionTag::GhostDespawn, 0)?;
    Ok(out)
}

fn decode_time_sync(body: &[u8]) -> CodecResult<TimeSync> {
    let mut r = BitReader::new(body);
    let sync = TimeSync {
        echo_ms: r.read_u32_aligned()?,
        hold_ms: r.read_u32_aligned()?,
    };
    ensure_consumed(&r, SectionTag::TimeSync, 0)?;
    Ok(sync)
}

fn decode_records(
    registry: &GhostRegistry,
    tick: NetworkTick,
    body: &[u8],
    limits: &CodecLimits,
    baselines: &dyn BaselineSource,
) -> CodecResult<Vec<GhostRecord>> {
    let mut r = BitReader::new(body);
    let count = r.read_varu32()? as usize;
    if count > limits.max_ghosts_per_snapshot {
        return Err(CodecError::LimitsExceeded {
            kind: LimitKind::GhostsPerSnapshot,
            limit: limits.max_ghosts_per_snapshot,
            actual: count,
        });
    }
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(read_record(&mut r, registry, tick, baselines, limits)?);
    }
    // Up to seven bits of zero padding close the final byte.
    ensure_consumed(&r, SectionTag::GhostSnapshot, 7)?;
    Ok(records)
}

fn ensure_consumed(r: &BitReader<'_>, section: SectionTag, padding: usize) -> CodecResult<()> {
    let remaining_bits = r.bits_remaining();
    if remaining_bits > padding {
        return Err(CodecError::TrailingSectionData {
            section,
            remaining_bits,
        });
    }
    Ok(())
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{write_record, NoBaselines, SpawnInfo};
    use crate::state::{GhostState, QuantizedState};
    use crate::value::FieldValue;
    use schema::{ComponentType, FieldDef, FieldKind, GhostTypeDef, GhostTypeId};

    fn registry() -> GhostRegistry {
        GhostRegistry::builder()
            .component(ComponentType::single(
                "Position",
                vec![FieldDef::new("xyz", FieldKind::float3(100))],
            ))
            .ghost(GhostTypeDef::new("Ball").component("Position"))
            .build()
            .unwrap()
    }

    fn encoded(registry: &GhostRegistry, id: u32, x: f32) -> (GhostRecord, BitWriter) {
        let layout = &registry.ghosts()[0];
        let mut state = GhostState::default_for(layout);
        state.set_field(0, 0, FieldValue::Float3([x, 0.0, 0.0]));
        let state = QuantizedState::from_state(layout, &state).unwrap();
        let record = GhostRecord {
            ghost_id: GhostId::new(id),
            ghost_type: GhostTypeId::new(0),
            spawn: Some(SpawnInfo {
                spawn_tick: NetworkTick::new(1),
                owner: None,
            }),
            baseline: None,
            mask: state.diff(&QuantizedState::default_for(layout)),
            state,
            children: Vec::new(),
        };
        let mut w = BitWriter::new();
        write_record(&mut w, registry, NetworkTick::new(3), &record, &NoBaselines).unwrap();
        (record, w)
    }

    fn decode(registry: &GhostRegistry, bytes: &[u8]) -> CodecResult<SnapshotPacket> {
        decode_snapshot(
            registry,
            bytes,
            &Limits::default(),
            &CodecLimits::default(),
            &NoBaselines,
        )
    }

    #[test]
    fn builds_and_decodes_all_sections() {
        let registry = registry();
        let mut builder = SnapshotBuilder::new(&registry, NetworkTick::new(3), 1400);
        assert!(builder.push_despawn(GhostId::new(77)));
        builder.set_time_sync(TimeSync {
            echo_ms: 500,
            hold_ms: 16,
        });
        let (a, wa) = encoded(&registry, 1, 1.5);
        let (b, wb) = encoded(&registry, 2, -3.0);
        assert!(builder.try_push(&wa));
        assert!(builder.try_push(&wb));
        let bytes = builder.finish().unwrap();

        let packet = decode(&registry, &bytes).unwrap();
        assert_eq!(packet.tick, NetworkTick::new(3));
        assert_eq!(packet.despawns, vec![GhostId::new(77)]);
        assert_eq!(packet.records, vec![a, b]);
        assert_eq!(
            packet.time_sync,
            Some(TimeSync {
                echo_ms: 500,
                hold_ms: 16
            })
        );
    }

    #[test]
    fn budget_is_never_exceeded() {
        let registry = registry();
        let budget = 120;
        let mut builder = SnapshotBuilder::new(&registry, NetworkTick::new(3), budget);
        let mut accepted = 0;
        for id in 0..100 {
            let (_, w) = encoded(&registry, id, id as f32);
            if builder.try_push(&w) {
                accepted += 1;
            }
        }
        assert!(accepted > 0 && accepted < 100);
        let bytes = builder.finish().unwrap();
        assert!(bytes.len() <= budget);
        assert_eq!(decode(&registry, &bytes).unwrap().records.len(), accepted);
    }

    #[test]
    fn schema_mismatch_is_fatal() {
        let registry = registry();
        let other = GhostRegistry::builder()
            .component(ComponentType::single(
                "Position",
                vec![FieldDef::new("xyz", FieldKind::float3(1000))],
            ))
            .ghost(GhostTypeDef::new("Ball").component("Position"))
            .build()
            .unwrap();
        let bytes = SnapshotBuilder::new(&other, NetworkTick::new(1), 1400)
            .finish()
            .unwrap();
        let err = decode(&registry, &bytes).unwrap_err();
        assert!(err.is_protocol_fatal());
    }

    #[test]
    fn rejects_non_snapshot_packets() {
        let registry = registry();
        let bytes = PacketWriter::new(PacketFlags::command(), registry.hash(), 1)
            .finish(1400)
            .unwrap();
        assert!(matches!(
            decode(&registry, &bytes),
            Err(CodecError::UnexpectedPacketKind { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_and_trailing_sections() {
        let registry = registry();
        let mut body = BitWriter::new();
        body.write_varu32(0).unwrap();
        let body = body.finish();

        let mut dup = PacketWriter::new(PacketFlags::snapshot(), registry.hash(), 1);
        dup.push_section(SectionTag::GhostDespawn, &body).unwrap();
        dup.push_section(SectionTag::GhostDespawn, &body).unwrap();
        assert!(matches!(
            decode(&registry, &dup.finish(1400).unwrap()),
            Err(CodecError::DuplicateSection { .. })
        ));

        let mut trailing = PacketWriter::new(PacketFlags::snapshot(), registry.hash(), 1);
        trailing
            .push_section(SectionTag::GhostSnapshot, &[0, 0xFF])
            .unwrap();
        assert!(matches!(
            decode(&registry, &trailing.finish(1400).unwrap()),
            Err(CodecError::TrailingSectionData { .. })
        ));
    }

    #[test]
    fn record_count_limit_is_enforced() {
        let registry = registry();
        let mut builder = SnapshotBuilder::new(&registry, NetworkTick::new(3), 1400);
        for id in 0..3 {
            let (_, w) = encoded(&registry, id, 0.5);
            assert!(builder.try_push(&w));
        }
        let bytes = builder.finish().unwrap();
        let limits = CodecLimits {
            max_ghosts_per_snapshot: 2,
            ..CodecLimits::default()
        };
        let err = decode_snapshot(&registry, &bytes, &Limits::default(), &limits, &NoBaselines)
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::LimitsExceeded {
                kind: LimitKind::GhostsPerSnapshot,
                ..
            }
        ));
    }
}

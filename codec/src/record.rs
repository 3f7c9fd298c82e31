//! Per-ghost snapshot records.
//!
//! A record is bit packed:
//!
//! ```text
//! ghost_id (packed) | ghost_type (packed)
//! spawn? [ spawn_tick u32 | owner? [ owner (packed) ] ]
//! baseline? [ distance (packed, > 0) ]
//! enable bits | change mask (fixed width)
//! changed field payloads, in mask-bit order
//! children? [ count (packed) | child records ]
//! ```
//!
//! Field payloads are relative to the baseline named by the record, or to
//! the zero state of the ghost type when no baseline is named.

use bitstream::{BitReader, BitWriter, ChangeMask};
use schema::{FieldDef, FieldKind, GhostLayout, GhostRegistry, GhostTypeId};

use crate::error::{CodecError, CodecResult, LimitKind, ValueReason};
use crate::limits::CodecLimits;
use crate::state::QuantizedState;
use crate::types::{ConnectionId, GhostId, GhostRef, NetworkTick};
use crate::value::{check_width, lane_count, Quantized};

/// Spawn information carried until the receiver acknowledges the ghost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnInfo {
    pub spawn_tick: NetworkTick,
    pub owner: Option<ConnectionId>,
}

/// Lookup of previously exchanged states by ghost and tick.
pub trait BaselineSource {
    fn baseline(&self, ghost: GhostId, tick: NetworkTick) -> Option<&QuantizedState>;
}

/// A source with no baselines; every record must be absolute.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBaselines;

impl BaselineSource for NoBaselines {
    fn baseline(&self, _ghost: GhostId, _tick: NetworkTick) -> Option<&QuantizedState> {
        None
    }
}

/// One ghost's entry in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostRecord {
    pub ghost_id: GhostId,
    pub ghost_type: GhostTypeId,
    pub spawn: Option<SpawnInfo>,
    /// Tick of the state the payload is relative to.
    pub baseline: Option<NetworkTick>,
    /// Fields carried by this record.
    pub mask: ChangeMask,
    /// Complete state after applying the record to its baseline.
    pub state: QuantizedState,
    /// Group children, serialized inside the parent.
    pub children: Vec<GhostRecord>,
}

/// Copies the masked fields of `current` over `baseline`; enable bits always
/// come from `current`.
#[must_use]
pub fn merge_masked(
    baseline: &QuantizedState,
    current: &QuantizedState,
    mask: &ChangeMask,
) -> QuantizedState {
    let mut out = baseline.clone();
    for bit in mask.iter_ones() {
        if let (Some(slot), Some(value)) = (out.fields.get_mut(bit), current.fields.get(bit)) {
            slot.clone_from(value);
        }
    }
    out.enabled.clone_from(&current.enabled);
    out
}

/// Encodes one record. Payloads are taken from `record.state` at the bits
/// set in `record.mask`.
pub fn write_record(
    w: &mut BitWriter,
    registry: &GhostRegistry,
    tick: NetworkTick,
    record: &GhostRecord,
    baselines: &dyn BaselineSource,
) -> CodecResult<()> {
    write_record_at_depth(w, registry, tick, record, baselines, 0)
}

fn write_record_at_depth(
    w: &mut BitWriter,
    registry: &GhostRegistry,
    tick: NetworkTick,
    record: &GhostRecord,
    baselines: &dyn BaselineSource,
    depth: u8,
) -> CodecResult<()> {
    let layout = registry
        .ghost(record.ghost_type)
        .ok_or(CodecError::UnknownGhostType {
            raw: record.ghost_type.raw(),
        })?;
    let zero;
    let base = match record.baseline {
        Some(base_tick) => baselines
            .baseline(record.ghost_id, base_tick)
            .ok_or(CodecError::MissingBaseline {
                ghost: record.ghost_id,
                tick: base_tick,
            })?,
        None => {
            zero = QuantizedState::default_for(layout);
            &zero
        }
    };

    w.write_packed_u32(record.ghost_id.raw());
    w.write_packed_u32(record.ghost_type.raw());

    w.write_bit(record.spawn.is_some());
    if let Some(spawn) = record.spawn {
        w.write_bit(spawn.spawn_tick.is_valid());
        w.write_bits(u64::from(spawn.spawn_tick.value()), 32)?;
        w.write_bit(spawn.owner.is_some());
        if let Some(owner) = spawn.owner {
            w.write_packed_u32(owner.0);
        }
    }

    w.write_bit(record.baseline.is_some());
    if let Some(base_tick) = record.baseline {
        let distance = u32::try_from(tick.ticks_since(base_tick))
            .ok()
            .filter(|&d| d > 0)
            .ok_or(CodecError::InvalidBaselineDistance {
                ghost: record.ghost_id,
            })?;
        w.write_packed_u32(distance);
    }

    if record.mask.bit_len() != layout.change_mask_bits
        || record.state.fields.len() != layout.change_mask_bits
        || record.state.enabled.len() != layout.enable_bits
    {
        return Err(CodecError::StateShapeMismatch {
            ghost_type: layout.name.clone(),
        });
    }
    for &enabled in &record.state.enabled {
        w.write_bit(enabled);
    }
    record.mask.write_range(w, 0, layout.change_mask_bits)?;

    for bit in record.mask.iter_ones() {
        let def = mask_field(layout, bit)?;
        write_field(w, def, &record.state.fields[bit], &base.fields[bit])?;
    }

    w.write_bit(!record.children.is_empty());
    if !record.children.is_empty() {
        if depth > 0 {
            return Err(CodecError::NestedGroup {
                ghost: record.ghost_id,
            });
        }
        let count = u32::try_from(record.children.len()).map_err(|_| CodecError::LimitsExceeded {
            kind: LimitKind::ChildrenPerGhost,
            limit: u32::MAX as usize,
            actual: record.children.len(),
        })?;
        w.write_packed_u32(count);
        for child in &record.children {
            write_record_at_depth(w, registry, tick, child, baselines, depth + 1)?;
        }
    }
    Ok(())
}

/// Decodes one record, reconstructing its full state from the baseline.
pub fn read_record(
    r: &mut BitReader<'_>,
    registry: &GhostRegistry,
    tick: NetworkTick,
    baselines: &dyn BaselineSource,
    limits: &CodecLimits,
) -> CodecResult<GhostRecord> {
    read_record_at_depth(r, registry, tick, baselines, limits, 0)
}

fn read_record_at_depth(
    r: &mut BitReader<'_>,
    registry: &GhostRegistry,
    tick: NetworkTick,
    baselines: &dyn BaselineSource,
    limits: &CodecLimits,
    depth: u8,
) -> CodecResult<GhostRecord> {
    let ghost_id = GhostId::new(r.read_packed_u32()?);
    let raw_type = r.read_packed_u32()?;
    let ghost_type = GhostTypeId::new(raw_type);
    let layout = registry
        .ghost(ghost_type)
        .ok_or(CodecError::UnknownGhostType { raw: raw_type })?;

    let spawn = if r.read_bit()? {
        let valid = r.read_bit()?;
        let value = read_u32(r)?;
        let owner = if r.read_bit()? {
            Some(ConnectionId(r.read_packed_u32()?))
        } else {
            None
        };
        Some(SpawnInfo {
            spawn_tick: if valid {
                NetworkTick::new(value)
            } else {
                NetworkTick::INVALID
            },
            owner,
        })
    } else {
        None
    };

    let baseline = if r.read_bit()? {
        let distance = r.read_packed_u32()?;
        if distance == 0 {
            return Err(CodecError::InvalidBaselineDistance { ghost: ghost_id });
        }
        Some(tick.subtract(distance))
    } else {
        None
    };

    let mut state = match baseline {
        Some(base_tick) => baselines
            .baseline(ghost_id, base_tick)
            .cloned()
            .ok_or(CodecError::MissingBaseline {
                ghost: ghost_id,
                tick: base_tick,
            })?,
        None => QuantizedState::default_for(layout),
    };
    if state.fields.len() != layout.change_mask_bits || state.enabled.len() != layout.enable_bits
    {
        return Err(CodecError::StateShapeMismatch {
            ghost_type: layout.name.clone(),
        });
    }

    for enabled in &mut state.enabled {
        *enabled = r.read_bit()?;
    }
    let mut mask = ChangeMask::new(layout.change_mask_bits);
    mask.read_range(r, 0, layout.change_mask_bits)?;

    for bit in mask.iter_ones() {
        let value = read_field(r, mask_field(layout, bit)?, &state.fields[bit])?;
        state.fields[bit] = value;
    }

    let mut children = Vec::new();
    if r.read_bit()? {
        if depth > 0 {
            return Err(CodecError::NestedGroup { ghost: ghost_id });
        }
        let count = r.read_packed_u32()? as usize;
        if count > limits.max_children_per_ghost {
            return Err(CodecError::LimitsExceeded {
                kind: LimitKind::ChildrenPerGhost,
                limit: limits.max_children_per_ghost,
                actual: count,
            });
        }
        children.reserve(count);
        for _ in 0..count {
            children.push(read_record_at_depth(
                r,
                registry,
                tick,
                baselines,
                limits,
                depth + 1,
            )?);
        }
    }

    Ok(GhostRecord {
        ghost_id,
        ghost_type,
        spawn,
        baseline,
        mask,
        state,
        children,
    })
}

fn mask_field(layout: &GhostLayout, bit: usize) -> CodecResult<&FieldDef> {
    layout
        .mask_field(bit)
        .ok_or_else(|| CodecError::StateShapeMismatch {
            ghost_type: layout.name.clone(),
        })
}

fn write_field(
    w: &mut BitWriter,
    def: &FieldDef,
    value: &Quantized,
    base: &Quantized,
) -> CodecResult<()> {
    match (def.kind, value, base) {
        (FieldKind::Bool, Quantized::Bool(v), _) => w.write_bit(*v),
        (FieldKind::Double { quantization: 0 }, Quantized::Int(v), _) => {
            w.write_bits(*v as u64, 64)?;
        }
        (_, Quantized::Int(v), Quantized::Int(b)) => w.write_packed_i64(v.wrapping_sub(*b)),
        (kind, Quantized::Lanes(v), Quantized::Lanes(b)) => {
            let raw = matches!(
                kind,
                FieldKind::Float { quantization: 0, .. } | FieldKind::Quaternion { quantization: 0 }
            );
            for lane in 0..lane_count(kind) {
                if raw {
                    w.write_bits(v[lane] as u64 & u64::from(u32::MAX), 32)?;
                } else {
                    w.write_packed_i64(v[lane].wrapping_sub(b[lane]));
                }
            }
        }
        (_, Quantized::Bytes(bytes), _) => {
            w.write_packed_u32(u32::try_from(bytes.len()).unwrap_or(u32::MAX));
            for &byte in bytes {
                w.write_bits(u64::from(byte), 8)?;
            }
        }
        (_, Quantized::Entity(target), _) => {
            w.write_bit(target.is_some());
            if let Some(target) = target {
                w.write_packed_u32(target.ghost_id.raw());
                w.write_bit(target.spawn_tick.is_valid());
                w.write_bits(u64::from(target.spawn_tick.value()), 32)?;
            }
        }
        (_, Quantized::Tick(t), _) => {
            w.write_bit(t.is_valid());
            w.write_bits(u64::from(t.value()), 32)?;
        }
        _ => {
            return Err(CodecError::InvalidValue {
                field: def.name.clone(),
                reason: ValueReason::KindMismatch {
                    expected: def.kind.to_string(),
                },
            })
        }
    }
    Ok(())
}

fn read_field(r: &mut BitReader<'_>, def: &FieldDef, base: &Quantized) -> CodecResult<Quantized> {
    let value = match (def.kind, base) {
        (FieldKind::Bool, _) => Quantized::Bool(r.read_bit()?),
        (FieldKind::Double { quantization: 0 }, _) => Quantized::Int(r.read_bits(64)? as i64),
        (FieldKind::Int { .. } | FieldKind::Enum { .. } | FieldKind::Double { .. }, Quantized::Int(b)) => {
            let v = b.wrapping_add(r.read_packed_i64()?);
            check_width(def, v)?;
            Quantized::Int(v)
        }
        (kind @ (FieldKind::Float { .. } | FieldKind::Quaternion { .. }), Quantized::Lanes(b)) => {
            let raw = matches!(
                kind,
                FieldKind::Float { quantization: 0, .. } | FieldKind::Quaternion { quantization: 0 }
            );
            let mut lanes = [0i64; 4];
            for lane in 0..lane_count(kind) {
                lanes[lane] = if raw {
                    i64::from(read_u32(r)?)
                } else {
                    b[lane].wrapping_add(r.read_packed_i64()?)
                };
            }
            Quantized::Lanes(lanes)
        }
        (FieldKind::FixedString { capacity }, _) => {
            let len = r.read_packed_u32()? as usize;
            if len > capacity.max_len() {
                return Err(CodecError::InvalidValue {
                    field: def.name.clone(),
                    reason: ValueReason::StringTooLong {
                        len,
                        max: capacity.max_len(),
                    },
                });
            }
            let mut bytes = Vec::with_capacity(len);
            for _ in 0..len {
                bytes.push(r.read_bits(8)? as u8);
            }
            if std::str::from_utf8(&bytes).is_err() {
                return Err(CodecError::InvalidValue {
                    field: def.name.clone(),
                    reason: ValueReason::InvalidUtf8,
                });
            }
            Quantized::Bytes(bytes)
        }
        (FieldKind::Entity, _) => {
            if r.read_bit()? {
                let ghost_id = GhostId::new(r.read_packed_u32()?);
                let valid = r.read_bit()?;
                let value = read_u32(r)?;
                Quantized::Entity(Some(GhostRef::new(
                    ghost_id,
                    if valid {
                        NetworkTick::new(value)
                    } else {
                        NetworkTick::INVALID
                    },
                )))
            } else {
                Quantized::Entity(None)
            }
        }
        (FieldKind::Tick, _) => {
            let valid = r.read_bit()?;
            let value = read_u32(r)?;
            Quantized::Tick(if valid {
                NetworkTick::new(value)
            } else {
                NetworkTick::INVALID
            })
        }
        _ => {
            return Err(CodecError::InvalidValue {
                field: def.name.clone(),
                reason: ValueReason::KindMismatch {
                    expected: def.kind.to_string(),
                },
            })
        }
    };
    Ok(value)
}

#[allow(clippy::cast_possible_truncation)]
fn read_u32(r: &mut BitReader<'_>) -> CodecResult<u32> {
    Ok(r.read_bits(32)? as u32)
}

//! Deterministic registry hashing.

use blake3::Hasher;

use crate::field::{FieldKind, IntWidth, StringCapacity};
use crate::ghost::{GhostMode, OptimizationMode};
use crate::registry::{GhostLayout, GhostRegistry};
use crate::SendRule;

/// Returns the compatibility hash of a built registry.
#[must_use]
pub fn schema_hash(registry: &GhostRegistry) -> u64 {
    registry.hash()
}

/// Hashes every wire-relevant property of the resolved ghost layouts in
/// registration order.
pub(crate) fn registry_hash(ghosts: &[GhostLayout]) -> u64 {
    let mut hasher = Hasher::new();
    write_len(&mut hasher, ghosts.len());

    for ghost in ghosts {
        write_str(&mut hasher, &ghost.name);
        write_u8(
            &mut hasher,
            match ghost.mode {
                GhostMode::Interpolated => 0,
                GhostMode::Predicted => 1,
                GhostMode::OwnerPredicted => 2,
            },
        );
        write_u8(
            &mut hasher,
            match ghost.optimization {
                OptimizationMode::Dynamic => 0,
                OptimizationMode::Static => 1,
            },
        );
        write_u32(&mut hasher, ghost.max_send_rate.unwrap_or(0));
        write_len(&mut hasher, ghost.components.len());

        for component in &ghost.components {
            write_len(&mut hasher, component.node);
            write_str(&mut hasher, &component.component_name);
            write_str(&mut hasher, &component.variant);
            write_u8(
                &mut hasher,
                match component.send_rule {
                    SendRule::All => 0,
                    SendRule::OwnerOnly => 1,
                    SendRule::NonOwnerOnly => 2,
                },
            );
            write_u8(&mut hasher, component.prefab_types.bits());
            write_u8(&mut hasher, u8::from(component.replicated));
            write_u8(&mut hasher, u8::from(component.enable_bit.is_some()));
            write_len(&mut hasher, component.fields.len());
            for field in &component.fields {
                write_str(&mut hasher, &field.name);
                write_kind(&mut hasher, field.kind);
            }
        }
    }

    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(bytes)
}

fn write_kind(hasher: &mut Hasher, kind: FieldKind) {
    match kind {
        FieldKind::Bool => write_u8(hasher, 0),
        FieldKind::Int { width, signed } => {
            write_u8(hasher, 1);
            write_width(hasher, width, signed);
        }
        FieldKind::Enum { width, signed } => {
            write_u8(hasher, 2);
            write_width(hasher, width, signed);
        }
        FieldKind::Float {
            lanes,
            quantization,
        } => {
            write_u8(hasher, 3);
            write_u8(hasher, lanes);
            write_u32(hasher, quantization);
        }
        FieldKind::Double { quantization } => {
            write_u8(hasher, 4);
            write_u32(hasher, quantization);
        }
        FieldKind::Quaternion { quantization } => {
            write_u8(hasher, 5);
            write_u32(hasher, quantization);
        }
        FieldKind::FixedString { capacity } => {
            write_u8(hasher, 6);
            write_u8(
                hasher,
                match capacity {
                    StringCapacity::Bytes32 => 0,
                    StringCapacity::Bytes64 => 1,
                    StringCapacity::Bytes128 => 2,
                    StringCapacity::Bytes512 => 3,
                    StringCapacity::Bytes4096 => 4,
                },
            );
        }
        FieldKind::Entity => write_u8(hasher, 7),
        FieldKind::Tick => write_u8(hasher, 8),
    }
}

fn write_width(hasher: &mut Hasher, width: IntWidth, signed: bool) {
    write_u8(hasher, width.bits());
    write_u8(hasher, u8::from(signed));
}

fn write_u8(hasher: &mut Hasher, value: u8) {
    hasher.update(&[value]);
}

fn write_u32(hasher: &mut Hasher, value: u32) {
    hasher.update(&value.to_le_bytes());
}

fn write_len(hasher: &mut Hasher, value: usize) {
    hasher.update(&(value as u64).to_le_bytes());
}

fn write_str(hasher: &mut Hasher, value: &str) {
    write_len(hasher, value.len());
    hasher.update(value.as_bytes());
}

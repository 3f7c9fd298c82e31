//! Field values and their quantized wire representation.
//!
//! [`FieldValue`] is what applications read and write. [`Quantized`] is what
//! the codec compares, stores in history and delta-encodes. Change detection
//! always happens on the quantized form, so a float that moves less than one
//! quantization step is not a change.

use schema::{FieldDef, FieldKind, IntWidth};

use crate::error::{CodecError, CodecResult, ValueReason};
use crate::types::{GhostRef, NetworkTick};

/// A replicated field value as seen by the application.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldValue {
    Bool(bool),
    /// Signed integers and signed enums.
    Int(i64),
    /// Unsigned integers and unsigned enums.
    UInt(u64),
    Float(f32),
    Float2([f32; 2]),
    Float3([f32; 3]),
    Float4([f32; 4]),
    Double(f64),
    /// `[x, y, z, w]`.
    Quaternion([f32; 4]),
    String(String),
    Entity(Option<GhostRef>),
    Tick(NetworkTick),
}

impl FieldValue {
    /// The zero value of a field kind; the implicit baseline of a spawn.
    #[must_use]
    pub fn default_for(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Bool => Self::Bool(false),
            FieldKind::Int { signed: true, .. } | FieldKind::Enum { signed: true, .. } => {
                Self::Int(0)
            }
            FieldKind::Int { .. } | FieldKind::Enum { .. } => Self::UInt(0),
            FieldKind::Float { lanes, .. } => Self::from_lanes(lanes, [0.0; 4]),
            FieldKind::Double { .. } => Self::Double(0.0),
            FieldKind::Quaternion { .. } => Self::Quaternion([0.0, 0.0, 0.0, 1.0]),
            FieldKind::FixedString { .. } => Self::String(String::new()),
            FieldKind::Entity => Self::Entity(None),
            FieldKind::Tick => Self::Tick(NetworkTick::INVALID),
        }
    }

    /// Float lanes of a float or quaternion value, padded with zeros.
    #[must_use]
    pub fn lanes(&self) -> Option<(u8, [f32; 4])> {
        match *self {
            Self::Float(x) => Some((1, [x, 0.0, 0.0, 0.0])),
            Self::Float2([x, y]) => Some((2, [x, y, 0.0, 0.0])),
            Self::Float3([x, y, z]) => Some((3, [x, y, z, 0.0])),
            Self::Float4(v) | Self::Quaternion(v) => Some((4, v)),
            _ => None,
        }
    }

    /// Builds a float value with `lanes` components.
    #[must_use]
    pub const fn from_lanes(lanes: u8, v: [f32; 4]) -> Self {
        match lanes {
            1 => Self::Float(v[0]),
            2 => Self::Float2([v[0], v[1]]),
            3 => Self::Float3([v[0], v[1], v[2]]),
            _ => Self::Float4(v),
        }
    }
}

/// Quantized field representation.
///
/// Integers, enums and quantized doubles are stored as `Int`; unsigned
/// values are bit-cast. Float lanes hold either grid indices or, at
/// quantization zero, the raw IEEE bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Quantized {
    Bool(bool),
    Int(i64),
    Lanes([i64; 4]),
    Bytes(Vec<u8>),
    Entity(Option<GhostRef>),
    Tick(NetworkTick),
}

impl Quantized {
    /// Quantized zero value of a field kind.
    #[must_use]
    pub fn default_for(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Bool => Self::Bool(false),
            // Zero is also the IEEE bit pattern of 0.0.
            FieldKind::Int { .. } | FieldKind::Enum { .. } | FieldKind::Double { .. } => {
                Self::Int(0)
            }
            FieldKind::Float { .. } => Self::Lanes([0; 4]),
            FieldKind::Quaternion { quantization: 0 } => {
                Self::Lanes([0, 0, 0, i64::from(1.0f32.to_bits())])
            }
            FieldKind::Quaternion { quantization } => {
                Self::Lanes([0, 0, 0, i64::from(quantization)])
            }
            FieldKind::FixedString { .. } => Self::Bytes(Vec::new()),
            FieldKind::Entity => Self::Entity(None),
            FieldKind::Tick => Self::Tick(NetworkTick::INVALID),
        }
    }
}

/// Number of float lanes a kind carries on the wire.
#[must_use]
pub const fn lane_count(kind: FieldKind) -> usize {
    match kind {
        FieldKind::Float { lanes, .. } => lanes as usize,
        FieldKind::Quaternion { .. } => 4,
        _ => 0,
    }
}

/// Quantizes `value` for `field`.
pub fn quantize(field: &FieldDef, value: &FieldValue) -> CodecResult<Quantized> {
    let mismatch = || invalid(field, ValueReason::KindMismatch {
        expected: field.kind.to_string(),
    });
    match (field.kind, value) {
        (FieldKind::Bool, FieldValue::Bool(b)) => Ok(Quantized::Bool(*b)),
        (
            FieldKind::Int { width, signed: true } | FieldKind::Enum { width, signed: true },
            FieldValue::Int(v),
        ) => {
            check_signed(field, width, *v)?;
            Ok(Quantized::Int(*v))
        }
        (
            FieldKind::Int {
                width,
                signed: false,
            }
            | FieldKind::Enum {
                width,
                signed: false,
            },
            FieldValue::UInt(v),
        ) => {
            check_unsigned(field, width, *v)?;
            Ok(Quantized::Int(*v as i64))
        }
        (FieldKind::Float { lanes, quantization }, v) => match v.lanes() {
            Some((n, values)) if n == lanes && !matches!(v, FieldValue::Quaternion(_)) => {
                quantize_lanes(field, lanes as usize, quantization, values).map(Quantized::Lanes)
            }
            _ => Err(mismatch()),
        },
        (FieldKind::Double { quantization }, FieldValue::Double(v)) => {
            if quantization == 0 {
                Ok(Quantized::Int(v.to_bits() as i64))
            } else {
                if !v.is_finite() {
                    return Err(invalid(field, ValueReason::NotFinite));
                }
                Ok(Quantized::Int(saturate(*v * f64::from(quantization))))
            }
        }
        (FieldKind::Quaternion { quantization }, FieldValue::Quaternion(q)) => {
            quantize_lanes(field, 4, quantization, normalize(*q)).map(Quantized::Lanes)
        }
        (FieldKind::FixedString { capacity }, FieldValue::String(s)) => {
            if s.len() > capacity.max_len() {
                return Err(invalid(
                    field,
                    ValueReason::StringTooLong {
                        len: s.len(),
                        max: capacity.max_len(),
                    },
                ));
            }
            Ok(Quantized::Bytes(s.as_bytes().to_vec()))
        }
        (FieldKind::Entity, FieldValue::Entity(r)) => Ok(Quantized::Entity(*r)),
        (FieldKind::Tick, FieldValue::Tick(t)) => Ok(Quantized::Tick(*t)),
        _ => Err(mismatch()),
    }
}

/// Maps a quantized value back to an application value.
pub fn dequantize(field: &FieldDef, value: &Quantized) -> CodecResult<FieldValue> {
    let mismatch = || invalid(field, ValueReason::KindMismatch {
        expected: field.kind.to_string(),
    });
    match (field.kind, value) {
        (FieldKind::Bool, Quantized::Bool(b)) => Ok(FieldValue::Bool(*b)),
        (FieldKind::Int { signed: true, .. } | FieldKind::Enum { signed: true, .. }, Quantized::Int(v)) => {
            Ok(FieldValue::Int(*v))
        }
        (FieldKind::Int { .. } | FieldKind::Enum { .. }, Quantized::Int(v)) => {
            Ok(FieldValue::UInt(*v as u64))
        }
        (FieldKind::Float { lanes, quantization }, Quantized::Lanes(l)) => Ok(
            FieldValue::from_lanes(lanes, dequantize_lanes(quantization, l)),
        ),
        (FieldKind::Double { quantization: 0 }, Quantized::Int(v)) => {
            Ok(FieldValue::Double(f64::from_bits(*v as u64)))
        }
        (FieldKind::Double { quantization }, Quantized::Int(v)) => {
            Ok(FieldValue::Double(*v as f64 / f64::from(quantization)))
        }
        (FieldKind::Quaternion { quantization }, Quantized::Lanes(l)) => {
            let q = dequantize_lanes(quantization, l);
            Ok(FieldValue::Quaternion(if quantization == 0 {
                q
            } else {
                normalize(q)
            }))
        }
        (FieldKind::FixedString { .. }, Quantized::Bytes(bytes)) => String::from_utf8(bytes.clone())
            .map(FieldValue::String)
            .map_err(|_| invalid(field, ValueReason::InvalidUtf8)),
        (FieldKind::Entity, Quantized::Entity(r)) => Ok(FieldValue::Entity(*r)),
        (FieldKind::Tick, Quantized::Tick(t)) => Ok(FieldValue::Tick(*t)),
        _ => Err(mismatch()),
    }
}

/// Checks a decoded integer against the field's declared width.
pub(crate) fn check_width(field: &FieldDef, value: i64) -> CodecResult<()> {
    match field.kind {
        FieldKind::Int { width, signed: true } | FieldKind::Enum { width, signed: true } => {
            check_signed(field, width, value)
        }
        FieldKind::Int {
            width,
            signed: false,
        }
        | FieldKind::Enum {
            width,
            signed: false,
        } => check_unsigned(field, width, value as u64),
        _ => Ok(()),
    }
}

/// Normalizes a quaternion; a zero quaternion becomes identity.
#[must_use]
pub fn normalize(q: [f32; 4]) -> [f32; 4] {
    let len = q.iter().map(|c| c * c).sum::<f32>().sqrt();
    if len <= f32::EPSILON || !len.is_finite() {
        return [0.0, 0.0, 0.0, 1.0];
    }
    [q[0] / len, q[1] / len, q[2] / len, q[3] / len]
}

fn quantize_lanes(
    field: &FieldDef,
    lanes: usize,
    quantization: u32,
    values: [f32; 4],
) -> CodecResult<[i64; 4]> {
    let mut out = [0i64; 4];
    for (slot, v) in out.iter_mut().zip(values).take(lanes) {
        *slot = if quantization == 0 {
            i64::from(v.to_bits())
        } else {
            if !v.is_finite() {
                return Err(invalid(field, ValueReason::NotFinite));
            }
            saturate(f64::from(v) * f64::from(quantization))
        };
    }
    Ok(out)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn dequantize_lanes(quantization: u32, lanes: &[i64; 4]) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for (slot, &v) in out.iter_mut().zip(lanes) {
        *slot = if quantization == 0 {
            f32::from_bits(v as u32)
        } else {
            (v as f64 / f64::from(quantization)) as f32
        };
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn saturate(v: f64) -> i64 {
    // `as` saturates at the i64 bounds.
    v.round() as i64
}

fn check_signed(field: &FieldDef, width: IntWidth, v: i64) -> CodecResult<()> {
    let bits = width.bits();
    if bits < 64 {
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if v < min || v > max {
            return Err(invalid(field, ValueReason::OutOfRange { bits }));
        }
    }
    Ok(())
}

fn check_unsigned(field: &FieldDef, width: IntWidth, v: u64) -> CodecResult<()> {
    let bits = width.bits();
    if bits < 64 && v >> bits != 0 {
        return Err(invalid(field, ValueReason::OutOfRange { bits }));
    }
    Ok(())
}

fn invalid(field: &FieldDef, reason: ValueReason) -> CodecError {
    CodecError::InvalidValue {
        field: field.name.clone(),
        reason,
    }
}

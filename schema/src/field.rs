//! Field kinds and per-field smoothing policy.

use std::fmt;

/// Backing width of an integer or enum field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    /// Width in bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 => 64,
        }
    }
}

/// Capacity class of a fixed-size string field.
///
/// The usable length is the class size minus three bytes (length prefix and
/// terminator), so a 32-byte string holds at most 29 bytes of UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StringCapacity {
    Bytes32,
    Bytes64,
    Bytes128,
    Bytes512,
    Bytes4096,
}

impl StringCapacity {
    /// Total storage size of the class.
    #[must_use]
    pub const fn class_bytes(self) -> usize {
        match self {
            Self::Bytes32 => 32,
            Self::Bytes64 => 64,
            Self::Bytes128 => 128,
            Self::Bytes512 => 512,
            Self::Bytes4096 => 4096,
        }
    }

    /// Maximum number of UTF-8 bytes a value may hold.
    #[must_use]
    pub const fn max_len(self) -> usize {
        self.class_bytes() - 3
    }
}

/// The wire representation of a replicated field.
///
/// Quantization factors of zero mean full precision, bit-exact. Any other
/// factor snaps values to a `1 / quantization` grid before delta encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldKind {
    Bool,
    Int { width: IntWidth, signed: bool },
    /// An enum serialized as its backing integer.
    Enum { width: IntWidth, signed: bool },
    /// `float` through `float4`.
    Float { lanes: u8, quantization: u32 },
    Double { quantization: u32 },
    /// Normalized before quantization.
    Quaternion { quantization: u32 },
    FixedString { capacity: StringCapacity },
    /// A reference to another ghost, sent as `(ghost id, spawn tick)`.
    Entity,
    /// A network tick, sent with its validity bit.
    Tick,
}

impl FieldKind {
    #[must_use]
    pub const fn int32() -> Self {
        Self::Int {
            width: IntWidth::W32,
            signed: true,
        }
    }

    #[must_use]
    pub const fn int64() -> Self {
        Self::Int {
            width: IntWidth::W64,
            signed: true,
        }
    }

    #[must_use]
    pub const fn uint32() -> Self {
        Self::Int {
            width: IntWidth::W32,
            signed: false,
        }
    }

    #[must_use]
    pub const fn uint64() -> Self {
        Self::Int {
            width: IntWidth::W64,
            signed: false,
        }
    }

    #[must_use]
    pub const fn enumeration(width: IntWidth, signed: bool) -> Self {
        Self::Enum { width, signed }
    }

    #[must_use]
    pub const fn float(quantization: u32) -> Self {
        Self::Float {
            lanes: 1,
            quantization,
        }
    }

    #[must_use]
    pub const fn float2(quantization: u32) -> Self {
        Self::Float {
            lanes: 2,
            quantization,
        }
    }

    #[must_use]
    pub const fn float3(quantization: u32) -> Self {
        Self::Float {
            lanes: 3,
            quantization,
        }
    }

    #[must_use]
    pub const fn float4(quantization: u32) -> Self {
        Self::Float {
            lanes: 4,
            quantization,
        }
    }

    #[must_use]
    pub const fn double(quantization: u32) -> Self {
        Self::Double { quantization }
    }

    #[must_use]
    pub const fn quaternion(quantization: u32) -> Self {
        Self::Quaternion { quantization }
    }

    #[must_use]
    pub const fn fixed_string(capacity: StringCapacity) -> Self {
        Self::FixedString { capacity }
    }

    /// Returns `true` for kinds that interpolate between snapshots.
    #[must_use]
    pub const fn is_continuous(self) -> bool {
        matches!(
            self,
            Self::Float { .. } | Self::Double { .. } | Self::Quaternion { .. }
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Bool => write!(f, "bool"),
            Self::Int { width, signed } => {
                write!(f, "{}int{}", if signed { "" } else { "u" }, width.bits())
            }
            Self::Enum { width, signed } => {
                write!(f, "enum<{}{}>", if signed { "i" } else { "u" }, width.bits())
            }
            Self::Float {
                lanes: 1,
                quantization,
            } => write!(f, "float[q={quantization}]"),
            Self::Float {
                lanes,
                quantization,
            } => write!(f, "float{lanes}[q={quantization}]"),
            Self::Double { quantization } => write!(f, "double[q={quantization}]"),
            Self::Quaternion { quantization } => write!(f, "quaternion[q={quantization}]"),
            Self::FixedString { capacity } => write!(f, "string{}", capacity.class_bytes()),
            Self::Entity => write!(f, "entity"),
            Self::Tick => write!(f, "tick"),
        }
    }
}

/// How interpolated clients smooth a field between snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Smoothing {
    /// Hold the older value until the next snapshot is reached.
    #[default]
    Clamp,
    Interpolate,
    /// Interpolate, then extrapolate past the newest snapshot.
    InterpolateAndExtrapolate,
}

/// Field definition within a component variant.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub smoothing: Smoothing,
    /// Above this distance between consecutive values the field snaps
    /// instead of smoothing.
    pub max_smoothing_distance: Option<f32>,
}

impl FieldDef {
    /// Creates a field with clamp smoothing.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            smoothing: Smoothing::Clamp,
            max_smoothing_distance: None,
        }
    }

    #[must_use]
    pub const fn smoothing(mut self, smoothing: Smoothing) -> Self {
        self.smoothing = smoothing;
        self
    }

    #[must_use]
    pub const fn max_smoothing_distance(mut self, distance: f32) -> Self {
        self.max_smoothing_distance = Some(distance);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_capacity_classes() {
        assert_eq!(StringCapacity::Bytes32.max_len(), 29);
        assert_eq!(StringCapacity::Bytes4096.max_len(), 4093);
    }

    #[test]
    fn kind_display_is_descriptive() {
        assert_eq!(FieldKind::int32().to_string(), "int32");
        assert_eq!(FieldKind::uint64().to_string(), "uint64");
        assert_eq!(
            FieldKind::enumeration(IntWidth::W8, false).to_string(),
            "enum<u8>"
        );
        assert_eq!(FieldKind::float3(100).to_string(), "float3[q=100]");
        assert_eq!(FieldKind::quaternion(1000).to_string(), "quaternion[q=1000]");
        assert_eq!(
            FieldKind::fixed_string(StringCapacity::Bytes64).to_string(),
            "string64"
        );
    }

    #[test]
    fn field_builder() {
        let field = FieldDef::new("position", FieldKind::float3(100))
            .smoothing(Smoothing::InterpolateAndExtrapolate)
            .max_smoothing_distance(10.0);
        assert_eq!(field.smoothing, Smoothing::InterpolateAndExtrapolate);
        assert_eq!(field.max_smoothing_distance, Some(10.0));
        assert!(field.kind.is_continuous());
        assert!(!FieldKind::Tick.is_continuous());
    }
}

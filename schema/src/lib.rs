//! Ghost types, component variants and field kinds for ghostline.
//!
//! This crate defines how replicated state is described:
//! - Field kinds (integers, enums, quantized floats, quaternions, strings,
//!   entity references, ticks) with per-field smoothing policy
//! - Component types with explicitly named serializer variants
//! - Ghost types with a prefab node hierarchy and per-node overrides
//! - An immutable [`GhostRegistry`] with fixed change-mask offsets
//! - Deterministic registry hashing and a versioned [`SchemaDescriptor`]
//!
//! # Design Principles
//!
//! - **Explicit registration** - Variant defaults are declared or are the sole entry.
//! - **Explicit schemas** - No reflection on arbitrary Rust types.
//! - **Deterministic hashing** - The registry hash is stable given the same definitions.

mod component;
mod descriptor;
mod error;
mod field;
mod ghost;
mod hash;
mod registry;

pub use component::{ComponentType, ComponentVariant, PrefabTypes, SendRule};
pub use descriptor::{DescriptorEntry, DescriptorMismatch, SchemaDescriptor, DESCRIPTOR_VERSION};
pub use error::{SchemaError, SchemaResult};
pub use field::{FieldDef, FieldKind, IntWidth, Smoothing, StringCapacity};
pub use ghost::{
    ComponentOverride, FieldPath, GhostMode, GhostTypeDef, NodeComponent, OptimizationMode,
    PrefabNode, Representation,
};
pub use hash::schema_hash;
pub use registry::{
    ComponentId, ComponentLayout, FieldSlot, GhostLayout, GhostRegistry, GhostRegistryBuilder,
    GhostTypeId, NodeLayout,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_api_exports() {
        let _ = FieldKind::Bool;
        let _ = PrefabTypes::ALL;
        let _ = GhostMode::default();
        let _ = DESCRIPTOR_VERSION;
        let registry = GhostRegistry::builder().build().unwrap();
        assert!(registry.is_empty());
        let _ = schema_hash(&registry);
    }
}

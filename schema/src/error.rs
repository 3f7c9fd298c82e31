//! Schema validation errors.

use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur when building a ghost registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("component type `{name}` registered twice")]
    DuplicateComponent { name: String },

    #[error("component type `{name}` has no variants")]
    NoVariants { name: String },

    #[error("component type `{component}` declares variant `{variant}` twice")]
    DuplicateVariant { component: String, variant: String },

    #[error("component type `{component}` has {count} variants and no declared default")]
    AmbiguousDefaultVariant { component: String, count: usize },

    #[error("component type `{component}` has no variant named `{variant}`")]
    UnknownVariant { component: String, variant: String },

    #[error("component type `{component}` declares field `{field}` twice")]
    DuplicateField { component: String, field: String },

    #[error("ghost type `{name}` registered twice")]
    DuplicateGhost { name: String },

    #[error("ghost type `{ghost}` references unknown component `{component}`")]
    UnknownComponent { ghost: String, component: String },

    #[error("ghost type `{ghost}` node {node} lists component `{component}` twice")]
    DuplicateNodeComponent {
        ghost: String,
        node: usize,
        component: String,
    },

    #[error("ghost type `{ghost}` node {node} has invalid parent")]
    InvalidNodeParent { ghost: String, node: usize },

    #[error("ghost type `{ghost}` has no root node")]
    MissingRoot { ghost: String },

    #[error("ghost type `{ghost}` transform path is not a float3 field")]
    InvalidTransform { ghost: String },

    #[error("ghost type `{ghost}` has invalid max send rate {rate}")]
    InvalidSendRate { ghost: String, rate: u32 },

    #[error("ghost type `{ghost}` importance must be non-zero")]
    InvalidImportance { ghost: String },

    #[error("float field `{field}` has invalid lane count {lanes}")]
    InvalidLanes { field: String, lanes: u8 },

    #[error("too many {what}: {count} exceeds {max}")]
    TooMany {
        what: &'static str,
        count: usize,
        max: usize,
    },
}

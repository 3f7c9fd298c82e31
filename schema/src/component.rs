//! Component types and their named serializer variants.

use bitflags::bitflags;

use crate::error::{SchemaError, SchemaResult};
use crate::field::FieldDef;

bitflags! {
    /// Which prefab flavours carry a component.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct PrefabTypes: u8 {
        const SERVER = 1 << 0;
        const INTERPOLATED_CLIENT = 1 << 1;
        const PREDICTED_CLIENT = 1 << 2;
        const ALL_CLIENTS = Self::INTERPOLATED_CLIENT.bits() | Self::PREDICTED_CLIENT.bits();
        const ALL = Self::SERVER.bits() | Self::ALL_CLIENTS.bits();
    }
}

impl Default for PrefabTypes {
    fn default() -> Self {
        Self::ALL
    }
}

/// Which connections receive a component's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SendRule {
    #[default]
    All,
    /// Only the owning connection.
    OwnerOnly,
    /// Every connection except the owner.
    NonOwnerOnly,
}

impl SendRule {
    /// Returns `true` if a connection with the given ownership receives data.
    #[must_use]
    pub const fn sends_to(self, is_owner: bool) -> bool {
        match self {
            Self::All => true,
            Self::OwnerOnly => is_owner,
            Self::NonOwnerOnly => !is_owner,
        }
    }
}

/// One serializer configuration for a component type.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComponentVariant {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub send_rule: SendRule,
    pub prefab_types: PrefabTypes,
    /// Replicate this component when it sits on a child prefab node.
    pub send_data_for_child_entity: bool,
    /// The component carries an enabled bit on the wire.
    pub enableable: bool,
}

impl ComponentVariant {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            send_rule: SendRule::All,
            prefab_types: PrefabTypes::ALL,
            send_data_for_child_entity: false,
            enableable: false,
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub const fn send_rule(mut self, rule: SendRule) -> Self {
        self.send_rule = rule;
        self
    }

    #[must_use]
    pub const fn prefab_types(mut self, types: PrefabTypes) -> Self {
        self.prefab_types = types;
        self
    }

    #[must_use]
    pub const fn send_data_for_child_entity(mut self, send: bool) -> Self {
        self.send_data_for_child_entity = send;
        self
    }

    #[must_use]
    pub const fn enableable(mut self, enableable: bool) -> Self {
        self.enableable = enableable;
        self
    }
}

/// A replicated component type with its ordered variant list.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComponentType {
    pub name: String,
    pub variants: Vec<ComponentVariant>,
    /// Explicit default; required when more than one variant exists.
    pub default_variant: Option<String>,
}

impl ComponentType {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variants: Vec::new(),
            default_variant: None,
        }
    }

    /// A component type with exactly one variant named `"Default"`.
    #[must_use]
    pub fn single(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        let mut variant = ComponentVariant::new("Default");
        variant.fields = fields;
        Self::new(name).variant(variant)
    }

    #[must_use]
    pub fn variant(mut self, variant: ComponentVariant) -> Self {
        self.variants.push(variant);
        self
    }

    #[must_use]
    pub fn default_variant(mut self, name: impl Into<String>) -> Self {
        self.default_variant = Some(name.into());
        self
    }

    /// Looks up a variant by name.
    pub fn variant_named(&self, name: &str) -> SchemaResult<&ComponentVariant> {
        self.variants
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| SchemaError::UnknownVariant {
                component: self.name.clone(),
                variant: name.to_owned(),
            })
    }

    /// Resolves the default variant: the declared one, or the sole entry.
    pub fn resolve_default(&self) -> SchemaResult<&ComponentVariant> {
        if let Some(name) = &self.default_variant {
            return self.variant_named(name);
        }
        match self.variants.as_slice() {
            [] => Err(SchemaError::NoVariants {
                name: self.name.clone(),
            }),
            [only] => Ok(only),
            many => Err(SchemaError::AmbiguousDefaultVariant {
                component: self.name.clone(),
                count: many.len(),
            }),
        }
    }

    pub(crate) fn validate(&self) -> SchemaResult<()> {
        if self.variants.is_empty() {
            return Err(SchemaError::NoVariants {
                name: self.name.clone(),
            });
        }
        for (i, variant) in self.variants.iter().enumerate() {
            if self.variants[..i].iter().any(|v| v.name == variant.name) {
                return Err(SchemaError::DuplicateVariant {
                    component: self.name.clone(),
                    variant: variant.name.clone(),
                });
            }
            for (j, field) in variant.fields.iter().enumerate() {
                if variant.fields[..j].iter().any(|f| f.name == field.name) {
                    return Err(SchemaError::DuplicateField {
                        component: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
                if let crate::FieldKind::Float { lanes, .. } = field.kind {
                    if !(1..=4).contains(&lanes) {
                        return Err(SchemaError::InvalidLanes {
                            field: field.name.clone(),
                            lanes,
                        });
                    }
                }
            }
        }
        self.resolve_default().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldKind;

    fn transform() -> ComponentType {
        ComponentType::new("Transform")
            .variant(
                ComponentVariant::new("Full")
                    .field(FieldDef::new("position", FieldKind::float3(100)))
                    .field(FieldDef::new("rotation", FieldKind::quaternion(1000))),
            )
            .variant(
                ComponentVariant::new("PositionOnly")
                    .field(FieldDef::new("position", FieldKind::float3(100))),
            )
    }

    #[test]
    fn sole_variant_is_default() {
        let health = ComponentType::single("Health", vec![FieldDef::new("value", FieldKind::int32())]);
        assert_eq!(health.resolve_default().unwrap().name, "Default");
    }

    #[test]
    fn multiple_variants_need_explicit_default() {
        let err = transform().resolve_default().unwrap_err();
        assert!(matches!(
            err,
            SchemaError::AmbiguousDefaultVariant { count: 2, .. }
        ));

        let declared = transform().default_variant("PositionOnly");
        assert_eq!(declared.resolve_default().unwrap().name, "PositionOnly");
    }

    #[test]
    fn unknown_default_is_rejected() {
        let err = transform().default_variant("Nope").validate().unwrap_err();
        assert!(matches!(err, SchemaError::UnknownVariant { .. }));
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let dup = ComponentType::single(
            "Dup",
            vec![
                FieldDef::new("a", FieldKind::Bool),
                FieldDef::new("a", FieldKind::Bool),
            ],
        );
        assert!(matches!(
            dup.validate(),
            Err(SchemaError::DuplicateField { .. })
        ));
    }

    #[test]
    fn send_rule_ownership() {
        assert!(SendRule::All.sends_to(true));
        assert!(SendRule::All.sends_to(false));
        assert!(SendRule::OwnerOnly.sends_to(true));
        assert!(!SendRule::OwnerOnly.sends_to(false));
        assert!(SendRule::NonOwnerOnly.sends_to(false));
        assert!(!SendRule::NonOwnerOnly.sends_to(true));
    }

    #[test]
    fn prefab_type_sets() {
        assert!(PrefabTypes::ALL.contains(PrefabTypes::SERVER));
        assert!(PrefabTypes::ALL_CLIENTS.contains(PrefabTypes::PREDICTED_CLIENT));
        assert!(!PrefabTypes::SERVER.intersects(PrefabTypes::ALL_CLIENTS));
    }
}

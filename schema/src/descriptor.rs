//! Versioned schema descriptors checked by structural equality.
//!
//! A descriptor flattens a registry into an ordered list of
//! `(name, kind)` entries. Two builds are compatible when their descriptors
//! are equal; the first differing entry is reported otherwise.

use std::fmt;

use crate::registry::GhostRegistry;

/// Current descriptor format version.
pub const DESCRIPTOR_VERSION: u32 = 1;

/// One named, typed entry of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorEntry {
    pub name: String,
    pub kind: String,
}

/// Ordered, versioned list of replicated fields.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchemaDescriptor {
    pub version: u32,
    pub entries: Vec<DescriptorEntry>,
}

/// Why two descriptors differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorMismatch {
    Version { expected: u32, found: u32 },
    Entry {
        index: usize,
        expected: Option<DescriptorEntry>,
        found: Option<DescriptorEntry>,
    },
}

impl fmt::Display for DescriptorMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version { expected, found } => {
                write!(f, "descriptor version {found}, expected {expected}")
            }
            Self::Entry {
                index,
                expected,
                found,
            } => {
                let show = |e: &Option<DescriptorEntry>| {
                    e.as_ref()
                        .map_or_else(|| "<none>".to_owned(), |e| format!("{}: {}", e.name, e.kind))
                };
                write!(
                    f,
                    "entry {index}: expected `{}`, found `{}`",
                    show(expected),
                    show(found)
                )
            }
        }
    }
}

impl std::error::Error for DescriptorMismatch {}

impl SchemaDescriptor {
    /// Flattens a registry. Entries name `ghost/node.component[variant].field`;
    /// components without wire data contribute a single marker entry.
    #[must_use]
    pub fn from_registry(registry: &GhostRegistry) -> Self {
        let mut entries = Vec::new();
        for ghost in registry.ghosts() {
            entries.push(DescriptorEntry {
                name: ghost.name.clone(),
                kind: format!("ghost[{:?},{:?}]", ghost.mode, ghost.optimization),
            });
            for component in &ghost.components {
                let node = &ghost.nodes[component.node].name;
                let prefix = format!(
                    "{}/{}.{}[{}]",
                    ghost.name, node, component.component_name, component.variant
                );
                if !component.replicated {
                    entries.push(DescriptorEntry {
                        name: prefix,
                        kind: "local".to_owned(),
                    });
                    continue;
                }
                for field in &component.fields {
                    entries.push(DescriptorEntry {
                        name: format!("{prefix}.{}", field.name),
                        kind: field.kind.to_string(),
                    });
                }
            }
        }
        Self {
            version: DESCRIPTOR_VERSION,
            entries,
        }
    }

    /// Compares against an expected descriptor.
    pub fn check(&self, expected: &Self) -> Result<(), DescriptorMismatch> {
        if self.version != expected.version {
            return Err(DescriptorMismatch::Version {
                expected: expected.version,
                found: self.version,
            });
        }
        let len = self.entries.len().max(expected.entries.len());
        for index in 0..len {
            let found = self.entries.get(index);
            let wanted = expected.entries.get(index);
            if found != wanted {
                return Err(DescriptorMismatch::Entry {
                    index,
                    expected: wanted.cloned(),
                    found: found.cloned(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ComponentType, FieldDef, FieldKind, GhostTypeDef, StringCapacity};

    fn registry(fields: Vec<FieldDef>) -> GhostRegistry {
        GhostRegistry::builder()
            .component(ComponentType::single("Stats", fields))
            .ghost(GhostTypeDef::new("Player").component("Stats"))
            .build()
            .unwrap()
    }

    #[test]
    fn descriptor_lists_fields_in_order() {
        let descriptor = SchemaDescriptor::from_registry(&registry(vec![
            FieldDef::new("hp", FieldKind::int32()),
            FieldDef::new("name", FieldKind::fixed_string(StringCapacity::Bytes32)),
        ]));
        let names: Vec<_> = descriptor.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Player",
                "Player/Player.Stats[Default].hp",
                "Player/Player.Stats[Default].name"
            ]
        );
        assert_eq!(descriptor.entries[2].kind, "string32");
    }

    #[test]
    fn reordered_fields_report_first_mismatch() {
        let a = SchemaDescriptor::from_registry(&registry(vec![
            FieldDef::new("hp", FieldKind::int32()),
            FieldDef::new("armor", FieldKind::int32()),
        ]));
        let b = SchemaDescriptor::from_registry(&registry(vec![
            FieldDef::new("armor", FieldKind::int32()),
            FieldDef::new("hp", FieldKind::int32()),
        ]));
        assert!(a.check(&a.clone()).is_ok());
        let err = a.check(&b).unwrap_err();
        assert!(matches!(err, DescriptorMismatch::Entry { index: 1, .. }));
        assert!(err.to_string().contains("armor"));
    }

    #[test]
    fn missing_entry_is_reported() {
        let a = SchemaDescriptor::from_registry(&registry(vec![FieldDef::new(
            "hp",
            FieldKind::int32(),
        )]));
        let mut b = a.clone();
        b.entries.pop();
        let err = a.check(&b).unwrap_err();
        assert!(matches!(
            err,
            DescriptorMismatch::Entry {
                expected: None,
                found: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn version_mismatch() {
        let a = SchemaDescriptor::from_registry(&registry(vec![]));
        let mut b = a.clone();
        b.version = 99;
        assert!(matches!(
            a.check(&b),
            Err(DescriptorMismatch::Version { expected: 99, .. })
        ));
    }
}

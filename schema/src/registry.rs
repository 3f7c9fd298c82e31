//! The immutable ghost registry built once per world.

use std::collections::HashMap;

use crate::component::{ComponentType, PrefabTypes, SendRule};
use crate::error::{SchemaError, SchemaResult};
use crate::field::{FieldDef, FieldKind};
use crate::ghost::{FieldPath, GhostMode, GhostTypeDef, OptimizationMode, Representation};
use crate::hash::registry_hash;

/// Index of a component type within the registry.
pub type ComponentId = u16;

/// Index of a ghost type within the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GhostTypeId(u32);

impl GhostTypeId {
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Addresses one field of one component slot within a ghost layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSlot {
    pub component: usize,
    pub field: usize,
}

/// A component as resolved for one node of one ghost type.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentLayout {
    pub node: usize,
    pub component: ComponentId,
    pub component_name: String,
    pub variant: String,
    pub fields: Vec<FieldDef>,
    pub send_rule: SendRule,
    pub prefab_types: PrefabTypes,
    pub send_data_for_child_entity: bool,
    pub enableable: bool,
    /// Carries field data on the wire.
    pub replicated: bool,
    /// First change-mask bit; one bit per field when `replicated`.
    pub mask_offset: usize,
    /// Index into the ghost's enable bits.
    pub enable_bit: Option<usize>,
}

impl ComponentLayout {
    /// Returns `true` if a client entity in `representation` has this component.
    #[must_use]
    pub const fn present_in(&self, representation: Representation) -> bool {
        self.prefab_types.contains(representation.prefab_type())
    }

    /// Change-mask bit of field `index`.
    #[must_use]
    pub const fn field_bit(&self, index: usize) -> usize {
        self.mask_offset + index
    }
}

/// A prefab node as kept at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLayout {
    pub name: String,
    pub parent: Option<usize>,
}

/// A fully resolved ghost type.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostLayout {
    pub id: GhostTypeId,
    pub name: String,
    pub mode: GhostMode,
    pub optimization: OptimizationMode,
    pub max_send_rate: Option<u32>,
    pub importance: u32,
    pub nodes: Vec<NodeLayout>,
    /// Component slots in registration order (node order, then declaration).
    pub components: Vec<ComponentLayout>,
    /// Fixed width of the change mask.
    pub change_mask_bits: usize,
    /// Component slot and field behind each change-mask bit.
    pub mask_fields: Vec<FieldSlot>,
    pub enable_bits: usize,
    pub transform: Option<FieldSlot>,
}

impl GhostLayout {
    /// Component slots that carry data on the wire.
    pub fn replicated_components(&self) -> impl Iterator<Item = (usize, &ComponentLayout)> {
        self.components
            .iter()
            .enumerate()
            .filter(|(_, c)| c.replicated)
    }

    /// Definition of the field behind change-mask bit `bit`.
    #[must_use]
    pub fn mask_field(&self, bit: usize) -> Option<&FieldDef> {
        let slot = self.mask_fields.get(bit)?;
        self.components.get(slot.component)?.fields.get(slot.field)
    }

    /// Finds the slot of `component` on `node`.
    #[must_use]
    pub fn component_slot(&self, node: usize, component: &str) -> Option<usize> {
        self.components
            .iter()
            .position(|c| c.node == node && c.component_name == component)
    }

    /// Resolves a field path to a slot.
    #[must_use]
    pub fn field_slot(&self, path: &FieldPath) -> Option<FieldSlot> {
        let component = self.component_slot(path.node, &path.component)?;
        let field = self.components[component]
            .fields
            .iter()
            .position(|f| f.name == path.field)?;
        Some(FieldSlot { component, field })
    }

    /// Ticks between sends under the max send rate; 1 when uncapped.
    /// Rounds up so the rate is never exceeded.
    #[must_use]
    pub fn send_interval(&self, simulation_tick_rate: u32) -> u32 {
        match self.max_send_rate {
            Some(rate) if rate > 0 => simulation_tick_rate.div_ceil(rate).max(1),
            _ => 1,
        }
    }
}

/// The immutable table of component and ghost types shared by every system.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostRegistry {
    components: Vec<ComponentType>,
    ghosts: Vec<GhostLayout>,
    by_name: HashMap<String, GhostTypeId>,
    hash: u64,
}

impl GhostRegistry {
    #[must_use]
    pub fn builder() -> GhostRegistryBuilder {
        GhostRegistryBuilder::default()
    }

    #[must_use]
    pub fn ghost(&self, id: GhostTypeId) -> Option<&GhostLayout> {
        self.ghosts.get(id.index())
    }

    #[must_use]
    pub fn ghost_by_name(&self, name: &str) -> Option<&GhostLayout> {
        self.by_name.get(name).and_then(|id| self.ghost(*id))
    }

    #[must_use]
    pub fn ghosts(&self) -> &[GhostLayout] {
        &self.ghosts
    }

    #[must_use]
    pub fn components(&self) -> &[ComponentType] {
        &self.components
    }

    #[must_use]
    pub fn component(&self, id: ComponentId) -> Option<&ComponentType> {
        self.components.get(id as usize)
    }

    /// Compatibility hash; peers must agree on it.
    #[must_use]
    pub const fn hash(&self) -> u64 {
        self.hash
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ghosts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ghosts.is_empty()
    }
}

/// Builder for [`GhostRegistry`].
#[derive(Debug, Default)]
pub struct GhostRegistryBuilder {
    components: Vec<ComponentType>,
    ghosts: Vec<GhostTypeDef>,
}

impl GhostRegistryBuilder {
    #[must_use]
    pub fn component(mut self, component: ComponentType) -> Self {
        self.components.push(component);
        self
    }

    #[must_use]
    pub fn ghost(mut self, ghost: GhostTypeDef) -> Self {
        self.ghosts.push(ghost);
        self
    }

    /// Validates definitions and resolves every ghost layout.
    pub fn build(self) -> SchemaResult<GhostRegistry> {
        if self.components.len() > usize::from(ComponentId::MAX) {
            return Err(SchemaError::TooMany {
                what: "component types",
                count: self.components.len(),
                max: usize::from(ComponentId::MAX),
            });
        }
        let mut component_ids: HashMap<&str, ComponentId> = HashMap::new();
        for (i, component) in self.components.iter().enumerate() {
            component.validate()?;
            if component_ids
                .insert(component.name.as_str(), i as ComponentId)
                .is_some()
            {
                return Err(SchemaError::DuplicateComponent {
                    name: component.name.clone(),
                });
            }
        }

        let mut ghosts = Vec::with_capacity(self.ghosts.len());
        let mut by_name = HashMap::new();
        for (i, def) in self.ghosts.iter().enumerate() {
            let id = GhostTypeId::new(u32::try_from(i).map_err(|_| SchemaError::TooMany {
                what: "ghost types",
                count: self.ghosts.len(),
                max: u32::MAX as usize,
            })?);
            if by_name.insert(def.name.clone(), id).is_some() {
                return Err(SchemaError::DuplicateGhost {
                    name: def.name.clone(),
                });
            }
            let layout = resolve_ghost(id, def, &self.components, &component_ids)?;
            log::debug!(
                "registered ghost type {} `{}`: {} components, {} mask bits",
                id.raw(),
                layout.name,
                layout.components.len(),
                layout.change_mask_bits
            );
            ghosts.push(layout);
        }

        let hash = registry_hash(&ghosts);
        Ok(GhostRegistry {
            components: self.components,
            ghosts,
            by_name,
            hash,
        })
    }
}

fn resolve_ghost(
    id: GhostTypeId,
    def: &GhostTypeDef,
    components: &[ComponentType],
    component_ids: &HashMap<&str, ComponentId>,
) -> SchemaResult<GhostLayout> {
    match def.nodes.first() {
        Some(root) if root.parent.is_none() => {}
        _ => {
            return Err(SchemaError::MissingRoot {
                ghost: def.name.clone(),
            })
        }
    }
    if def.importance == 0 {
        return Err(SchemaError::InvalidImportance {
            ghost: def.name.clone(),
        });
    }
    if let Some(rate) = def.max_send_rate {
        if rate == 0 {
            return Err(SchemaError::InvalidSendRate {
                ghost: def.name.clone(),
                rate,
            });
        }
    }

    let mut nodes = Vec::with_capacity(def.nodes.len());
    let mut layouts = Vec::new();
    let mut mask_bits = 0usize;
    let mut enable_bits = 0usize;

    for (node_index, node) in def.nodes.iter().enumerate() {
        if node_index > 0 && !node.parent.is_some_and(|p| p < node_index) {
            return Err(SchemaError::InvalidNodeParent {
                ghost: def.name.clone(),
                node: node_index,
            });
        }
        nodes.push(NodeLayout {
            name: node.name.clone(),
            parent: node.parent,
        });

        for (j, placed) in node.components.iter().enumerate() {
            if node.components[..j]
                .iter()
                .any(|c| c.component == placed.component)
            {
                return Err(SchemaError::DuplicateNodeComponent {
                    ghost: def.name.clone(),
                    node: node_index,
                    component: placed.component.clone(),
                });
            }
            let Some(&component_id) = component_ids.get(placed.component.as_str()) else {
                return Err(SchemaError::UnknownComponent {
                    ghost: def.name.clone(),
                    component: placed.component.clone(),
                });
            };
            let component = &components[component_id as usize];
            let variant = match &placed.overrides.variant {
                Some(name) => component.variant_named(name)?,
                None => component.resolve_default()?,
            };

            let send_rule = placed.overrides.send_rule.unwrap_or(variant.send_rule);
            let prefab_types = placed
                .overrides
                .prefab_types
                .unwrap_or(variant.prefab_types);
            let send_for_child = placed
                .overrides
                .send_data_for_child_entity
                .unwrap_or(variant.send_data_for_child_entity);
            let on_wire = prefab_types.intersects(PrefabTypes::ALL_CLIENTS)
                && (node_index == 0 || send_for_child);
            let replicated = on_wire && !variant.fields.is_empty();

            let mask_offset = mask_bits;
            if replicated {
                mask_bits += variant.fields.len();
            }
            let enable_bit = (on_wire && variant.enableable).then(|| {
                enable_bits += 1;
                enable_bits - 1
            });

            layouts.push(ComponentLayout {
                node: node_index,
                component: component_id,
                component_name: component.name.clone(),
                variant: variant.name.clone(),
                fields: variant.fields.clone(),
                send_rule,
                prefab_types,
                send_data_for_child_entity: send_for_child,
                enableable: variant.enableable,
                replicated,
                mask_offset,
                enable_bit,
            });
        }
    }

    let mask_fields = layouts
        .iter()
        .enumerate()
        .filter(|(_, c)| c.replicated)
        .flat_map(|(component, c)| {
            (0..c.fields.len()).map(move |field| FieldSlot { component, field })
        })
        .collect();

    let mut layout = GhostLayout {
        id,
        name: def.name.clone(),
        mode: def.mode,
        optimization: def.optimization,
        max_send_rate: def.max_send_rate,
        importance: def.importance,
        nodes,
        components: layouts,
        change_mask_bits: mask_bits,
        mask_fields,
        enable_bits,
        transform: None,
    };

    if let Some(path) = &def.transform {
        let slot = layout
            .field_slot(path)
            .filter(|slot| {
                matches!(
                    layout.components[slot.component].fields[slot.field].kind,
                    FieldKind::Float { lanes: 3, .. }
                )
            })
            .ok_or_else(|| SchemaError::InvalidTransform {
                ghost: def.name.clone(),
            })?;
        layout.transform = Some(slot);
    }
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ComponentOverride, ComponentVariant, PrefabNode};

    fn transform_type() -> ComponentType {
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
            .default_variant("Full")
    }

    fn health_type() -> ComponentType {
        ComponentType::single("Health", vec![FieldDef::new("value", FieldKind::int32())])
    }

    #[test]
    fn mask_offsets_are_contiguous() {
        let registry = GhostRegistry::builder()
            .component(transform_type())
            .component(health_type())
            .ghost(
                GhostTypeDef::new("Player")
                    .component("Transform")
                    .component("Health"),
            )
            .build()
            .unwrap();

        let player = registry.ghost_by_name("Player").unwrap();
        assert_eq!(player.change_mask_bits, 3);
        assert_eq!(player.components[0].mask_offset, 0);
        assert_eq!(player.components[1].mask_offset, 2);
        assert_eq!(player.components[1].field_bit(0), 2);
        assert_eq!(player.mask_fields.len(), player.change_mask_bits);
        assert_eq!(player.mask_field(2).unwrap().name, "value");
        assert_eq!(
            player.mask_fields[1],
            FieldSlot {
                component: 0,
                field: 1
            }
        );
        assert!(player.mask_field(3).is_none());
    }

    #[test]
    fn child_override_is_scoped_to_its_node() {
        let registry = GhostRegistry::builder()
            .component(transform_type())
            .ghost(
                GhostTypeDef::new("Tank")
                    .component("Transform")
                    .node(PrefabNode::child("Turret", 0).component_with(
                        "Transform",
                        ComponentOverride::default()
                            .variant("PositionOnly")
                            .send_rule(SendRule::OwnerOnly)
                            .send_data_for_child_entity(true),
                    ))
                    .node(PrefabNode::child("Barrel", 1).component("Transform")),
            )
            .build()
            .unwrap();

        let tank = registry.ghost_by_name("Tank").unwrap();
        let root = &tank.components[tank.component_slot(0, "Transform").unwrap()];
        let turret = &tank.components[tank.component_slot(1, "Transform").unwrap()];
        let barrel = &tank.components[tank.component_slot(2, "Transform").unwrap()];

        assert_eq!(root.variant, "Full");
        assert_eq!(root.send_rule, SendRule::All);
        assert_eq!(turret.variant, "PositionOnly");
        assert_eq!(turret.send_rule, SendRule::OwnerOnly);
        assert!(turret.replicated);
        assert_eq!(barrel.variant, "Full");
        assert_eq!(barrel.send_rule, SendRule::All);
        assert!(!barrel.replicated, "child without the flag stays local");
        assert_eq!(tank.change_mask_bits, 3);
    }

    #[test]
    fn server_only_components_are_not_replicated() {
        let registry = GhostRegistry::builder()
            .component(health_type())
            .ghost(GhostTypeDef::new("Crate").component_with(
                "Health",
                ComponentOverride::default().prefab_types(PrefabTypes::SERVER),
            ))
            .build()
            .unwrap();
        let ghost = registry.ghost_by_name("Crate").unwrap();
        assert!(!ghost.components[0].replicated);
        assert_eq!(ghost.change_mask_bits, 0);
    }

    #[test]
    fn ambiguous_default_fails_the_build() {
        let mut ambiguous = transform_type();
        ambiguous.default_variant = None;
        let err = GhostRegistry::builder()
            .component(ambiguous)
            .ghost(GhostTypeDef::new("A").component("Transform"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::AmbiguousDefaultVariant { .. }));
    }

    #[test]
    fn unknown_component_fails_the_build() {
        let err = GhostRegistry::builder()
            .ghost(GhostTypeDef::new("A").component("Missing"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownComponent { .. }));
    }

    #[test]
    fn transform_path_must_be_float3() {
        let err = GhostRegistry::builder()
            .component(health_type())
            .ghost(
                GhostTypeDef::new("A")
                    .component("Health")
                    .transform(FieldPath::root("Health", "value")),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidTransform { .. }));

        let registry = GhostRegistry::builder()
            .component(transform_type())
            .ghost(
                GhostTypeDef::new("B")
                    .component("Transform")
                    .transform(FieldPath::root("Transform", "position")),
            )
            .build()
            .unwrap();
        assert_eq!(
            registry.ghosts()[0].transform,
            Some(FieldSlot {
                component: 0,
                field: 0
            })
        );
    }

    #[test]
    fn send_interval_from_rate() {
        let registry = GhostRegistry::builder()
            .component(health_type())
            .ghost(GhostTypeDef::new("A").component("Health").max_send_rate(20))
            .ghost(GhostTypeDef::new("B").component("Health"))
            .build()
            .unwrap();
        assert_eq!(registry.ghosts()[0].send_interval(60), 3);
        assert_eq!(registry.ghosts()[1].send_interval(60), 1);
    }

    #[test]
    fn send_interval_never_exceeds_a_non_divisor_rate() {
        let registry = GhostRegistry::builder()
            .component(health_type())
            .ghost(GhostTypeDef::new("A").component("Health").max_send_rate(25))
            .ghost(GhostTypeDef::new("B").component("Health").max_send_rate(7))
            .ghost(GhostTypeDef::new("C").component("Health").max_send_rate(120))
            .build()
            .unwrap();
        for (layout, rate) in registry.ghosts().iter().zip([25, 7, 120]) {
            let interval = layout.send_interval(60);
            let sends = (0..60u32).filter(|t| t % interval == 0).count();
            assert!(sends <= rate as usize, "{sends} sends at {rate} Hz");
        }
        assert_eq!(registry.ghosts()[0].send_interval(60), 3);
        assert_eq!(registry.ghosts()[1].send_interval(60), 9);
        assert_eq!(registry.ghosts()[2].send_interval(60), 1);
    }

    #[test]
    fn invalid_parent_is_rejected() {
        let err = GhostRegistry::builder()
            .component(health_type())
            .ghost(GhostTypeDef::new("A").node(PrefabNode::child("Loop", 1)))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidNodeParent { node: 1, .. }));
    }
}

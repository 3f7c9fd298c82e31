//! The client entity storage seen by the receive system.

use std::collections::BTreeMap;
use std::fmt;

use codec::{ComponentState, FieldValue};
use schema::{GhostLayout, GhostTypeId, Representation};

/// Handle of a client-side entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalEntity(pub u64);

impl fmt::Display for LocalEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity{}", self.0)
    }
}

/// Entity storage the receive system writes into.
///
/// Component slots are the layout's slot indices. An entity only has the
/// slots whose prefab types include its representation.
pub trait GhostWorld {
    /// Creates an entity with the components of `layout` present for
    /// `representation`, all at their zero values.
    fn spawn(&mut self, layout: &GhostLayout, representation: Representation) -> LocalEntity;

    fn despawn(&mut self, entity: LocalEntity);

    fn exists(&self, entity: LocalEntity) -> bool;

    fn representation(&self, entity: LocalEntity) -> Option<Representation>;

    /// Switches the predicted marker, adding and removing the components
    /// that only exist in one representation.
    fn set_representation(
        &mut self,
        entity: LocalEntity,
        layout: &GhostLayout,
        representation: Representation,
    );

    fn has_component(&self, entity: LocalEntity, slot: usize) -> bool;

    fn field(&self, entity: LocalEntity, slot: usize, field: usize) -> Option<&FieldValue>;

    fn set_field(&mut self, entity: LocalEntity, slot: usize, field: usize, value: FieldValue);

    fn is_enabled(&self, entity: LocalEntity, slot: usize) -> Option<bool>;

    fn set_enabled(&mut self, entity: LocalEntity, slot: usize, enabled: bool);
}

#[derive(Debug, Clone)]
struct MemoryEntity {
    ghost_type: GhostTypeId,
    representation: Representation,
    components: Vec<Option<ComponentState>>,
}

/// In-memory [`GhostWorld`] for tests and tools.
#[derive(Debug, Default)]
pub struct MemoryWorld {
    next: u64,
    entities: BTreeMap<LocalEntity, MemoryEntity>,
}

impl MemoryWorld {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = LocalEntity> + '_ {
        self.entities.keys().copied()
    }

    #[must_use]
    pub fn ghost_type(&self, entity: LocalEntity) -> Option<GhostTypeId> {
        self.entities.get(&entity).map(|e| e.ghost_type)
    }

    /// Entities of one ghost type, oldest first.
    pub fn entities_of(&self, ghost_type: GhostTypeId) -> impl Iterator<Item = LocalEntity> + '_ {
        self.entities
            .iter()
            .filter(move |(_, e)| e.ghost_type == ghost_type)
            .map(|(id, _)| *id)
    }

    fn slot_mut(&mut self, entity: LocalEntity, slot: usize) -> Option<&mut ComponentState> {
        self.entities
            .get_mut(&entity)?
            .components
            .get_mut(slot)?
            .as_mut()
    }
}

fn component_default(layout: &GhostLayout, slot: usize) -> ComponentState {
    ComponentState {
        enabled: true,
        fields: layout.components[slot]
            .fields
            .iter()
            .map(|f| FieldValue::default_for(f.kind))
            .collect(),
    }
}

impl GhostWorld for MemoryWorld {
    fn spawn(&mut self, layout: &GhostLayout, representation: Representation) -> LocalEntity {
        let entity = LocalEntity(self.next);
        self.next += 1;
        let components = (0..layout.components.len())
            .map(|slot| {
                layout.components[slot]
                    .present_in(representation)
                    .then(|| component_default(layout, slot))
            })
            .collect();
        self.entities.insert(
            entity,
            MemoryEntity {
                ghost_type: layout.id,
                representation,
                components,
            },
        );
        entity
    }

    fn despawn(&mut self, entity: LocalEntity) {
        self.entities.remove(&entity);
    }

    fn exists(&self, entity: LocalEntity) -> bool {
        self.entities.contains_key(&entity)
    }

    fn representation(&self, entity: LocalEntity) -> Option<Representation> {
        self.entities.get(&entity).map(|e| e.representation)
    }

    fn set_representation(
        &mut self,
        entity: LocalEntity,
        layout: &GhostLayout,
        representation: Representation,
    ) {
        let Some(stored) = self.entities.get_mut(&entity) else {
            return;
        };
        stored.representation = representation;
        for (slot, component) in layout.components.iter().enumerate() {
            let Some(target) = stored.components.get_mut(slot) else {
                continue;
            };
            match (component.present_in(representation), target.is_some()) {
                (true, false) => *target = Some(component_default(layout, slot)),
                (false, true) => *target = None,
                _ => {}
            }
        }
    }

    fn has_component(&self, entity: LocalEntity, slot: usize) -> bool {
        self.entities
            .get(&entity)
            .and_then(|e| e.components.get(slot))
            .is_some_and(Option::is_some)
    }

    fn field(&self, entity: LocalEntity, slot: usize, field: usize) -> Option<&FieldValue> {
        self.entities
            .get(&entity)?
            .components
            .get(slot)?
            .as_ref()?
            .fields
            .get(field)
    }

    fn set_field(&mut self, entity: LocalEntity, slot: usize, field: usize, value: FieldValue) {
        if let Some(target) = self
            .slot_mut(entity, slot)
            .and_then(|c| c.fields.get_mut(field))
        {
            *target = value;
        }
    }

    fn is_enabled(&self, entity: LocalEntity, slot: usize) -> Option<bool> {
        self.entities
            .get(&entity)?
            .components
            .get(slot)?
            .as_ref()
            .map(|c| c.enabled)
    }

    fn set_enabled(&mut self, entity: LocalEntity, slot: usize, enabled: bool) {
        if let Some(component) = self.slot_mut(entity, slot) {
            component.enabled = enabled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{
        ComponentType, ComponentVariant, FieldDef, FieldKind, GhostMode, GhostRegistry,
        GhostTypeDef, PrefabTypes,
    };

    fn registry() -> GhostRegistry {
        GhostRegistry::builder()
            .component(ComponentType::single(
                "Health",
                vec![FieldDef::new("hp", FieldKind::int32())],
            ))
            .component(
                ComponentType::new("Velocity").variant(
                    ComponentVariant::new("Default")
                        .field(FieldDef::new("v", FieldKind::float3(100)))
                        .prefab_types(PrefabTypes::SERVER | PrefabTypes::PREDICTED_CLIENT),
                ),
            )
            .ghost(
                GhostTypeDef::new("Unit")
                    .component("Health")
                    .component("Velocity")
                    .mode(GhostMode::OwnerPredicted),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn spawn_respects_prefab_types() {
        let registry = registry();
        let layout = &registry.ghosts()[0];
        let mut world = MemoryWorld::new();
        let interpolated = world.spawn(layout, Representation::Interpolated);
        let predicted = world.spawn(layout, Representation::Predicted);

        assert!(world.has_component(interpolated, 0));
        assert!(!world.has_component(interpolated, 1));
        assert!(world.has_component(predicted, 1));
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn representation_switch_adds_and_removes_components() {
        let registry = registry();
        let layout = &registry.ghosts()[0];
        let mut world = MemoryWorld::new();
        let entity = world.spawn(layout, Representation::Interpolated);
        world.set_field(entity, 0, 0, FieldValue::Int(40));

        world.set_representation(entity, layout, Representation::Predicted);
        assert!(world.has_component(entity, 1));
        assert_eq!(world.field(entity, 0, 0), Some(&FieldValue::Int(40)));

        world.set_representation(entity, layout, Representation::Interpolated);
        assert!(!world.has_component(entity, 1));
        assert_eq!(world.representation(entity), Some(Representation::Interpolated));
    }

    #[test]
    fn writes_to_missing_components_are_ignored() {
        let registry = registry();
        let layout = &registry.ghosts()[0];
        let mut world = MemoryWorld::new();
        let entity = world.spawn(layout, Representation::Interpolated);
        world.set_field(entity, 1, 0, FieldValue::Float3([1.0; 3]));
        world.set_enabled(entity, 1, false);
        assert_eq!(world.field(entity, 1, 0), None);
        assert_eq!(world.is_enabled(entity, 1), None);

        world.despawn(entity);
        assert!(!world.exists(entity));
    }
}

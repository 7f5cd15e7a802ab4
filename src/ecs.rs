//! The boundary between this crate and a host entity-component-system: the
//! core never owns component storage itself, it only reads and writes
//! through an [`EcsStore`] the host implements over its own world.

use bytes::Bytes;

use crate::ids::{ComponentTypeId, ComponentVersion, Entity};

/// Implemented by the host application over its own ECS world. All methods
/// operate on raw component bytes; encoding/decoding to a concrete Rust type
/// is the registry's job, not this trait's.
pub trait EcsStore: Send {
    fn create_entity(&mut self) -> Entity;

    fn destroy_entity(&mut self, entity: Entity);

    fn has_component(&self, entity: Entity, type_id: ComponentTypeId) -> bool;

    fn get_component_bytes(&self, entity: Entity, type_id: ComponentTypeId) -> Option<Bytes>;

    fn set_component_bytes(&mut self, entity: Entity, type_id: ComponentTypeId, bytes: Bytes);

    fn remove_component(&mut self, entity: Entity, type_id: ComponentTypeId);

    /// Monotonic version stamped by the host every time it mutates the
    /// component locally; compared against the last replicated version to
    /// decide whether an update is due.
    fn component_version(&self, entity: Entity, type_id: ComponentTypeId) -> Option<ComponentVersion>;

    fn iterate_entities_with(&self, type_id: ComponentTypeId) -> Vec<Entity>;
}

/// A minimal in-memory [`EcsStore`] used by tests and as a reference
/// implementation; not intended for production use since it has no archetype
/// or query optimizations.
#[derive(Default)]
pub struct InMemoryEcsStore {
    next_index: u32,
    components: std::collections::HashMap<(Entity, ComponentTypeId), (ComponentVersion, Bytes)>,
    alive: std::collections::HashSet<Entity>,
}

impl EcsStore for InMemoryEcsStore {
    fn create_entity(&mut self) -> Entity {
        let entity = Entity::new(self.next_index, 0);
        self.next_index += 1;
        self.alive.insert(entity);
        entity
    }

    fn destroy_entity(&mut self, entity: Entity) {
        self.alive.remove(&entity);
        self.components.retain(|(e, _), _| *e != entity);
    }

    fn has_component(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.components.contains_key(&(entity, type_id))
    }

    fn get_component_bytes(&self, entity: Entity, type_id: ComponentTypeId) -> Option<Bytes> {
        self.components.get(&(entity, type_id)).map(|(_, b)| b.clone())
    }

    fn set_component_bytes(&mut self, entity: Entity, type_id: ComponentTypeId, bytes: Bytes) {
        let next_version = self
            .components
            .get(&(entity, type_id))
            .map(|(v, _)| v.wrapping_add(1))
            .unwrap_or_default();
        self.components.insert((entity, type_id), (next_version, bytes));
    }

    fn remove_component(&mut self, entity: Entity, type_id: ComponentTypeId) {
        self.components.remove(&(entity, type_id));
    }

    fn component_version(&self, entity: Entity, type_id: ComponentTypeId) -> Option<ComponentVersion> {
        self.components.get(&(entity, type_id)).map(|(v, _)| *v)
    }

    fn iterate_entities_with(&self, type_id: ComponentTypeId) -> Vec<Entity> {
        self.components
            .keys()
            .filter(|(_, t)| *t == type_id)
            .map(|(e, _)| *e)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips_and_bumps_version() {
        let mut store = InMemoryEcsStore::default();
        let entity = store.create_entity();
        let type_id = ComponentTypeId(1);
        store.set_component_bytes(entity, type_id, Bytes::from_static(b"a"));
        assert_eq!(store.component_version(entity, type_id), Some(ComponentVersion(0)));
        store.set_component_bytes(entity, type_id, Bytes::from_static(b"b"));
        assert_eq!(store.component_version(entity, type_id), Some(ComponentVersion(1)));
        assert_eq!(store.get_component_bytes(entity, type_id).unwrap(), Bytes::from_static(b"b"));
    }

    #[test]
    fn destroy_entity_clears_its_components() {
        let mut store = InMemoryEcsStore::default();
        let entity = store.create_entity();
        let type_id = ComponentTypeId(1);
        store.set_component_bytes(entity, type_id, Bytes::from_static(b"a"));
        store.destroy_entity(entity);
        assert!(!store.has_component(entity, type_id));
    }
}

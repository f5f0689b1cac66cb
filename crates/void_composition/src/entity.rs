//! Entities and the containers that hold them
//!
//! An [`Entity`] is an id, a name and a list of reflected components. The
//! entity id is reflected as an identity field: remapping treats it as the
//! identity of the entity, every other `EntityId` found in the graph is a
//! reference to some entity.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use void_core::EntityId;
use void_reflect::{impl_class, Class, ClassSchema, Reflected, TypeRegistry};

/// Addressable unit of a composed graph
#[derive(Default)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub components: Vec<Box<dyn Reflected>>,
}

impl_class!(Entity, "CompositionEntity");

impl Entity {
    /// Create an entity with a fresh id
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(EntityId::generate(), name)
    }

    pub fn with_id(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            components: Vec::new(),
        }
    }

    /// Builder-style [`add_component`](Self::add_component)
    pub fn with_component<C: Class>(mut self, component: C) -> Self {
        self.add_component(component);
        self
    }

    pub fn add_component<C: Class>(&mut self, component: C) {
        self.components.push(Box::new(component));
    }

    /// First component of class `C`
    pub fn find_component<C: Class>(&self) -> Option<&C> {
        self.components.iter().find_map(|c| c.downcast_ref::<C>())
    }

    pub fn find_component_mut<C: Class>(&mut self) -> Option<&mut C> {
        self.components.iter_mut().find_map(|c| c.downcast_mut::<C>())
    }

    pub fn has_component<C: Class>(&self) -> bool {
        self.components.iter().any(|c| c.is::<C>())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("components", &self.components.len())
            .finish()
    }
}

/// Provenance of a metadata entity
///
/// Metadata entities form a tree parallel to the composition: an instance's
/// metadata entity is a child of the metadata entity of the component that
/// owns the instance. Directly owned entities are associated with the
/// metadata entity of their component.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataInfo {
    pub parent: EntityId,
    pub children: Vec<EntityId>,
    pub associated_entities: Vec<EntityId>,
}

impl_class!(MetadataInfo, "MetadataInfo");

impl MetadataInfo {
    pub fn add_child(&mut self, child: EntityId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub fn remove_child(&mut self, child: EntityId) -> bool {
        let before = self.children.len();
        self.children.retain(|id| *id != child);
        before != self.children.len()
    }

    pub fn add_associated(&mut self, entity: EntityId) {
        if !self.associated_entities.contains(&entity) {
            self.associated_entities.push(entity);
        }
    }

    pub fn remove_associated(&mut self, entity: EntityId) -> bool {
        let before = self.associated_entities.len();
        self.associated_entities.retain(|id| *id != entity);
        before != self.associated_entities.len()
    }

    pub fn is_associated(&self, entity: EntityId) -> bool {
        self.associated_entities.contains(&entity)
    }
}

/// Entities cloned from an asset for one instance
///
/// The reflected shape of this container is also the root of every data
/// patch: patch addresses start with the `Entities` or `MetadataEntities`
/// field hash followed by an entity id.
#[derive(Debug, Default)]
pub struct InstantiatedContainer {
    pub entities: Vec<Entity>,
    pub metadata_entities: Vec<Entity>,
}

impl_class!(InstantiatedContainer, "InstantiatedContainer");

impl InstantiatedContainer {
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().map(|e| e.id)
    }

    /// Entities and metadata entities
    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().chain(&self.metadata_entities)
    }

    pub fn find(&self, id: EntityId) -> Option<&Entity> {
        self.all_entities().find(|e| e.id == id)
    }

    pub fn find_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities
            .iter_mut()
            .chain(self.metadata_entities.iter_mut())
            .find(|e| e.id == id)
    }

    /// Take an entity out of the container
    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        let index = self.entities.iter().position(|e| e.id == id)?;
        Some(self.entities.remove(index))
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Baseline entity id to instance entity id
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIdMap(BTreeMap<EntityId, EntityId>);

impl_class!(EntityIdMap, "EntityIdMap");

impl EntityIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The inverse mapping
    pub fn inverse(&self) -> EntityIdMap {
        self.0.iter().map(|(from, to)| (*to, *from)).collect()
    }

    /// Mapped id, or `id` itself when unmapped
    pub fn map_or_keep(&self, id: EntityId) -> EntityId {
        self.0.get(&id).copied().unwrap_or(id)
    }
}

impl Deref for EntityIdMap {
    type Target = BTreeMap<EntityId, EntityId>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for EntityIdMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<(EntityId, EntityId)> for EntityIdMap {
    fn from_iter<I: IntoIterator<Item = (EntityId, EntityId)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub(crate) fn reflect(registry: &mut TypeRegistry) {
    registry
        .register_leaf::<EntityIdMap>()
        .register_class(
            ClassSchema::builder::<Entity>()
                .identity_field("Id", |e| &e.id, |e| &mut e.id)
                .field("Name", |e| &e.name, |e| &mut e.name)
                .field("Components", |e| &e.components, |e| &mut e.components)
                .persistent_id(|e| e.id.raw())
                .build(),
        )
        .register_class(
            ClassSchema::builder::<MetadataInfo>()
                .field("Parent", |m| &m.parent, |m| &mut m.parent)
                .field("Children", |m| &m.children, |m| &mut m.children)
                .field(
                    "AssociatedEntities",
                    |m| &m.associated_entities,
                    |m| &mut m.associated_entities,
                )
                .build(),
        )
        .register_class(
            ClassSchema::builder::<InstantiatedContainer>()
                .field("Entities", |c| &c.entities, |c| &mut c.entities)
                .field(
                    "MetadataEntities",
                    |c| &c.metadata_entities,
                    |c| &mut c.metadata_entities,
                )
                .build(),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use void_reflect::Cloner;

    #[test]
    fn test_components() {
        let mut entity = Entity::new("crate").with_component(MetadataInfo::default());
        assert!(entity.id.is_valid());
        assert!(entity.has_component::<MetadataInfo>());

        entity
            .find_component_mut::<MetadataInfo>()
            .unwrap()
            .add_child(EntityId::from_raw(9));
        assert_eq!(
            entity.find_component::<MetadataInfo>().unwrap().children,
            [EntityId::from_raw(9)]
        );
    }

    #[test]
    fn test_metadata_associations_are_unique() {
        let mut info = MetadataInfo::default();
        let id = EntityId::from_raw(4);
        info.add_associated(id);
        info.add_associated(id);
        assert_eq!(info.associated_entities.len(), 1);
        assert!(info.remove_associated(id));
        assert!(!info.is_associated(id));
    }

    #[test]
    fn test_entity_id_map_inverse() {
        let map: EntityIdMap = [(EntityId::from_raw(1), EntityId::from_raw(10))]
            .into_iter()
            .collect();
        let inverse = map.inverse();
        assert_eq!(inverse.get(&EntityId::from_raw(10)), Some(&EntityId::from_raw(1)));
        assert_eq!(map.map_or_keep(EntityId::from_raw(2)), EntityId::from_raw(2));
    }

    #[test]
    fn test_clone_container() {
        let mut registry = TypeRegistry::new();
        reflect(&mut registry);

        let container = InstantiatedContainer {
            entities: vec![Entity::new("a").with_component(MetadataInfo {
                parent: EntityId::from_raw(3),
                ..MetadataInfo::default()
            })],
            metadata_entities: vec![Entity::new("meta")],
        };
        let copy = Cloner::new(&registry).clone_typed(&container).unwrap();
        assert_eq!(copy.entities[0].id, container.entities[0].id);
        assert_eq!(copy.entities[0].name, "a");
        assert_eq!(
            copy.entities[0].find_component::<MetadataInfo>().unwrap().parent,
            EntityId::from_raw(3)
        );
        assert_eq!(copy.metadata_entities[0].id, container.metadata_entities[0].id);
    }
}

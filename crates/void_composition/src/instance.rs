//! Composition instances
//!
//! An instance is one copy of an asset's entities inside a component. What
//! persists is the mapping from baseline entity ids to the instance's ids,
//! the data patch holding the instance's divergence from the baseline and
//! the data flags of its entities. The instantiated entities themselves
//! are rebuilt from those on every instantiation.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use log::debug;
use void_asset::AssetId;
use void_core::{EntityId, InstanceId};
use void_reflect::{
    downcast_box, impl_class, Class, ClassSchema, ContainerView, DataPatch, DataPatchFlags, FlagsMap,
    PatchSource, ReflectError, Reflected, TypeRegistry,
};

use crate::component::CompositionComponent;
use crate::data_flags::DataFlagsPerEntity;
use crate::entity::{Entity, EntityIdMap, InstantiatedContainer};
use crate::error::{CompositionError, Result};
use crate::remap::{IdMapper, IdRemapper};

// ============================================================================
// Staging
// ============================================================================

/// Borrowed baseline of an asset, the source of every clone and patch
pub(crate) struct Staging<'a> {
    asset: AssetId,
    entities: Vec<&'a dyn Reflected>,
    metadata_entities: Vec<&'a dyn Reflected>,
    entity_ids: BTreeSet<EntityId>,
    metadata_entity: EntityId,
    flags: FlagsMap,
}

impl<'a> Staging<'a> {
    /// Stage the entities of an instantiated asset component
    pub(crate) fn of(asset: AssetId, component: &'a CompositionComponent) -> Self {
        let entities: Vec<&'a Entity> = component.entities();
        let metadata_entities: Vec<&'a Entity> = component.metadata_entities();
        let entity_ids = entities
            .iter()
            .chain(&metadata_entities)
            .map(|e| e.id)
            .collect();
        Self {
            asset,
            entities: entities.into_iter().map(|e| e as &dyn Reflected).collect(),
            metadata_entities: metadata_entities
                .into_iter()
                .map(|e| e as &dyn Reflected)
                .collect(),
            entity_ids,
            metadata_entity: component.metadata_entity().id,
            flags: component.data_flags_for_entities(),
        }
    }

    fn view(&self) -> ContainerView<'a> {
        self.metadata_view()
            .with_elements("Entities", <Vec<Entity>>::CLASS_ID, self.entities.clone())
    }

    fn metadata_view(&self) -> ContainerView<'a> {
        ContainerView::new(InstantiatedContainer::CLASS_ID).with_elements(
            "MetadataEntities",
            <Vec<Entity>>::CLASS_ID,
            self.metadata_entities.clone(),
        )
    }
}

fn into_container(object: Box<dyn Reflected>) -> Result<InstantiatedContainer> {
    let found = object.class_id();
    downcast_box::<InstantiatedContainer>(object)
        .map(|container| *container)
        .map_err(|_| {
            CompositionError::from(ReflectError::ClassMismatch {
                expected: InstantiatedContainer::CLASS_ID,
                found,
            })
        })
}

fn generate(_: EntityId) -> EntityId {
    EntityId::generate()
}

// ============================================================================
// Instance
// ============================================================================

/// One instantiation of an asset
#[derive(Default)]
pub struct CompositionInstance {
    pub(crate) id: InstanceId,
    pub(crate) entity_id_map: EntityIdMap,
    pub(crate) data_patch: DataPatch,
    pub(crate) data_flags: DataFlagsPerEntity,
    pub(crate) instantiated: Option<InstantiatedContainer>,
    pub(crate) metadata_entity: EntityId,
    reverse: OnceLock<EntityIdMap>,
}

impl_class!(CompositionInstance, "CompositionInstance");

impl CompositionInstance {
    pub(crate) fn new(id: InstanceId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Baseline entity id to instance entity id
    pub fn entity_id_map(&self) -> &EntityIdMap {
        &self.entity_id_map
    }

    /// Instance entity id to baseline entity id, built on first use
    pub fn entity_id_to_base_map(&self) -> &EntityIdMap {
        self.reverse.get_or_init(|| self.entity_id_map.inverse())
    }

    /// Build the reverse map now
    pub fn build_reverse_lookup(&self) {
        self.entity_id_to_base_map();
    }

    pub(crate) fn invalidate_reverse_lookup(&mut self) {
        self.reverse = OnceLock::new();
    }

    pub fn data_patch(&self) -> &DataPatch {
        &self.data_patch
    }

    pub fn data_flags(&self) -> &DataFlagsPerEntity {
        &self.data_flags
    }

    pub fn is_instantiated(&self) -> bool {
        self.instantiated.is_some()
    }

    pub fn instantiated(&self) -> Option<&InstantiatedContainer> {
        self.instantiated.as_ref()
    }

    pub fn instantiated_mut(&mut self) -> Option<&mut InstantiatedContainer> {
        self.instantiated.as_mut()
    }

    /// Instantiated entities, empty before instantiation
    pub fn entities(&self) -> &[Entity] {
        self.instantiated
            .as_ref()
            .map(|c| c.entities.as_slice())
            .unwrap_or_default()
    }

    pub fn metadata_entities(&self) -> &[Entity] {
        self.instantiated
            .as_ref()
            .map(|c| c.metadata_entities.as_slice())
            .unwrap_or_default()
    }

    pub fn metadata_entity_id(&self) -> EntityId {
        self.metadata_entity
    }

    /// The instance's copy of the asset's metadata entity
    pub fn metadata_entity(&self) -> Option<&Entity> {
        let id = self.metadata_entity;
        self.metadata_entities().iter().find(|e| e.id == id)
    }

    pub fn metadata_entity_mut(&mut self) -> Option<&mut Entity> {
        let id = self.metadata_entity;
        self.instantiated
            .as_mut()?
            .metadata_entities
            .iter_mut()
            .find(|e| e.id == id)
    }

    // ------------------------------------------------------------------------
    // Data flags
    // ------------------------------------------------------------------------

    /// Whether `entity` is one of this instance's entities
    pub fn is_valid_entity(&self, entity: EntityId) -> bool {
        self.entity_id_to_base_map().contains_key(&entity)
    }

    pub fn entity_data_flags(&self, entity: EntityId) -> Option<&FlagsMap> {
        self.data_flags.entity_flags(entity)
    }

    /// Replace the flags of an entity; `false` if the entity is not ours
    pub fn set_entity_data_flags(&mut self, entity: EntityId, flags: FlagsMap) -> bool {
        if !self.is_valid_entity(entity) {
            return false;
        }
        self.data_flags.set_entity_flags(entity, flags);
        true
    }

    pub fn clear_entity_data_flags(&mut self, entity: EntityId) -> bool {
        if !self.is_valid_entity(entity) {
            return false;
        }
        self.data_flags.clear_entity_flags(entity);
        true
    }

    pub fn entity_data_flags_at_address(&self, entity: EntityId, address: &[u64]) -> DataPatchFlags {
        self.data_flags.flags_at(entity, address)
    }

    /// Set the flags of one address of an entity; zero flags erase it
    pub fn set_entity_data_flags_at_address(
        &mut self,
        entity: EntityId,
        address: &[u64],
        flags: DataPatchFlags,
    ) -> bool {
        if !self.is_valid_entity(entity) {
            return false;
        }
        self.data_flags.set_at(entity, address, flags);
        true
    }

    /// Flags addressed inside the patched container
    pub fn data_flags_for_patching(&self) -> FlagsMap {
        self.data_flags.for_patching(&self.entity_id_map)
    }

    // ------------------------------------------------------------------------
    // Instantiation
    // ------------------------------------------------------------------------

    /// Rebuild the instantiated entities from the baseline
    pub(crate) fn instantiate(&mut self, registry: &TypeRegistry, staging: &Staging<'_>) -> Result<()> {
        if self.entity_id_map.is_empty() {
            self.instantiate_fresh(registry, staging, &mut generate)
        } else {
            self.instantiate_patched(registry, staging)
        }
    }

    /// Clone the baseline with new ids, never patched before
    pub(crate) fn instantiate_fresh(
        &mut self,
        registry: &TypeRegistry,
        staging: &Staging<'_>,
        new_id: &mut IdMapper<'_>,
    ) -> Result<()> {
        let mut container = into_container(staging.view().materialize(registry)?)?;
        self.entity_id_map.clear();
        IdRemapper::new(registry).generate_new_ids(
            &mut [&mut container as &mut dyn Reflected],
            &mut self.entity_id_map,
            new_id,
        );
        self.finish(container, staging)
    }

    /// Apply the stored patch to the baseline and map ids through the stored map
    fn instantiate_patched(&mut self, registry: &TypeRegistry, staging: &Staging<'_>) -> Result<()> {
        let target_flags = self.data_flags_for_patching();
        let view = staging.view();
        let patched =
            self.data_patch
                .apply(registry, PatchSource::View(&view), &staging.flags, &target_flags)?;
        let mut container = into_container(patched)?;
        IdRemapper::new(registry).extend_and_apply(
            &mut container,
            &mut self.entity_id_map,
            &mut generate,
        );

        let instance = self.id;
        self.entity_id_map.retain(|base, _| {
            let present = staging.entity_ids.contains(base);
            if !present {
                debug!(
                    "Pruning id map entry {} of instance {:?}: no longer in asset {}",
                    base, instance, staging.asset
                );
            }
            present
        });
        self.finish(container, staging)
    }

    /// Clone only the baseline metadata entities, used when restoring
    /// entities into an instance that no longer exists
    pub(crate) fn instantiate_metadata_only(
        &mut self,
        registry: &TypeRegistry,
        staging: &Staging<'_>,
    ) -> Result<()> {
        let mut container = into_container(staging.metadata_view().materialize(registry)?)?;
        IdRemapper::new(registry).generate_new_ids(
            &mut [&mut container as &mut dyn Reflected],
            &mut self.entity_id_map,
            &mut generate,
        );
        self.finish(container, staging)
    }

    fn finish(&mut self, container: InstantiatedContainer, staging: &Staging<'_>) -> Result<()> {
        let metadata_entity = self
            .entity_id_map
            .get(&staging.metadata_entity)
            .copied()
            .filter(|id| container.metadata_entities.iter().any(|e| e.id == *id))
            .ok_or(CompositionError::MissingMetadataEntity {
                asset: staging.asset,
                instance: self.id,
                expected: staging.metadata_entity,
            })?;
        self.metadata_entity = metadata_entity;
        self.instantiated = Some(container);
        self.invalidate_reverse_lookup();
        Ok(())
    }

    pub(crate) fn uninstantiate(&mut self) {
        self.instantiated = None;
    }

    // ------------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------------

    /// Diff the instantiated entities against the baseline
    ///
    /// Ids are mapped back to baseline ids for the diff and forward again
    /// afterwards. Flags of removed entities and stale addresses are pruned.
    pub(crate) fn compute_data_patch(&mut self, registry: &TypeRegistry, staging: &Staging<'_>) -> Result<()> {
        let Some(container) = self.instantiated.as_mut() else {
            return Ok(());
        };
        let remapper = IdRemapper::new(registry);
        let to_base = self.entity_id_map.inverse();
        remapper.apply_map(container, &to_base);

        let target_flags = self.data_flags.for_patching(&self.entity_id_map);
        let view = staging.view();
        let patch = DataPatch::create(
            registry,
            PatchSource::View(&view),
            &*container,
            &staging.flags,
            &target_flags,
        );
        remapper.apply_map(container, &self.entity_id_map);

        self.data_patch = patch?;
        self.data_flags.cleanup(registry, &container.entities);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------------

    /// Take an instantiated entity out of the instance
    pub(crate) fn remove_entity(&mut self, entity: EntityId) -> Option<Entity> {
        let removed = self.instantiated.as_mut()?.remove_entity(entity)?;
        self.data_flags.clear_entity_flags(entity);
        if let Some(base) = self.entity_id_to_base_map().get(&entity).copied() {
            self.entity_id_map.remove(&base);
        }
        self.invalidate_reverse_lookup();
        Some(removed)
    }

    /// Put an entity back as the copy of baseline entity `ancestor`
    pub(crate) fn restore_entity(&mut self, entity: Entity, ancestor: EntityId, flags: &FlagsMap) {
        let id = entity.id;
        self.instantiated
            .get_or_insert_with(InstantiatedContainer::default)
            .entities
            .push(entity);
        self.entity_id_map.insert(ancestor, id);
        self.invalidate_reverse_lookup();
        self.data_flags.set_entity_flags(id, flags.clone());
    }

    /// Give every instantiated entity a new id
    pub(crate) fn apply_new_ids(&mut self, previous_to_new: &EntityIdMap) {
        for live in self.entity_id_map.values_mut() {
            *live = previous_to_new.map_or_keep(*live);
        }
        self.data_flags.remap_entities(previous_to_new);
        self.invalidate_reverse_lookup();
    }
}

pub(crate) fn reflect(registry: &mut TypeRegistry) {
    registry.register_class(
        ClassSchema::builder::<CompositionInstance>()
            .field("Id", |i| &i.id, |i| &mut i.id)
            .field("EntityIdMap", |i| &i.entity_id_map, |i| &mut i.entity_id_map)
            .field("DataPatch", |i| &i.data_patch, |i| &mut i.data_patch)
            .field("DataFlags", |i| &i.data_flags, |i| &mut i.data_flags)
            .persistent_id(|i| i.id.raw())
            .build(),
    );
}

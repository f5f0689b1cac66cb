//! Composition components
//!
//! A component owns entities directly and through references to other
//! assets. Each reference holds instances of its asset; every instance is a
//! copy of the asset's entities under new ids, rebuilt from the asset and the
//! instance's data patch whenever the component is instantiated.
//!
//! Every component also carries a metadata entity. Its [`MetadataInfo`]
//! links the metadata entities of the instances below it as children and
//! lists the directly owned entities as associated entities.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, error, warn};
use void_asset::AssetId;
use void_core::EntityId;
use void_reflect::{impl_class, Cloner, FlagsMap, Reflected, TypeRegistry};

use crate::asset::CompositionContext;
use crate::config::CompositionConfig;
use crate::entity::{Entity, EntityIdMap, MetadataInfo};
use crate::error::{CompositionError, Result};
use crate::instance::CompositionInstance;
use crate::reference::{CompositionReference, EntityRestoreInfo, InstanceAddress};
use crate::remap::{IdMapper, IdRemapper, RemapPass};

/// Who owns an entity of a component
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityOwner {
    /// Owned by the component itself
    Direct,
    /// Owned by an instance of a referenced asset
    Instance(InstanceAddress),
}

/// A graph of entities composed from owned entities and asset instances
pub struct CompositionComponent {
    pub(crate) entities: Vec<Entity>,
    pub(crate) references: Vec<CompositionReference>,
    pub(crate) is_dynamic: bool,
    pub(crate) metadata_entity: Entity,
    pub(crate) my_asset: Option<AssetId>,
    pub(crate) instantiated: bool,
    pub(crate) config: CompositionConfig,
    entity_info: Option<BTreeMap<EntityId, EntityOwner>>,
}

impl_class!(CompositionComponent, "CompositionComponent");

impl Default for CompositionComponent {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            references: Vec::new(),
            is_dynamic: false,
            metadata_entity: Entity::new(""),
            my_asset: None,
            instantiated: false,
            config: CompositionConfig::default(),
            entity_info: None,
        }
    }
}

impl CompositionComponent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CompositionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Asset this component is the data of, if any
    pub fn my_asset(&self) -> Option<AssetId> {
        self.my_asset
    }

    pub(crate) fn set_my_asset(&mut self, asset: Option<AssetId>) {
        self.my_asset = asset;
    }

    pub fn config(&self) -> &CompositionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: CompositionConfig) {
        self.config = config;
    }

    /// Whether the asset is meant to be instantiated at runtime
    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    pub fn set_dynamic(&mut self, dynamic: bool) {
        self.is_dynamic = dynamic;
    }

    pub fn is_instantiated(&self) -> bool {
        self.instantiated
    }

    pub fn references(&self) -> &[CompositionReference] {
        &self.references
    }

    // ------------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------------

    /// Every entity of the component: instance entities first, then the
    /// directly owned ones
    pub fn entities(&self) -> Vec<&Entity> {
        self.instances()
            .flat_map(CompositionInstance::entities)
            .chain(&self.entities)
            .collect()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities().into_iter().map(|e| e.id).collect()
    }

    /// Entities owned by the component itself
    pub fn directly_owned_entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Metadata entities of every instance, then the component's own
    pub fn metadata_entities(&self) -> Vec<&Entity> {
        self.instances()
            .flat_map(CompositionInstance::metadata_entities)
            .chain(std::iter::once(&self.metadata_entity))
            .collect()
    }

    pub fn metadata_entity_ids(&self) -> Vec<EntityId> {
        self.metadata_entities().into_iter().map(|e| e.id).collect()
    }

    pub fn metadata_entity(&self) -> &Entity {
        &self.metadata_entity
    }

    pub fn metadata_entity_mut(&mut self) -> &mut Entity {
        &mut self.metadata_entity
    }

    fn instances(&self) -> impl Iterator<Item = &CompositionInstance> {
        self.references.iter().flat_map(|r| r.instances.iter())
    }

    /// Data flags of every instance, addressed inside a container holding
    /// this component's entities
    pub fn data_flags_for_entities(&self) -> FlagsMap {
        let mut flags = FlagsMap::new();
        for instance in self.instances() {
            flags.extend(instance.data_flags().for_container());
        }
        flags
    }

    /// Add an entity owned by the component
    pub fn add_entity(&mut self, entity: Entity) {
        let id = entity.id;
        if let Some(info) = self.metadata_entity.find_component_mut::<MetadataInfo>() {
            info.add_associated(id);
        }
        if let Some(map) = &mut self.entity_info {
            map.insert(id, EntityOwner::Direct);
        }
        self.entities.push(entity);
    }

    /// Take an entity out of the component
    ///
    /// The entity is returned to the caller; dropping it deletes it. An
    /// instance left without entities is removed when
    /// `remove_empty_instance` is set.
    pub fn remove_entity(&mut self, id: EntityId, remove_empty_instance: bool) -> Option<Entity> {
        if let Some(index) = self.entities.iter().position(|e| e.id == id) {
            if let Some(info) = self.metadata_entity.find_component_mut::<MetadataInfo>() {
                info.remove_associated(id);
            }
            if let Some(map) = &mut self.entity_info {
                map.remove(&id);
            }
            return Some(self.entities.remove(index));
        }

        let Some(EntityOwner::Instance(address)) = self.owner_of(id) else {
            return None;
        };
        let reference = self.find_composition_mut(address.asset)?;
        let removed = reference.remove_entity(id, address.instance)?;
        let empty = reference
            .find_instance(address.instance)
            .map_or(false, |instance| instance.entities().is_empty());
        if let Some(map) = &mut self.entity_info {
            map.remove(&id);
        }
        if remove_empty_instance && empty {
            debug!("Removing empty instance {:?} of asset {}", address.instance, address.asset);
            self.remove_instance(address);
        }
        Some(removed)
    }

    pub fn find_entity(&self, id: EntityId) -> Option<&Entity> {
        if self.metadata_entity.id == id {
            return Some(&self.metadata_entity);
        }
        self.entities.iter().find(|e| e.id == id).or_else(|| {
            self.instances()
                .find_map(|instance| instance.instantiated()?.find(id))
        })
    }

    pub fn find_entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        if self.metadata_entity.id == id {
            return Some(&mut self.metadata_entity);
        }
        if let Some(index) = self.entities.iter().position(|e| e.id == id) {
            return Some(&mut self.entities[index]);
        }
        self.references
            .iter_mut()
            .flat_map(|r| r.instances.iter_mut())
            .find_map(|instance| instance.instantiated_mut()?.find_mut(id))
    }

    /// Owner of an entity, from the entity info map when it is built
    pub fn owner_of(&self, id: EntityId) -> Option<EntityOwner> {
        if let Some(map) = &self.entity_info {
            return map.get(&id).copied();
        }
        if self.metadata_entity.id == id || self.entities.iter().any(|e| e.id == id) {
            return Some(EntityOwner::Direct);
        }
        self.references.iter().find_map(|reference| {
            reference.instances.iter().find_map(|instance| {
                instance.instantiated()?.find(id)?;
                Some(EntityOwner::Instance(InstanceAddress {
                    asset: reference.asset_id(),
                    instance: instance.id(),
                }))
            })
        })
    }

    /// Instance owning an entity, `None` for directly owned entities
    pub fn composition_for_entity(&self, id: EntityId) -> Option<InstanceAddress> {
        match self.owner_of(id)? {
            EntityOwner::Direct => None,
            EntityOwner::Instance(address) => Some(address),
        }
    }

    // ------------------------------------------------------------------------
    // Entity info map
    // ------------------------------------------------------------------------

    /// Owner of every entity, built on first use
    pub fn entity_info_map(&mut self) -> &BTreeMap<EntityId, EntityOwner> {
        let map = match self.entity_info.take() {
            Some(map) => map,
            None => self.build_entity_info(),
        };
        self.entity_info.insert(map)
    }

    pub fn rebuild_entity_info_map(&mut self) {
        self.entity_info = Some(self.build_entity_info());
    }

    fn build_entity_info(&self) -> BTreeMap<EntityId, EntityOwner> {
        let mut map: BTreeMap<EntityId, EntityOwner> = self
            .entities
            .iter()
            .chain(std::iter::once(&self.metadata_entity))
            .map(|e| (e.id, EntityOwner::Direct))
            .collect();
        for reference in &self.references {
            for instance in &reference.instances {
                let owner = EntityOwner::Instance(InstanceAddress {
                    asset: reference.asset_id(),
                    instance: instance.id(),
                });
                if let Some(container) = instance.instantiated() {
                    map.extend(container.all_entities().map(|e| (e.id, owner)));
                }
            }
        }
        map
    }

    // ------------------------------------------------------------------------
    // References and instances
    // ------------------------------------------------------------------------

    pub fn find_composition(&self, asset: AssetId) -> Option<&CompositionReference> {
        self.references.iter().find(|r| r.asset_id() == asset)
    }

    pub fn find_composition_mut(&mut self, asset: AssetId) -> Option<&mut CompositionReference> {
        self.references.iter_mut().find(|r| r.asset_id() == asset)
    }

    /// Reference to `asset`, added if the component has none
    ///
    /// A new reference is instantiated right away when the component is.
    pub fn add_or_get_reference(
        &mut self,
        ctx: &CompositionContext<'_>,
        asset: AssetId,
    ) -> Result<&mut CompositionReference> {
        if self.my_asset == Some(asset) {
            return Err(CompositionError::CircularReference(asset));
        }
        let index = match self.references.iter().position(|r| r.asset_id() == asset) {
            Some(index) => index,
            None => {
                let mut reference = CompositionReference::new(asset);
                if self.instantiated {
                    reference.instantiate_checked(ctx, &self.config)?;
                }
                self.references.push(reference);
                self.references.len() - 1
            }
        };
        Ok(&mut self.references[index])
    }

    /// Add a new instance of `asset`
    ///
    /// `custom_mapper` picks the ids of the instance's entities; fresh ids
    /// are generated without one.
    pub fn add_composition(
        &mut self,
        ctx: &CompositionContext<'_>,
        asset: AssetId,
        custom_mapper: Option<&mut IdMapper<'_>>,
    ) -> Result<InstanceAddress> {
        let registry = ctx.registry;
        let instance = self
            .add_or_get_reference(ctx, asset)?
            .create_instance(registry, custom_mapper)?;
        let address = InstanceAddress { asset, instance };
        if self.instantiated {
            self.track_instance_entities(address);
            self.link_instance_metadata(address);
        }
        Ok(address)
    }

    /// Move an instance out of `source` into this component
    ///
    /// The instance is instantiated first when this component is. On
    /// failure it stays in `source` and this component is left unchanged.
    pub fn add_instance_moved(
        &mut self,
        ctx: &CompositionContext<'_>,
        source: &mut CompositionComponent,
        address: InstanceAddress,
    ) -> Result<InstanceAddress> {
        let unknown = || CompositionError::UnknownInstance {
            asset: address.asset,
            instance: address.instance,
        };
        if source
            .find_composition(address.asset)
            .and_then(|r| r.find_instance(address.instance))
            .is_none()
        {
            return Err(unknown());
        }
        let added_reference = self.find_composition(address.asset).is_none();
        self.add_or_get_reference(ctx, address.asset)?;

        let registry = ctx.registry;
        let prepared = match (
            self.find_composition(address.asset),
            source
                .find_composition_mut(address.asset)
                .and_then(|r| r.find_instance_mut(address.instance)),
        ) {
            (Some(reference), Some(instance)) => reference.match_instantiation(registry, instance),
            _ => Err(unknown()),
        };
        if let Err(err) = prepared {
            if added_reference {
                self.references.retain(|r| r.asset_id() != address.asset);
            }
            return Err(err);
        }

        let instance = source.remove_instance(address).ok_or_else(unknown)?;
        self.find_composition_mut(address.asset)
            .ok_or(CompositionError::NotInstantiated)?
            .adopt_instance(registry, instance)?;

        self.track_instance_entities(address);
        self.link_instance_metadata(address);
        Ok(address)
    }

    /// Remove one instance; the reference goes with its last instance
    pub fn remove_instance(&mut self, address: InstanceAddress) -> Option<CompositionInstance> {
        let index = self
            .references
            .iter()
            .position(|r| r.asset_id() == address.asset)?;
        let instance = self.references[index].remove_instance(address.instance)?;
        if self.references[index].instances().is_empty() {
            self.references.remove(index);
        }

        let metadata = instance.metadata_entity_id();
        if let Some(info) = self.metadata_entity.find_component_mut::<MetadataInfo>() {
            info.remove_child(metadata);
        }
        if let Some(map) = &mut self.entity_info {
            map.retain(|_, owner| *owner != EntityOwner::Instance(address));
        }
        Some(instance)
    }

    /// Remove the reference to `asset` with all its instances
    pub fn remove_composition(&mut self, asset: AssetId) -> Option<CompositionReference> {
        let index = self.references.iter().position(|r| r.asset_id() == asset)?;
        let reference = self.references.remove(index);
        if let Some(info) = self.metadata_entity.find_component_mut::<MetadataInfo>() {
            for instance in reference.instances() {
                info.remove_child(instance.metadata_entity_id());
            }
        }
        self.entity_info = None;
        Some(reference)
    }

    /// Assets referenced by the component, and by those assets if `recurse`
    pub fn referenced_assets(&self, recurse: bool) -> BTreeSet<AssetId> {
        let mut assets = BTreeSet::new();
        self.collect_referenced_assets(recurse, &mut assets);
        assets
    }

    fn collect_referenced_assets(&self, recurse: bool, assets: &mut BTreeSet<AssetId>) {
        for reference in &self.references {
            if !assets.insert(reference.asset_id()) || !recurse {
                continue;
            }
            if let Some(asset) = reference.asset() {
                let visited = asset.with_component(|dependent| {
                    dependent.collect_referenced_assets(recurse, assets)
                });
                if let Err(err) = visited {
                    debug!("Not descending into asset {}: {}", reference.asset_id(), err);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Instantiation
    // ------------------------------------------------------------------------

    /// Instantiate every reference
    ///
    /// Returns `false` if any reference failed. In partial mode failed
    /// references are removed and the component stays instantiated with the
    /// rest, unless none is left. In strict mode the component is left
    /// uninstantiated.
    pub fn instantiate(&mut self, ctx: &CompositionContext<'_>) -> bool {
        if self.instantiated {
            return true;
        }
        let config = self.config;
        let mut failed = Vec::new();
        for (index, reference) in self.references.iter_mut().enumerate() {
            if !reference.instantiate(ctx, &config) {
                failed.push(index);
                if !config.allow_partial_instantiation {
                    break;
                }
            }
        }

        if !failed.is_empty() && !config.allow_partial_instantiation {
            error!(
                "Component of asset {} failed to instantiate, rolling back {} reference(s)",
                self.asset_label(),
                self.references.len()
            );
            for reference in &mut self.references {
                reference.uninstantiate();
            }
            return false;
        }
        for index in failed.iter().rev() {
            let reference = self.references.remove(*index);
            warn!(
                "Removing reference to asset {} with {} instance(s) from component of asset {}",
                reference.asset_id(),
                reference.instances().len(),
                self.asset_label()
            );
        }
        if !failed.is_empty() && self.references.is_empty() {
            return false;
        }

        self.instantiated = true;
        self.metadata_entity.name = match self.my_asset {
            Some(asset) => format!("Asset {}", asset),
            None => "No Asset Association".to_string(),
        };
        self.entity_info = None;
        self.init_metadata();
        failed.is_empty()
    }

    /// Drop every instance's entities
    pub fn uninstantiate(&mut self) {
        for reference in &mut self.references {
            reference.uninstantiate();
        }
        self.instantiated = false;
        self.entity_info = None;
    }

    fn asset_label(&self) -> String {
        self.my_asset
            .map_or_else(|| "<none>".to_string(), |asset| asset.to_string())
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    /// Wire the metadata hierarchy of the component and its instances
    pub fn init_metadata(&mut self) {
        if !self.metadata_entity.has_component::<MetadataInfo>() {
            self.metadata_entity.add_component(MetadataInfo::default());
        }
        let own = self.metadata_entity.id;
        let mut children = Vec::new();
        for instance in self.references.iter_mut().flat_map(|r| r.instances.iter_mut()) {
            if let Some(metadata) = instance.metadata_entity_mut() {
                set_metadata_parent(metadata, own);
                children.push(metadata.id);
            }
        }

        let associated: Vec<EntityId> = self.entities.iter().map(|e| e.id).collect();
        if let Some(info) = self.metadata_entity.find_component_mut::<MetadataInfo>() {
            for child in children {
                info.add_child(child);
            }
            for entity in associated {
                info.add_associated(entity);
            }
        }
        self.clean_metadata_associations();
    }

    /// Drop metadata links to entities that are gone
    pub fn clean_metadata_associations(&mut self) {
        let children: BTreeSet<EntityId> = self
            .instances()
            .map(CompositionInstance::metadata_entity_id)
            .collect();
        let owned: BTreeSet<EntityId> = self.entities.iter().map(|e| e.id).collect();
        let Some(info) = self.metadata_entity.find_component_mut::<MetadataInfo>() else {
            return;
        };
        info.children.retain(|id| {
            let live = children.contains(id);
            if !live {
                debug!("Dropping metadata child {}: no such instance", id);
            }
            live
        });
        info.associated_entities.retain(|id| {
            let live = owned.contains(id);
            if !live {
                debug!("Dropping metadata association with missing entity {}", id);
            }
            live
        });
    }

    /// Record a new instance's entities in the entity info map, if built
    fn track_instance_entities(&mut self, address: InstanceAddress) {
        let Some(map) = &mut self.entity_info else {
            return;
        };
        let container = self
            .references
            .iter()
            .find(|r| r.asset_id() == address.asset)
            .and_then(|r| r.find_instance(address.instance))
            .and_then(|i| i.instantiated());
        if let Some(container) = container {
            let owner = EntityOwner::Instance(address);
            map.extend(container.all_entities().map(|e| (e.id, owner)));
        }
    }

    fn link_instance_metadata(&mut self, address: InstanceAddress) {
        let own = self.metadata_entity.id;
        let Some(instance) = self
            .find_composition_mut(address.asset)
            .and_then(|r| r.find_instance_mut(address.instance))
        else {
            return;
        };
        let Some(metadata) = instance.metadata_entity_mut() else {
            return;
        };
        set_metadata_parent(metadata, own);
        let child = metadata.id;
        if let Some(info) = self.metadata_entity.find_component_mut::<MetadataInfo>() {
            info.add_child(child);
        }
    }

    // ------------------------------------------------------------------------
    // Restore
    // ------------------------------------------------------------------------

    /// What [`restore_entity`](Self::restore_entity) needs to put an
    /// instance entity back after it was removed
    pub fn entity_restore_info(&self, id: EntityId) -> Option<EntityRestoreInfo> {
        let address = self.composition_for_entity(id)?;
        let instance = self
            .find_composition(address.asset)?
            .find_instance(address.instance)?;
        let ancestor = *instance.entity_id_to_base_map().get(&id)?;
        Some(EntityRestoreInfo {
            asset: address.asset,
            instance: address.instance,
            ancestor,
            data_flags: instance.entity_data_flags(id).cloned().unwrap_or_default(),
        })
    }

    /// Put a removed entity back into its instance
    pub fn restore_entity(
        &mut self,
        ctx: &CompositionContext<'_>,
        entity: Entity,
        info: &EntityRestoreInfo,
    ) -> Result<InstanceAddress> {
        let id = entity.id;
        let registry = ctx.registry;
        self.add_or_get_reference(ctx, info.asset)?
            .restore_entity(registry, entity, info)?;
        let address = InstanceAddress {
            asset: info.asset,
            instance: info.instance,
        };
        if let Some(map) = &mut self.entity_info {
            map.insert(id, EntityOwner::Instance(address));
        }
        self.link_instance_metadata(address);
        Ok(address)
    }

    // ------------------------------------------------------------------------
    // Ids
    // ------------------------------------------------------------------------

    /// Give every entity of the component a new id
    ///
    /// Metadata entities keep their ids but references they hold are
    /// updated. Returns previous id to new id.
    pub fn generate_new_entity_ids(&mut self, registry: &TypeRegistry) -> EntityIdMap {
        let remapper = IdRemapper::new(registry);
        let mut map = EntityIdMap::new();
        {
            let mut objects: Vec<&mut dyn Reflected> = self
                .entities
                .iter_mut()
                .map(|e| e as &mut dyn Reflected)
                .collect();
            for instance in self.references.iter_mut().flat_map(|r| r.instances.iter_mut()) {
                if let Some(container) = instance.instantiated.as_mut() {
                    objects.extend(container.entities.iter_mut().map(|e| e as &mut dyn Reflected));
                }
            }
            remapper.generate_new_ids(&mut objects, &mut map, &mut |_| EntityId::generate());
        }

        let mut references = |id: EntityId, _: bool| map.map_or_keep(id);
        remapper.remap(&mut self.metadata_entity, RemapPass::References, &mut references);
        for instance in self.references.iter_mut().flat_map(|r| r.instances.iter_mut()) {
            if let Some(container) = instance.instantiated.as_mut() {
                for metadata in &mut container.metadata_entities {
                    remapper.remap(metadata, RemapPass::References, &mut references);
                }
            }
        }
        for instance in self.references.iter_mut().flat_map(|r| r.instances.iter_mut()) {
            instance.apply_new_ids(&map);
        }

        if self.entity_info.is_some() {
            self.rebuild_entity_info_map();
        }
        map
    }

    // ------------------------------------------------------------------------
    // Save and clone
    // ------------------------------------------------------------------------

    /// Capture every instance's edits in its data patch
    pub fn prepare_save(&mut self, registry: &TypeRegistry) -> bool {
        if !self.instantiated {
            return true;
        }
        let mut ok = true;
        for reference in &mut self.references {
            ok &= reference.compute_data_patch(registry);
        }
        self.clean_metadata_associations();
        ok
    }

    /// Deep copy of the component, instantiated entities included
    pub fn clone_component(&self, registry: &TypeRegistry) -> Result<CompositionComponent> {
        let cloner = Cloner::new(registry);
        let mut clone: CompositionComponent = cloner.clone_typed(self)?;
        clone.my_asset = self.my_asset;
        clone.instantiated = self.instantiated;
        clone.config = self.config;
        for source in &self.references {
            if let Some(copy) = clone.find_composition_mut(source.asset_id()) {
                copy.copy_runtime_from(source, &cloner)?;
            }
        }
        Ok(clone)
    }
}

fn set_metadata_parent(metadata: &mut Entity, parent: EntityId) {
    if let Some(info) = metadata.find_component_mut::<MetadataInfo>() {
        info.parent = parent;
    } else {
        metadata.add_component(MetadataInfo {
            parent,
            ..MetadataInfo::default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use void_asset::{AssetCatalog, AssetProvider};

    use crate::asset::CompositionAsset;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        crate::reflect(&mut registry);
        registry
    }

    fn catalog_with(name: &str, entities: &[&str]) -> (AssetCatalog<CompositionAsset>, AssetId) {
        let catalog = AssetCatalog::new();
        let id = AssetId::from_name(name);
        let mut component = CompositionComponent::new();
        for entity in entities {
            component.add_entity(Entity::new(*entity));
        }
        catalog.insert(id, name, CompositionAsset::new(id, component));
        (catalog, id)
    }

    #[test]
    fn test_entities_lists_instances_before_owned() {
        let registry = registry();
        let (catalog, asset) = catalog_with("a", &["ea"]);
        let ctx = CompositionContext::new(&registry, &catalog);

        let mut level = CompositionComponent::new();
        level.add_entity(Entity::new("e1"));
        level.add_composition(&ctx, asset, None).unwrap();
        assert!(level.instantiate(&ctx));

        let names: Vec<&str> = level.entities().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["ea", "e1"]);
        assert_eq!(level.metadata_entities().len(), 2);
        assert_eq!(level.metadata_entity().name, "No Asset Association");
    }

    #[test]
    fn test_add_same_asset_reuses_reference() {
        let registry = registry();
        let (catalog, asset) = catalog_with("a", &["ea"]);
        let ctx = CompositionContext::new(&registry, &catalog);

        let mut level = CompositionComponent::new();
        assert!(level.instantiate(&ctx));
        let first = level.add_composition(&ctx, asset, None).unwrap();
        let second = level.add_composition(&ctx, asset, None).unwrap();
        assert_eq!(level.references().len(), 1);
        assert_ne!(first.instance, second.instance);
        assert_eq!(level.entities().len(), 2);

        let ids = level.entity_ids();
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_metadata_hierarchy() {
        let registry = registry();
        let (catalog, asset) = catalog_with("a", &["ea"]);
        let ctx = CompositionContext::new(&registry, &catalog);

        let mut level = CompositionComponent::new();
        let owned = Entity::new("e1");
        let owned_id = owned.id;
        level.add_entity(owned);
        let address = level.add_composition(&ctx, asset, None).unwrap();
        assert!(level.instantiate(&ctx));

        let root = level.metadata_entity();
        let info = root.find_component::<MetadataInfo>().unwrap();
        let instance = level
            .find_composition(asset)
            .and_then(|r| r.find_instance(address.instance))
            .unwrap();
        assert_eq!(info.children, [instance.metadata_entity_id()]);
        assert!(info.is_associated(owned_id));

        let child = instance.metadata_entity().unwrap();
        assert_eq!(child.find_component::<MetadataInfo>().unwrap().parent, root.id);
    }

    #[test]
    fn test_remove_last_entity_removes_instance_and_reference() {
        let registry = registry();
        let (catalog, asset) = catalog_with("a", &["ea"]);
        let ctx = CompositionContext::new(&registry, &catalog);

        let mut level = CompositionComponent::new();
        level.add_composition(&ctx, asset, None).unwrap();
        assert!(level.instantiate(&ctx));

        let id = level.entity_ids()[0];
        assert!(level.composition_for_entity(id).is_some());
        let removed = level.remove_entity(id, true).unwrap();
        assert_eq!(removed.name, "ea");
        assert!(level.find_composition(asset).is_none());
        assert!(level.entities().is_empty());
        assert!(level
            .metadata_entity()
            .find_component::<MetadataInfo>()
            .unwrap()
            .children
            .is_empty());
    }

    #[test]
    fn test_restore_entity_into_removed_instance() {
        let registry = registry();
        let (catalog, asset) = catalog_with("a", &["ea"]);
        let ctx = CompositionContext::new(&registry, &catalog);

        let mut level = CompositionComponent::new();
        let address = level.add_composition(&ctx, asset, None).unwrap();
        assert!(level.instantiate(&ctx));

        let id = level.entity_ids()[0];
        let info = level.entity_restore_info(id).unwrap();
        assert_eq!(info.instance, address.instance);
        let removed = level.remove_entity(id, true).unwrap();
        assert!(level.find_composition(asset).is_none());

        let restored = level.restore_entity(&ctx, removed, &info).unwrap();
        assert_eq!(restored, address);
        assert_eq!(level.composition_for_entity(id), Some(address));
        assert_eq!(level.entity_restore_info(id).unwrap().ancestor, info.ancestor);
    }

    #[test]
    fn test_entity_info_map_tracks_owners() {
        let registry = registry();
        let (catalog, asset) = catalog_with("a", &["ea"]);
        let ctx = CompositionContext::new(&registry, &catalog);

        let mut level = CompositionComponent::new();
        let address = level.add_composition(&ctx, asset, None).unwrap();
        assert!(level.instantiate(&ctx));
        let instance_entity = level.entity_ids()[0];

        assert_eq!(
            level.entity_info_map().get(&instance_entity),
            Some(&EntityOwner::Instance(address))
        );
        let owned = Entity::new("late");
        let owned_id = owned.id;
        level.add_entity(owned);
        assert_eq!(level.entity_info_map().get(&owned_id), Some(&EntityOwner::Direct));
        assert_eq!(level.owner_of(owned_id), Some(EntityOwner::Direct));
    }

    #[test]
    fn test_generate_new_entity_ids_keeps_instances_consistent() {
        let registry = registry();
        let (catalog, asset) = catalog_with("a", &["ea"]);
        let ctx = CompositionContext::new(&registry, &catalog);

        let mut level = CompositionComponent::new();
        let owned = Entity::new("e1");
        let owned_id = owned.id;
        level.add_entity(owned);
        let address = level.add_composition(&ctx, asset, None).unwrap();
        assert!(level.instantiate(&ctx));
        let old_instance_entity = level
            .entity_ids()
            .into_iter()
            .find(|id| *id != owned_id)
            .unwrap();

        let map = level.generate_new_entity_ids(&registry);
        assert_eq!(map.len(), 2);
        let new_owned = map[&owned_id];
        let new_instance_entity = map[&old_instance_entity];
        assert!(level.find_entity(new_owned).is_some());
        assert!(level.find_entity(owned_id).is_none());

        let instance = level
            .find_composition(asset)
            .and_then(|r| r.find_instance(address.instance))
            .unwrap();
        assert!(instance.entity_id_map().values().any(|id| *id == new_instance_entity));
        assert!(instance.is_valid_entity(new_instance_entity));
        assert!(level
            .metadata_entity()
            .find_component::<MetadataInfo>()
            .unwrap()
            .is_associated(new_owned));
    }

    #[test]
    fn test_referenced_assets_recurse() {
        let registry = registry();
        let catalog: AssetCatalog<CompositionAsset> = AssetCatalog::new();
        let ctx = CompositionContext::new(&registry, &catalog);

        let leaf = AssetId::from_name("leaf");
        let mut leaf_component = CompositionComponent::new();
        leaf_component.add_entity(Entity::new("leaf"));
        catalog.insert(leaf, "leaf", CompositionAsset::new(leaf, leaf_component));

        let middle = AssetId::from_name("middle");
        let mut middle_component = CompositionComponent::new();
        middle_component.set_my_asset(Some(middle));
        middle_component.add_composition(&ctx, leaf, None).unwrap();
        catalog.insert(middle, "middle", CompositionAsset::new(middle, middle_component));

        let mut level = CompositionComponent::new();
        level.add_composition(&ctx, middle, None).unwrap();
        assert!(level.instantiate(&ctx));

        assert_eq!(level.referenced_assets(false), BTreeSet::from([middle]));
        assert_eq!(level.referenced_assets(true), BTreeSet::from([middle, leaf]));
        assert_eq!(level.entities().len(), 1);
        assert!(catalog
            .find_asset(middle)
            .and_then(|h| catalog.get(&h))
            .unwrap()
            .is_instantiated());
    }

    #[test]
    fn test_self_reference_is_refused() {
        let registry = registry();
        let catalog: AssetCatalog<CompositionAsset> = AssetCatalog::new();
        let ctx = CompositionContext::new(&registry, &catalog);

        let id = AssetId::from_name("self");
        let mut component = CompositionComponent::new();
        component.set_my_asset(Some(id));
        assert!(matches!(
            component.add_composition(&ctx, id, None),
            Err(CompositionError::CircularReference(_))
        ));
    }

    #[test]
    fn test_add_composition_updates_built_entity_info_map() {
        let registry = registry();
        let (catalog, asset) = catalog_with("a", &["ea"]);
        let ctx = CompositionContext::new(&registry, &catalog);

        let mut level = CompositionComponent::new();
        assert!(level.instantiate(&ctx));
        assert_eq!(level.entity_info_map().len(), 1);

        let address = level.add_composition(&ctx, asset, None).unwrap();
        let copy = level.entity_ids()[0];
        let map = level.entity_info.as_ref().unwrap();
        assert_eq!(map.get(&copy), Some(&EntityOwner::Instance(address)));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_failed_move_keeps_instance_in_source() {
        let registry = registry();
        let (catalog, asset) = catalog_with("a", &["ea"]);
        let ctx = CompositionContext::new(&registry, &catalog);

        let mut source = CompositionComponent::new();
        let address = source.add_composition(&ctx, asset, None).unwrap();
        let mut level = CompositionComponent::new();
        level.add_composition(&ctx, asset, None).unwrap();
        assert!(level.instantiate(&ctx));

        // The asset is busy, so the moved instance cannot be instantiated
        let shared = ctx.current_asset(asset).unwrap();
        let result = shared
            .with_component_mut(|_| level.add_instance_moved(&ctx, &mut source, address))
            .unwrap();
        assert!(matches!(result, Err(CompositionError::CircularReference(id)) if id == asset));
        assert!(source
            .find_composition(asset)
            .and_then(|r| r.find_instance(address.instance))
            .is_some());
        assert_eq!(level.find_composition(asset).unwrap().instances().len(), 1);

        let moved = level.add_instance_moved(&ctx, &mut source, address).unwrap();
        assert!(source.find_composition(asset).is_none());
        assert!(level
            .find_composition(asset)
            .and_then(|r| r.find_instance(moved.instance))
            .is_some_and(CompositionInstance::is_instantiated));
    }

    #[test]
    fn test_failed_move_drops_new_reference() {
        let registry = registry();
        let (catalog, _) = catalog_with("a", &["ea"]);
        let ctx = CompositionContext::new(&registry, &catalog);

        let missing = AssetId::from_name("missing");
        let mut source = CompositionComponent::new();
        let address = source.add_composition(&ctx, missing, None).unwrap();
        let mut level = CompositionComponent::new();
        assert!(level.instantiate(&ctx));

        assert!(level.add_instance_moved(&ctx, &mut source, address).is_err());
        assert!(level.references().is_empty());
        assert!(source
            .find_composition(missing)
            .and_then(|r| r.find_instance(address.instance))
            .is_some());
    }
}

//! Composition references
//!
//! A reference binds a component to one asset and owns every instance of
//! that asset inside the component.

use std::sync::Arc;

use log::{debug, log, warn};
use void_asset::AssetId;
use void_core::{EntityId, InstanceId};
use void_reflect::{impl_class, ClassSchema, Cloner, FlagsMap, Reflected, TypeRegistry};

use crate::asset::{CompositionAsset, CompositionContext};
use crate::component::EntityOwner;
use crate::config::CompositionConfig;
use crate::entity::{Entity, EntityIdMap, InstantiatedContainer};
use crate::error::{CompositionError, Result};
use crate::instance::{CompositionInstance, Staging};
use crate::remap::{IdMapper, IdRemapper};

/// Where an instance lives inside a component
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceAddress {
    pub asset: AssetId,
    pub instance: InstanceId,
}

/// One step of an entity's ancestry through nested assets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityAncestor {
    /// The entity inside the asset
    pub entity: EntityId,
    /// The instance the descendant entity belongs to
    pub address: InstanceAddress,
}

/// What it takes to put a removed entity back where it came from
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityRestoreInfo {
    pub asset: AssetId,
    pub instance: InstanceId,
    /// Baseline entity the removed entity was a copy of
    pub ancestor: EntityId,
    pub data_flags: FlagsMap,
}

/// A component's binding to one asset
#[derive(Default)]
pub struct CompositionReference {
    pub(crate) asset_id: AssetId,
    pub(crate) instances: Vec<CompositionInstance>,
    pub(crate) asset: Option<Arc<CompositionAsset>>,
    pub(crate) instantiated: bool,
}

impl_class!(CompositionReference, "CompositionReference");

impl CompositionReference {
    pub(crate) fn new(asset_id: AssetId) -> Self {
        Self {
            asset_id,
            ..Self::default()
        }
    }

    pub fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    /// Asset version the reference was instantiated from
    pub fn asset(&self) -> Option<&Arc<CompositionAsset>> {
        self.asset.as_ref()
    }

    pub fn instances(&self) -> &[CompositionInstance] {
        &self.instances
    }

    pub(crate) fn instances_mut(&mut self) -> &mut [CompositionInstance] {
        &mut self.instances
    }

    pub fn is_instantiated(&self) -> bool {
        self.instantiated
    }

    pub fn find_instance(&self, id: InstanceId) -> Option<&CompositionInstance> {
        self.instances.iter().find(|i| i.id() == id)
    }

    pub fn find_instance_mut(&mut self, id: InstanceId) -> Option<&mut CompositionInstance> {
        self.instances.iter_mut().find(|i| i.id() == id)
    }

    fn address(&self, instance: InstanceId) -> InstanceAddress {
        InstanceAddress {
            asset: self.asset_id,
            instance,
        }
    }

    fn resolved_asset(&self) -> Result<Arc<CompositionAsset>> {
        self.asset
            .clone()
            .ok_or(CompositionError::AssetNotReady(self.asset_id))
    }

    // ------------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------------

    /// Add an instance of the asset
    ///
    /// When the reference is instantiated the asset's entities are cloned
    /// right away, with ids from `custom_mapper` or freshly generated ones.
    pub fn create_instance(
        &mut self,
        registry: &TypeRegistry,
        custom_mapper: Option<&mut IdMapper<'_>>,
    ) -> Result<InstanceId> {
        let mut instance = CompositionInstance::new(InstanceId::generate());
        if self.instantiated {
            match custom_mapper {
                Some(new_id) => self.instantiate_fresh(registry, &mut instance, new_id)?,
                None => self.instantiate_fresh(registry, &mut instance, &mut |_| EntityId::generate())?,
            }
        }
        let id = instance.id();
        debug!("Created instance {:?} of asset {}", id, self.asset_id);
        self.instances.push(instance);
        Ok(id)
    }

    fn instantiate_fresh(
        &self,
        registry: &TypeRegistry,
        instance: &mut CompositionInstance,
        new_id: &mut IdMapper<'_>,
    ) -> Result<()> {
        let asset_id = self.asset_id;
        self.resolved_asset()?.with_component(|dependent| {
            instance.instantiate_fresh(registry, &Staging::of(asset_id, dependent), new_id)
        })?
    }

    /// Duplicate an instantiated instance under new entity ids
    ///
    /// `source_to_clone` receives the id of every cloned entity.
    pub fn clone_instance(
        &mut self,
        registry: &TypeRegistry,
        source: InstanceId,
        source_to_clone: &mut EntityIdMap,
    ) -> Result<InstanceId> {
        let original = self
            .find_instance(source)
            .ok_or(CompositionError::UnknownInstance {
                asset: self.asset_id,
                instance: source,
            })?;
        let container = original.instantiated().ok_or(CompositionError::NotInstantiated)?;

        let mut copy: InstantiatedContainer = Cloner::new(registry).clone_typed(container)?;
        IdRemapper::new(registry).generate_new_ids(
            &mut [&mut copy as &mut dyn Reflected],
            source_to_clone,
            &mut |_| EntityId::generate(),
        );

        let mut clone = CompositionInstance::new(InstanceId::generate());
        clone.data_patch = original.data_patch().clone();
        clone.entity_id_map = original
            .entity_id_map()
            .iter()
            .map(|(base, live)| (*base, source_to_clone.map_or_keep(*live)))
            .collect();
        clone.data_flags = original.data_flags().clone();
        clone.data_flags.remap_entities(source_to_clone);
        clone.metadata_entity = source_to_clone.map_or_keep(original.metadata_entity_id());
        clone.instantiated = Some(copy);

        let id = clone.id();
        self.instances.push(clone);
        Ok(id)
    }

    /// Adopt an instance moved out of another component
    pub(crate) fn adopt_instance(
        &mut self,
        registry: &TypeRegistry,
        mut instance: CompositionInstance,
    ) -> Result<InstanceId> {
        self.match_instantiation(registry, &mut instance)?;
        let id = instance.id();
        self.instances.push(instance);
        Ok(id)
    }

    /// Instantiate a detached instance if this reference is instantiated
    pub(crate) fn match_instantiation(
        &self,
        registry: &TypeRegistry,
        instance: &mut CompositionInstance,
    ) -> Result<()> {
        if self.instantiated && !instance.is_instantiated() {
            let asset_id = self.asset_id;
            self.resolved_asset()?.with_component(|dependent| {
                instance.instantiate(registry, &Staging::of(asset_id, dependent))
            })??;
        }
        Ok(())
    }

    pub fn remove_instance(&mut self, id: InstanceId) -> Option<CompositionInstance> {
        let index = self.instances.iter().position(|i| i.id() == id)?;
        Some(self.instances.remove(index))
    }

    /// Take an entity out of one of the instances
    pub fn remove_entity(&mut self, entity: EntityId, instance: InstanceId) -> Option<Entity> {
        self.find_instance_mut(instance)?.remove_entity(entity)
    }

    /// Put an entity back into the instance it was removed from
    ///
    /// The instance is recreated, holding only its metadata entities, if it
    /// is gone.
    pub(crate) fn restore_entity(
        &mut self,
        registry: &TypeRegistry,
        entity: Entity,
        info: &EntityRestoreInfo,
    ) -> Result<()> {
        let index = match self.instances.iter().position(|i| i.id() == info.instance) {
            Some(index) => index,
            None => {
                let mut instance = CompositionInstance::new(info.instance);
                let asset_id = self.asset_id;
                self.resolved_asset()?.with_component(|dependent| {
                    instance.instantiate_metadata_only(registry, &Staging::of(asset_id, dependent))
                })??;
                self.instances.push(instance);
                self.instances.len() - 1
            }
        };
        self.instances[index].restore_entity(entity, info.ancestor, &info.data_flags);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Instantiation
    // ------------------------------------------------------------------------

    /// Instantiate the asset and every instance
    ///
    /// Returns `true` right away if already instantiated. Failures are
    /// logged at the level `config` assigns them.
    pub fn instantiate(&mut self, ctx: &CompositionContext<'_>, config: &CompositionConfig) -> bool {
        match self.instantiate_checked(ctx, config) {
            Ok(()) => true,
            Err(err) => {
                log!(
                    config.failure_level(),
                    "Composition reference to asset {} failed to instantiate: {}",
                    self.asset_id,
                    err
                );
                false
            }
        }
    }

    pub fn instantiate_checked(&mut self, ctx: &CompositionContext<'_>, config: &CompositionConfig) -> Result<()> {
        if self.instantiated {
            return Ok(());
        }
        if !config.accepts(self.asset_id) {
            return Err(CompositionError::AssetRejected(self.asset_id));
        }
        let handle = ctx
            .assets
            .find_asset(self.asset_id)
            .ok_or(CompositionError::AssetNotFound(self.asset_id))?;
        if !ctx.assets.is_ready(&handle) {
            return Err(CompositionError::AssetNotReady(self.asset_id));
        }
        let asset = ctx
            .assets
            .get(&handle)
            .ok_or(CompositionError::AssetNotReady(self.asset_id))?;
        asset.instantiate_checked(ctx)?;

        let asset_id = self.asset_id;
        let instances = &mut self.instances;
        let result = asset
            .with_component(|dependent| {
                let staging = Staging::of(asset_id, dependent);
                instances
                    .iter_mut()
                    .try_for_each(|instance| instance.instantiate(ctx.registry, &staging))
            })
            .and_then(|result| result);

        match result {
            Ok(()) => {
                self.asset = Some(asset);
                self.instantiated = true;
                Ok(())
            }
            Err(err) => {
                self.uninstantiate();
                Err(err)
            }
        }
    }

    /// Drop the instantiated entities of every instance
    pub fn uninstantiate(&mut self) {
        for instance in &mut self.instances {
            instance.uninstantiate();
        }
        self.asset = None;
        self.instantiated = false;
    }

    // ------------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------------

    /// Store every instance's divergence from the asset in its data patch
    pub fn compute_data_patch(&mut self, registry: &TypeRegistry) -> bool {
        if !self.instantiated {
            return true;
        }
        let asset = match self.resolved_asset() {
            Ok(asset) => asset,
            Err(err) => {
                warn!("Cannot compute data patches: {}", err);
                return false;
            }
        };
        let asset_id = self.asset_id;
        let instances = &mut self.instances;
        let result = asset.with_component(|dependent| {
            let staging = Staging::of(asset_id, dependent);
            let mut ok = true;
            for instance in instances.iter_mut() {
                if let Err(err) = instance.compute_data_patch(registry, &staging) {
                    warn!(
                        "Data patch of instance {:?} of asset {} failed: {}",
                        instance.id(),
                        asset_id,
                        err
                    );
                    ok = false;
                }
            }
            ok
        });
        match result {
            Ok(ok) => ok,
            Err(err) => {
                warn!("Cannot compute data patches: {}", err);
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Ancestry
    // ------------------------------------------------------------------------

    /// Baseline entities `entity` descends from, nearest first
    ///
    /// Follows the entity through at most `max_levels` nested assets.
    pub fn instance_entity_ancestry(&self, entity: EntityId, max_levels: usize) -> Vec<EntityAncestor> {
        let mut ancestors = Vec::new();
        self.collect_ancestry(entity, max_levels, &mut ancestors);
        ancestors
    }

    fn collect_ancestry(&self, entity: EntityId, levels: usize, out: &mut Vec<EntityAncestor>) {
        if levels == 0 {
            return;
        }
        let Some(asset) = &self.asset else {
            return;
        };
        let Some((instance, base)) = self.instances.iter().find_map(|instance| {
            instance
                .entity_id_to_base_map()
                .get(&entity)
                .map(|base| (instance.id(), *base))
        }) else {
            return;
        };

        let address = self.address(instance);
        let traced = asset.with_component(|dependent| match dependent.owner_of(base) {
            None => {}
            Some(EntityOwner::Direct) => out.push(EntityAncestor { entity: base, address }),
            Some(EntityOwner::Instance(nested)) => {
                out.push(EntityAncestor { entity: base, address });
                if let Some(reference) = dependent.find_composition(nested.asset) {
                    reference.collect_ancestry(base, levels - 1, out);
                }
            }
        });
        if let Err(err) = traced {
            debug!("Ancestry of {} stops at asset {}: {}", entity, self.asset_id, err);
        }
    }

    // ------------------------------------------------------------------------
    // Cloning
    // ------------------------------------------------------------------------

    /// Copy runtime state that reflection does not carry
    pub(crate) fn copy_runtime_from(&mut self, source: &CompositionReference, cloner: &Cloner<'_>) -> Result<()> {
        self.asset = source.asset.clone();
        self.instantiated = source.instantiated;
        for original in &source.instances {
            let Some(copy) = self.find_instance_mut(original.id()) else {
                continue;
            };
            copy.metadata_entity = original.metadata_entity;
            copy.instantiated = match original.instantiated() {
                Some(container) => Some(cloner.clone_typed(container)?),
                None => None,
            };
        }
        Ok(())
    }
}

pub(crate) fn reflect(registry: &mut TypeRegistry) {
    registry.register_class(
        ClassSchema::builder::<CompositionReference>()
            .field("Instances", |r| &r.instances, |r| &mut r.instances)
            .field("Asset", |r| &r.asset_id, |r| &mut r.asset_id)
            .persistent_id(|r| r.asset_id.id())
            .build(),
    );
}

//! Data flags of the entities of one instance
//!
//! Flags are stored per live entity id with addresses relative to the
//! entity. Patch operations need them relative to the instantiated
//! container and keyed by baseline ids, see [`DataFlagsPerEntity::for_patching`].

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};
use void_core::EntityId;
use void_reflect::{
    address_resolves, impl_class, name_hash, DataAddress, DataPatchFlags, FlagsMap, TypeRegistry,
};

use crate::entity::{Entity, EntityIdMap};

/// First address component of every entity in a patched container
pub const ENTITIES_KEY: u64 = name_hash("Entities") as u64;

/// Address of `address` inside the entity `entity` of a patched container
pub fn container_address(entity: EntityId, address: &[u64]) -> DataAddress {
    let mut full = Vec::with_capacity(address.len() + 2);
    full.push(ENTITIES_KEY);
    full.push(entity.raw());
    full.extend_from_slice(address);
    full
}

/// Stored form of the flags of one entity
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredFlags {
    pub entity: EntityId,
    #[serde(with = "void_reflect::patch::address_map")]
    pub flags: FlagsMap,
}

/// Data flags keyed by entity id
///
/// Zero flags and entities without flags are never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<StoredFlags>", into = "Vec<StoredFlags>")]
pub struct DataFlagsPerEntity {
    entities: BTreeMap<EntityId, FlagsMap>,
}

impl_class!(DataFlagsPerEntity, "DataFlagsPerEntity");

impl From<Vec<StoredFlags>> for DataFlagsPerEntity {
    fn from(stored: Vec<StoredFlags>) -> Self {
        let mut flags = Self::default();
        for entry in stored {
            flags.set_entity_flags(entry.entity, entry.flags);
        }
        flags
    }
}

impl From<DataFlagsPerEntity> for Vec<StoredFlags> {
    fn from(flags: DataFlagsPerEntity) -> Self {
        flags
            .entities
            .into_iter()
            .map(|(entity, flags)| StoredFlags { entity, flags })
            .collect()
    }
}

impl DataFlagsPerEntity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_flags(&self, entity: EntityId) -> Option<&FlagsMap> {
        self.entities.get(&entity)
    }

    /// Replace every flag of an entity
    pub fn set_entity_flags(&mut self, entity: EntityId, mut flags: FlagsMap) {
        flags.retain(|_, value| !value.is_empty());
        if flags.is_empty() {
            self.entities.remove(&entity);
        } else {
            self.entities.insert(entity, flags);
        }
    }

    pub fn clear_entity_flags(&mut self, entity: EntityId) -> bool {
        self.entities.remove(&entity).is_some()
    }

    pub fn flags_at(&self, entity: EntityId, address: &[u64]) -> DataPatchFlags {
        self.entities
            .get(&entity)
            .and_then(|flags| flags.get(address))
            .copied()
            .unwrap_or_default()
    }

    /// Set the flags of one address; zero flags erase the entry
    pub fn set_at(&mut self, entity: EntityId, address: &[u64], flags: DataPatchFlags) {
        if flags.is_empty() {
            if let Some(entity_flags) = self.entities.get_mut(&entity) {
                entity_flags.remove(address);
                if entity_flags.is_empty() {
                    self.entities.remove(&entity);
                }
            }
        } else {
            self.entities
                .entry(entity)
                .or_default()
                .insert(address.to_vec(), flags);
        }
    }

    /// Drop the flags of entities `keep` rejects
    pub fn retain_entities(&mut self, mut keep: impl FnMut(EntityId) -> bool) {
        self.entities.retain(|entity, _| {
            let kept = keep(*entity);
            if !kept {
                debug!("Dropping data flags of missing entity {}", entity);
            }
            kept
        });
    }

    /// Drop flags of entities no longer present and addresses that no
    /// longer resolve inside their entity
    pub fn cleanup(&mut self, registry: &TypeRegistry, entities: &[Entity]) {
        let by_id: BTreeMap<EntityId, &Entity> = entities.iter().map(|e| (e.id, e)).collect();
        self.retain_entities(|entity| by_id.contains_key(&entity));
        for (entity_id, flags) in &mut self.entities {
            let entity = by_id[entity_id];
            flags.retain(|address, _| {
                let resolves = address_resolves(registry, entity, address);
                if !resolves {
                    debug!("Dropping data flags of {} at stale address {:?}", entity_id, address);
                }
                resolves
            });
        }
        self.entities.retain(|_, flags| !flags.is_empty());
    }

    /// Move flags to the new ids of their entities
    pub fn remap_entities(&mut self, map: &EntityIdMap) {
        self.entities = std::mem::take(&mut self.entities)
            .into_iter()
            .map(|(entity, flags)| (map.map_or_keep(entity), flags))
            .collect();
    }

    /// Flags addressed inside a patched container, keyed by baseline ids
    ///
    /// `map` is the baseline to live id map of the instance owning the flags.
    pub fn for_patching(&self, map: &EntityIdMap) -> FlagsMap {
        let mut patching = FlagsMap::new();
        for (base, live) in map.iter() {
            if let Some(flags) = self.entities.get(live) {
                for (address, value) in flags {
                    patching.insert(container_address(*base, address), *value);
                }
            }
        }
        patching
    }

    /// Flags addressed inside a container, keyed by live ids
    ///
    /// An instance of this instance's asset sees these ids as baseline ids.
    pub fn for_container(&self) -> FlagsMap {
        self.entities
            .iter()
            .flat_map(|(entity, flags)| {
                flags
                    .iter()
                    .map(move |(address, value)| (container_address(*entity, address), *value))
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &FlagsMap)> {
        self.entities.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }
}

pub(crate) fn reflect(registry: &mut TypeRegistry) {
    registry.register_leaf::<DataFlagsPerEntity>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::MetadataInfo;

    fn address(names: &[&str]) -> DataAddress {
        names.iter().map(|n| u64::from(name_hash(n))).collect()
    }

    #[test]
    fn test_zero_flags_are_erased() {
        let mut flags = DataFlagsPerEntity::new();
        let entity = EntityId::from_raw(5);
        let name = address(&["Name"]);

        flags.set_at(entity, &name, DataPatchFlags::FORCE_OVERRIDE_SET);
        assert_eq!(flags.flags_at(entity, &name), DataPatchFlags::FORCE_OVERRIDE_SET);

        flags.set_at(entity, &name, DataPatchFlags::NONE);
        assert!(flags.is_empty());

        let mut map = FlagsMap::new();
        map.insert(name.clone(), DataPatchFlags::NONE);
        flags.set_entity_flags(entity, map);
        assert!(flags.entity_flags(entity).is_none());
    }

    #[test]
    fn test_patching_addresses_use_baseline_ids() {
        let mut flags = DataFlagsPerEntity::new();
        let base = EntityId::from_raw(1);
        let live = EntityId::from_raw(100);
        let name = address(&["Name"]);
        flags.set_at(live, &name, DataPatchFlags::PREVENT_OVERRIDE_SET);

        let map: EntityIdMap = [(base, live)].into_iter().collect();
        let patching = flags.for_patching(&map);
        assert_eq!(
            patching.get(&container_address(base, &name)),
            Some(&DataPatchFlags::PREVENT_OVERRIDE_SET)
        );
        assert!(flags.for_container().contains_key(&container_address(live, &name)));
    }

    #[test]
    fn test_cleanup_drops_missing_entities_and_stale_addresses() {
        let mut registry = TypeRegistry::new();
        crate::entity::reflect(&mut registry);

        let entity = Entity::new("kept").with_component(MetadataInfo::default());
        let gone = EntityId::from_raw(999);
        let mut flags = DataFlagsPerEntity::new();
        flags.set_at(entity.id, &address(&["Name"]), DataPatchFlags::FORCE_OVERRIDE_SET);
        flags.set_at(entity.id, &address(&["Missing"]), DataPatchFlags::FORCE_OVERRIDE_SET);
        flags.set_at(gone, &address(&["Name"]), DataPatchFlags::FORCE_OVERRIDE_SET);

        flags.cleanup(&registry, std::slice::from_ref(&entity));
        assert_eq!(flags.len(), 1);
        assert_eq!(flags.entity_flags(entity.id).unwrap().len(), 1);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut flags = DataFlagsPerEntity::new();
        flags.set_at(EntityId::from_raw(3), &address(&["Name"]), DataPatchFlags::HIDE_PROPERTY_SET);
        let bytes = bincode::serialize(&flags).unwrap();
        let back: DataFlagsPerEntity = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, flags);
    }
}

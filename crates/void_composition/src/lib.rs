//! # void_composition - Composed Entity Graphs
//!
//! Reusable entity graphs stored as assets and instantiated into other
//! graphs:
//! - **References and instances**: any number of copies of an asset per
//!   component, each with its own entity ids
//! - **Data patches**: per-instance edits saved as diffs against the asset,
//!   modulated by per-entity data flags
//! - **Nesting**: assets compose other assets; instantiation recurses under
//!   a re-entrant lock and detects cycles
//! - **Failure policy**: failing references are stripped (partial) or roll
//!   the whole component back (strict)
//! - **Hot reload**: components are rebuilt against replaced assets without
//!   touching the live copy
//!
//! ## Example
//!
//! ```ignore
//! use void_composition::prelude::*;
//!
//! let mut registry = TypeRegistry::new();
//! void_composition::reflect(&mut registry);
//!
//! let catalog = AssetCatalog::new();
//! catalog.insert(house_id, "house", CompositionAsset::new(house_id, house));
//! let ctx = CompositionContext::new(&registry, &catalog);
//!
//! let mut level = CompositionComponent::new();
//! let address = level.add_composition(&ctx, house_id, None)?;
//! if level.instantiate(&ctx) {
//!     let bytes = level.save_document(&registry, ObjectStreamConfig::binary())?;
//! }
//! ```

pub mod asset;
pub mod component;
pub mod config;
pub mod data_flags;
pub mod document;
pub mod entity;
pub mod error;
pub mod instance;
pub mod reference;
pub mod reload;
pub mod remap;

pub use asset::{CompositionAsset, CompositionContext};
pub use component::{CompositionComponent, EntityOwner};
pub use config::CompositionConfig;
pub use data_flags::{container_address, DataFlagsPerEntity, ENTITIES_KEY};
pub use document::COMPONENT_VERSION;
pub use entity::{Entity, EntityIdMap, InstantiatedContainer, MetadataInfo};
pub use error::{CompositionError, Result};
pub use instance::CompositionInstance;
pub use reference::{CompositionReference, EntityAncestor, EntityRestoreInfo, InstanceAddress};
pub use reload::propagate_reloads;
pub use remap::{IdMapper, IdRemapper, RemapPass};

use void_reflect::{Class, TypeRegistry};

/// Register every composition class
///
/// Registering twice is a no-op.
pub fn reflect(registry: &mut TypeRegistry) {
    if registry.find_class(CompositionComponent::CLASS_ID).is_some() {
        return;
    }
    void_asset::reflect(registry);
    entity::reflect(registry);
    data_flags::reflect(registry);
    instance::reflect(registry);
    reference::reflect(registry);
    document::reflect(registry);
    log::debug!("Registered composition classes");
}

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::asset::{CompositionAsset, CompositionContext};
    pub use crate::component::{CompositionComponent, EntityOwner};
    pub use crate::config::CompositionConfig;
    pub use crate::entity::{Entity, EntityIdMap, MetadataInfo};
    pub use crate::error::CompositionError;
    pub use crate::reference::{CompositionReference, InstanceAddress};
    pub use crate::reload::propagate_reloads;
    pub use void_asset::prelude::*;
    pub use void_reflect::prelude::*;
}

#[cfg(test)]
mod tests {
    use super::*;
    use void_asset::AssetId;

    #[test]
    fn test_reflect_twice() {
        let mut registry = TypeRegistry::new();
        reflect(&mut registry);
        reflect(&mut registry);
        assert!(registry.find_class(CompositionComponent::CLASS_ID).is_some());
        assert!(registry.find_class(CompositionInstance::CLASS_ID).is_some());
        assert!(registry.find_class(AssetId::CLASS_ID).is_some());
    }
}

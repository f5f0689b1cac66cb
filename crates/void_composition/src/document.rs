//! Composition documents
//!
//! A document is a saved [`CompositionComponent`]: the directly owned
//! entities, the references with their instances, the dynamic flag and the
//! metadata entity. Instances persist their id map, data patch and data
//! flags; their entities are rebuilt on instantiation.

use log::{debug, warn};
use void_reflect::{
    ClassSchema, DataElementNode, ErrorHandler, ObjectStream, ObjectStreamConfig, TypeRegistry,
};

use crate::component::CompositionComponent;
use crate::config::CompositionConfig;
use crate::error::Result;

/// Current document version of [`CompositionComponent`]
pub const COMPONENT_VERSION: u32 = 2;

impl CompositionComponent {
    /// Save the component, capturing instance edits first
    pub fn save_document(&mut self, registry: &TypeRegistry, format: ObjectStreamConfig) -> Result<Vec<u8>> {
        if !self.prepare_save(registry) {
            warn!("Saving component with instances that failed to compute their data patch");
        }
        let mut errors = ErrorHandler::new();
        let bytes = ObjectStream::with_config(registry, format).save(&*self, &mut errors)?;
        if errors.error_count() > 0 {
            warn!("Component saved with {} error(s): {:?}", errors.error_count(), errors.errors());
        }
        Ok(bytes)
    }

    /// Load a saved component
    ///
    /// Loading is best effort: parts that fail are reported and skipped.
    /// The result is not instantiated.
    pub fn load_document(
        registry: &TypeRegistry,
        bytes: &[u8],
        format: ObjectStreamConfig,
        config: CompositionConfig,
    ) -> Result<CompositionComponent> {
        let mut errors = ErrorHandler::new();
        let mut component = ObjectStream::with_config(registry, format)
            .with_filter(config.filter)
            .load_typed::<CompositionComponent>(bytes, &mut errors)?;
        if errors.error_count() > 0 || errors.warning_count() > 0 {
            warn!(
                "Component loaded with {} error(s) and {} warning(s)",
                errors.error_count(),
                errors.warning_count()
            );
        }
        component.config = config;
        Ok(component)
    }
}

/// Version 1 stored the references as "Prefabs"
fn convert_component(_registry: &TypeRegistry, node: &mut DataElementNode) -> bool {
    if node.version < 2 {
        if let Some(references) = node.child_mut("Prefabs") {
            debug!("Renaming stored Prefabs to References");
            references.rename("References");
        }
    }
    true
}

pub(crate) fn reflect(registry: &mut TypeRegistry) {
    registry.register_class(
        ClassSchema::builder::<CompositionComponent>()
            .version(COMPONENT_VERSION, Some(convert_component))
            .field("Entities", |c| &c.entities, |c| &mut c.entities)
            .field("References", |c| &c.references, |c| &mut c.references)
            .field("IsDynamic", |c| &c.is_dynamic, |c| &mut c.is_dynamic)
            .field("MetadataEntity", |c| &c.metadata_entity, |c| &mut c.metadata_entity)
            .build(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use void_asset::AssetId;
    use void_reflect::StreamDocument;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        crate::reflect(&mut registry);
        registry
    }

    #[test]
    fn test_round_trip_keeps_owned_entities_and_references() {
        let registry = registry();
        let mut component = CompositionComponent::new();
        component.add_entity(Entity::new("e1"));
        component.set_dynamic(true);
        component
            .references
            .push(crate::reference::CompositionReference::new(AssetId::from_name("a")));

        let bytes = component
            .save_document(&registry, ObjectStreamConfig::binary())
            .unwrap();
        let loaded = CompositionComponent::load_document(
            &registry,
            &bytes,
            ObjectStreamConfig::binary(),
            CompositionConfig::strict(),
        )
        .unwrap();

        assert!(loaded.is_dynamic());
        assert!(!loaded.is_instantiated());
        assert!(!loaded.config().allow_partial_instantiation);
        assert_eq!(loaded.directly_owned_entities()[0].name, "e1");
        assert_eq!(loaded.metadata_entity().id, component.metadata_entity().id);
        assert!(loaded.find_composition(AssetId::from_name("a")).is_some());
    }

    #[test]
    fn test_version_one_documents_are_converted() {
        let registry = registry();
        let mut component = CompositionComponent::new();
        component
            .references
            .push(crate::reference::CompositionReference::new(AssetId::from_name("old")));
        let bytes = component
            .save_document(&registry, ObjectStreamConfig::binary())
            .unwrap();

        let stream = ObjectStream::with_config(&registry, ObjectStreamConfig::binary());
        let mut document: StreamDocument = stream.decode_document(&bytes).unwrap();
        document.root.version = 1;
        document.root.child_mut("References").unwrap().rename("Prefabs");
        let old = stream.encode_document(&document).unwrap();

        let loaded = CompositionComponent::load_document(
            &registry,
            &old,
            ObjectStreamConfig::binary(),
            CompositionConfig::default(),
        )
        .unwrap();
        assert!(loaded.find_composition(AssetId::from_name("old")).is_some());
    }
}

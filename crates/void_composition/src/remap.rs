//! Entity id remapping
//!
//! Walks reflected graphs and rewrites every [`EntityId`] it finds. An id
//! held by an identity field (the `Id` of an [`Entity`](crate::Entity)) is
//! the identity of that entity; every other id is a reference. Identities
//! are always rewritten before references so a reference can point at an
//! entity visited later in the walk.

use log::warn;
use void_core::EntityId;
use void_reflect::{AccessFlags, ErrorHandler, FieldDescriptor, ObjectWalker, Reflected, TypeRegistry};

use crate::entity::EntityIdMap;

/// Caller supplied id generator, given the id being replaced
pub type IdMapper<'a> = dyn FnMut(EntityId) -> EntityId + 'a;

/// Which ids a pass rewrites
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemapPass {
    Identities,
    References,
    All,
}

impl RemapPass {
    fn includes(self, is_identity: bool) -> bool {
        match self {
            RemapPass::Identities => is_identity,
            RemapPass::References => !is_identity,
            RemapPass::All => true,
        }
    }
}

/// Rewrites entity ids through the object walker
pub struct IdRemapper<'r> {
    walker: ObjectWalker<'r>,
}

impl<'r> IdRemapper<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            walker: ObjectWalker::new(registry, AccessFlags::READ | AccessFlags::WRITE),
        }
    }

    /// Rewrite the ids selected by `pass`
    ///
    /// `mapper` receives each valid id and whether it is an identity.
    /// Invalid ids are left alone. Returns how many ids were visited.
    pub fn remap(
        &self,
        object: &mut dyn Reflected,
        pass: RemapPass,
        mapper: &mut dyn FnMut(EntityId, bool) -> EntityId,
    ) -> usize {
        let mut visited = 0;
        let mut errors = ErrorHandler::new();
        let class_id = object.class_id();
        self.walker.enumerate_mut(
            object,
            class_id,
            &mut |node, _schema, field| {
                let Some(id) = node.downcast_mut::<EntityId>() else {
                    return true;
                };
                let is_identity = field.map_or(false, FieldDescriptor::is_identity);
                if id.is_valid() && pass.includes(is_identity) {
                    *id = mapper(*id, is_identity);
                    visited += 1;
                }
                false
            },
            &mut || true,
            &mut errors,
        );
        if errors.error_count() > 0 {
            warn!(
                "Id remapping skipped {} unreadable node(s): {:?}",
                errors.error_count(),
                errors.errors()
            );
        }
        visited
    }

    /// Rewrite identities and references in one walk
    pub fn replace_ids_and_refs(
        &self,
        object: &mut dyn Reflected,
        mut mapper: impl FnMut(EntityId, bool) -> EntityId,
    ) -> usize {
        self.remap(object, RemapPass::All, &mut mapper)
    }

    /// Rewrite every id found through `map`, keeping unmapped ids
    pub fn apply_map(&self, object: &mut dyn Reflected, map: &EntityIdMap) -> usize {
        self.remap(object, RemapPass::All, &mut |id, _| map.map_or_keep(id))
    }

    /// Give every identity in `objects` a new id and fix the references
    ///
    /// `map` receives `old -> new` for every identity; identities already in
    /// `map` reuse their entry. References to ids without an identity in
    /// `objects` are kept as they are.
    pub fn generate_new_ids(
        &self,
        objects: &mut [&mut dyn Reflected],
        map: &mut EntityIdMap,
        new_id: &mut IdMapper<'_>,
    ) {
        for object in objects.iter_mut() {
            self.remap(&mut **object, RemapPass::Identities, &mut |id, _| {
                *map.entry(id).or_insert_with(|| new_id(id))
            });
        }
        for object in objects.iter_mut() {
            self.remap(&mut **object, RemapPass::References, &mut |id, _| {
                map.map_or_keep(id)
            });
        }
    }

    /// Map identities through `map`, extending it for new identities
    ///
    /// Used when a stored map meets a baseline that gained entities. References
    /// are rewritten through the extended map afterwards.
    pub fn extend_and_apply(
        &self,
        object: &mut dyn Reflected,
        map: &mut EntityIdMap,
        new_id: &mut IdMapper<'_>,
    ) {
        self.remap(object, RemapPass::Identities, &mut |id, _| {
            *map.entry(id).or_insert_with(|| new_id(id))
        });
        self.remap(object, RemapPass::References, &mut |id, _| map.map_or_keep(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, InstantiatedContainer};
    use std::collections::BTreeSet;
    use void_reflect::{impl_class, ClassSchema};

    #[derive(Default)]
    struct Link {
        target: EntityId,
    }
    impl_class!(Link, "RemapTestLink");

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        crate::entity::reflect(&mut registry);
        registry.register_class(
            ClassSchema::builder::<Link>()
                .field("target", |l| &l.target, |l| &mut l.target)
                .build(),
        );
        registry
    }

    fn linked_pair() -> (InstantiatedContainer, EntityId, EntityId) {
        let b = Entity::new("b");
        let b_id = b.id;
        // Forward reference: a is walked before b's identity
        let a = Entity::new("a").with_component(Link { target: b_id });
        let a_id = a.id;
        (
            InstantiatedContainer {
                entities: vec![a, b],
                metadata_entities: Vec::new(),
            },
            a_id,
            b_id,
        )
    }

    #[test]
    fn test_generate_new_ids_fixes_forward_references() {
        let registry = registry();
        let (mut container, a_id, b_id) = linked_pair();
        let mut map = EntityIdMap::new();
        IdRemapper::new(&registry).generate_new_ids(
            &mut [&mut container as &mut dyn Reflected],
            &mut map,
            &mut |_| EntityId::generate(),
        );

        let new_a = map[&a_id];
        let new_b = map[&b_id];
        assert_ne!(new_a, a_id);
        assert_ne!(new_b, b_id);
        assert_eq!(container.entities[0].id, new_a);
        assert_eq!(container.entities[1].id, new_b);
        assert_eq!(container.entities[0].find_component::<Link>().unwrap().target, new_b);

        let distinct: BTreeSet<_> = map.values().collect();
        assert_eq!(distinct.len(), map.len());
    }

    #[test]
    fn test_unmapped_references_are_kept() {
        let registry = registry();
        let outside = EntityId::from_raw(77);
        let mut entity = Entity::new("a").with_component(Link { target: outside });
        let mut map = EntityIdMap::new();
        IdRemapper::new(&registry).generate_new_ids(
            &mut [&mut entity as &mut dyn Reflected],
            &mut map,
            &mut |_| EntityId::generate(),
        );
        assert_eq!(map.len(), 1);
        assert_eq!(entity.find_component::<Link>().unwrap().target, outside);
    }

    #[test]
    fn test_passes_select_ids() {
        let registry = registry();
        let (mut container, a_id, b_id) = linked_pair();
        let remapper = IdRemapper::new(&registry);

        let identities = remapper.remap(&mut container, RemapPass::Identities, &mut |id, is_identity| {
            assert!(is_identity);
            id
        });
        assert_eq!(identities, 2);

        let shifted = EntityId::from_raw(b_id.raw() ^ 1);
        remapper.remap(&mut container, RemapPass::References, &mut |_, _| shifted);
        assert_eq!(container.entities[0].id, a_id);
        assert_eq!(container.entities[0].find_component::<Link>().unwrap().target, shifted);
    }

    #[test]
    fn test_extend_keeps_existing_entries() {
        let registry = registry();
        let (mut container, a_id, b_id) = linked_pair();
        let kept = EntityId::from_raw(1000);
        let mut map: EntityIdMap = [(a_id, kept)].into_iter().collect();

        IdRemapper::new(&registry).extend_and_apply(&mut container, &mut map, &mut |_| {
            EntityId::generate()
        });
        assert_eq!(container.entities[0].id, kept);
        assert_eq!(map.len(), 2);
        assert_eq!(container.entities[1].id, map[&b_id]);
    }
}

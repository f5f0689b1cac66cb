//! Deep copies of reflected graphs
//!
//! The cloner walks source and destination in lockstep. Destination nodes
//! are allocated through class factories, leaves are copied by their codec.
//! When cloning into a non-empty container whose elements have a persistent
//! identity, elements are matched by that identity instead of by position.

use std::collections::HashMap;

use void_core::ClassId;

use crate::class::{Class, Reflected};
use crate::container::ContainerAdapter;
use crate::error::{ReflectError, Result};
use crate::registry::TypeRegistry;
use crate::schema::ClassSchema;

/// Deep-copies objects using registry schemas
pub struct Cloner<'r> {
    registry: &'r TypeRegistry,
}

impl<'r> Cloner<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self { registry }
    }

    /// Clone into a brand-new object
    pub fn clone_object(&self, source: &dyn Reflected) -> Result<Box<dyn Reflected>> {
        let schema = self.schema_of(source.class_id())?;
        let mut target = schema.create().ok_or_else(|| ReflectError::NoFactory {
            name: schema.name().to_string(),
            id: schema.id(),
        })?;
        self.clone_into(source, &mut *target, schema)?;
        Ok(target)
    }

    /// Clone into a new object of a known class
    pub fn clone_typed<T: Class>(&self, source: &T) -> Result<T> {
        let mut target = T::default();
        self.clone_object_inplace(source, &mut target)?;
        Ok(target)
    }

    /// Overwrite `target` with a copy of `source`
    ///
    /// Both objects must be of the same class.
    pub fn clone_object_inplace(&self, source: &dyn Reflected, target: &mut dyn Reflected) -> Result<()> {
        if source.class_id() != target.class_id() {
            return Err(ReflectError::ClassMismatch {
                expected: target.class_id(),
                found: source.class_id(),
            });
        }
        let schema = self.schema_of(source.class_id())?;
        self.clone_into(source, target, schema)
    }

    fn schema_of(&self, id: ClassId) -> Result<&'r ClassSchema> {
        self.registry
            .find_class(id)
            .ok_or(ReflectError::UnknownClass(id))
    }

    fn clone_into(
        &self,
        source: &dyn Reflected,
        target: &mut dyn Reflected,
        schema: &ClassSchema,
    ) -> Result<()> {
        if let Some(handler) = schema.event_handler() {
            handler.on_read_begin(source);
            handler.on_write_begin(target);
        }

        let result = if let Some(codec) = schema.codec() {
            codec.copy(source, target)
        } else if let Some(container) = schema.container() {
            self.clone_container(source, target, container)
        } else {
            self.clone_fields(source, target, schema)
        };

        if let Some(handler) = schema.event_handler() {
            handler.on_read_end(source);
            handler.on_write_end(target);
        }
        result
    }

    fn clone_fields(
        &self,
        source: &dyn Reflected,
        target: &mut dyn Reflected,
        schema: &ClassSchema,
    ) -> Result<()> {
        for field in schema.fields() {
            if field.is_pointer() {
                let cloned = match field.get(source) {
                    Some(object) => Some(self.clone_object(object)?),
                    None => None,
                };
                field.set_pointer(target, cloned);
                continue;
            }

            let (Some(from), Some(to)) = (field.get(source), field.get_mut(target)) else {
                continue;
            };
            let field_schema = self.schema_of(field.class_id())?;
            self.clone_into(from, to, field_schema)?;
        }
        Ok(())
    }

    fn persistent_id_of(&self, element: &dyn Reflected) -> Option<u64> {
        self.registry
            .find_class(element.class_id())
            .and_then(|schema| schema.persistent_id(element))
    }

    fn clone_container(
        &self,
        source: &dyn Reflected,
        target: &mut dyn Reflected,
        container: &dyn ContainerAdapter,
    ) -> Result<()> {
        let source_len = container.size(source);
        let target_len = container.size(target);

        let mergeable = target_len > 0
            && (0..target_len).all(|i| {
                container
                    .element(target, i)
                    .and_then(|e| self.persistent_id_of(e))
                    .is_some()
            });

        if !mergeable {
            container.clear_elements(target);
            for index in 0..source_len {
                if let Some(element) = container.element(source, index) {
                    self.append_clone(element, target, container)?;
                }
            }
            return Ok(());
        }

        // Merge by persistent identity
        let mut by_key: HashMap<u64, usize> = HashMap::new();
        for index in 0..target_len {
            if let Some(key) = container
                .element(target, index)
                .and_then(|e| self.persistent_id_of(e))
            {
                by_key.insert(key, index);
            }
        }

        let mut kept = vec![false; target_len];
        for index in 0..source_len {
            let Some(element) = container.element(source, index) else {
                continue;
            };
            let matched = self
                .persistent_id_of(element)
                .and_then(|key| by_key.get(&key).copied());
            match matched {
                Some(slot) => {
                    kept[slot] = true;
                    let same_class = container
                        .element(target, slot)
                        .map(|existing| existing.class_id() == element.class_id())
                        .unwrap_or(false);
                    if same_class {
                        if let Some(existing) = container.element_mut(target, slot) {
                            let schema = self.schema_of(element.class_id())?;
                            self.clone_into(element, existing, schema)?;
                        }
                    } else {
                        let cloned = self.clone_object(element)?;
                        container
                            .replace_element(target, slot, cloned)
                            .map_err(|_| ReflectError::ContainerMismatch(type_name(element)))?;
                    }
                }
                None => self.append_clone(element, target, container)?,
            }
        }

        for index in (0..target_len).rev() {
            if !kept[index] {
                container.remove_element(target, index);
            }
        }
        Ok(())
    }

    fn append_clone(
        &self,
        element: &dyn Reflected,
        target: &mut dyn Reflected,
        container: &dyn ContainerAdapter,
    ) -> Result<()> {
        if !container.element_is_pointer() {
            if let Some(slot) = container.reserve_element(target) {
                let schema = self.schema_of(element.class_id())?;
                return self.clone_into(element, slot, schema);
            }
        }
        let cloned = self.clone_object(element)?;
        container
            .store_element(target, cloned)
            .map_err(|_| ReflectError::ContainerMismatch(type_name(element)))
    }
}

fn type_name(element: &dyn Reflected) -> String {
    element.class_id().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ANY_CLASS_ID;

    #[derive(Default, Debug, PartialEq)]
    struct Item {
        key: u64,
        amount: i32,
    }
    crate::impl_class!(Item, "CloneTestItem");

    #[derive(Default)]
    struct Bag {
        name: String,
        items: Vec<Item>,
        special: Option<Box<dyn Reflected>>,
    }
    crate::impl_class!(Bag, "CloneTestBag");

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry
            .register_class(
                ClassSchema::builder::<Item>()
                    .identity_field("key", |i| &i.key, |i| &mut i.key)
                    .field("amount", |i| &i.amount, |i| &mut i.amount)
                    .persistent_id(|i| i.key)
                    .build(),
            )
            .register_class(
                ClassSchema::builder::<Bag>()
                    .field("name", |b| &b.name, |b| &mut b.name)
                    .field("items", |b| &b.items, |b| &mut b.items)
                    .pointer_field("special", ANY_CLASS_ID, |b| &b.special, |b| &mut b.special)
                    .build(),
            );
        registry
    }

    fn bag() -> Bag {
        Bag {
            name: "bag".into(),
            items: vec![Item { key: 1, amount: 10 }, Item { key: 2, amount: 20 }],
            special: Some(Box::new(Item { key: 9, amount: 90 })),
        }
    }

    #[test]
    fn test_clone_object_is_deep_and_equal() {
        let registry = registry();
        let cloner = Cloner::new(&registry);
        let source = bag();

        let copy = cloner.clone_object(&source).unwrap();
        let copy = copy.downcast_ref::<Bag>().unwrap();
        assert_eq!(copy.name, "bag");
        assert_eq!(copy.items, source.items);
        let special = copy.special.as_ref().and_then(|s| s.downcast_ref::<Item>());
        assert_eq!(special, Some(&Item { key: 9, amount: 90 }));
    }

    #[test]
    fn test_clone_inplace_merges_by_persistent_id() {
        let registry = registry();
        let cloner = Cloner::new(&registry);
        let source = Bag {
            name: "new".into(),
            items: vec![Item { key: 2, amount: 21 }, Item { key: 3, amount: 30 }],
            special: None,
        };
        let mut target = bag();

        cloner.clone_object_inplace(&source, &mut target).unwrap();
        // Key 2 is updated in place, key 1 is gone, key 3 is appended
        assert_eq!(
            target.items,
            [Item { key: 2, amount: 21 }, Item { key: 3, amount: 30 }]
        );
        assert_eq!(target.name, "new");
        assert!(target.special.is_none());
    }

    #[test]
    fn test_clone_inplace_rejects_other_class() {
        let registry = registry();
        let cloner = Cloner::new(&registry);
        let mut target = 5u32;
        assert!(cloner.clone_object_inplace(&bag(), &mut target).is_err());
    }

    #[test]
    fn test_clone_typed() {
        let registry = registry();
        let cloner = Cloner::new(&registry);
        let copy = cloner.clone_typed(&Item { key: 4, amount: 40 }).unwrap();
        assert_eq!(copy, Item { key: 4, amount: 40 });
    }
}

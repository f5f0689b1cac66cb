//! Type registry
//!
//! Maps stable class ids to [`ClassSchema`]s. The registry is an explicit
//! value passed by reference to every walker, cloner, stream and patch
//! operation; it is not internally synchronized, so registration must not
//! run concurrently with readers.

use std::collections::BTreeMap;

use log::{debug, warn};
use void_core::{ClassId, EntityId, InstanceId};

use crate::class::{Class, Reflected, ANY_CLASS_ID};
use crate::patch::DataPatch;
use crate::schema::{ClassSchema, VersionConverter};

/// Generates the schema of one generic specialization
pub type GenericSchemaFn = fn() -> Option<ClassSchema>;

/// Central registry of reflected classes
pub struct TypeRegistry {
    /// Schemas by class id
    classes: BTreeMap<ClassId, ClassSchema>,
    /// Class ids by name
    by_name: BTreeMap<String, ClassId>,
    /// Schema generators of generic specializations
    generic_infos: BTreeMap<ClassId, GenericSchemaFn>,
    /// While set, registering a class removes it instead
    removal_mode: bool,
}

impl TypeRegistry {
    /// Create a registry with the built-in leaf classes
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtins();
        registry
    }

    /// Create a registry with no classes at all
    pub fn empty() -> Self {
        Self {
            classes: BTreeMap::new(),
            by_name: BTreeMap::new(),
            generic_infos: BTreeMap::new(),
            removal_mode: false,
        }
    }

    fn register_builtins(&mut self) {
        self.register_class(ClassSchema::leaf::<bool>())
            .register_class(ClassSchema::leaf::<u8>())
            .register_class(ClassSchema::leaf::<u16>())
            .register_class(ClassSchema::leaf::<u32>())
            .register_class(ClassSchema::leaf::<u64>())
            .register_class(ClassSchema::leaf::<i8>())
            .register_class(ClassSchema::leaf::<i16>())
            .register_class(ClassSchema::leaf::<i32>())
            .register_class(ClassSchema::leaf::<i64>())
            .register_class(ClassSchema::leaf::<f32>())
            .register_class(ClassSchema::leaf::<f64>())
            .register_class(ClassSchema::leaf::<String>())
            .register_class(ClassSchema::leaf::<ClassId>())
            .register_class(ClassSchema::leaf::<EntityId>())
            .register_class(ClassSchema::leaf::<InstanceId>())
            .register_class(ClassSchema::leaf::<DataPatch>());
    }

    /// Register a class schema
    ///
    /// Panics if the class id is already registered, or if the class
    /// reflects a field its base class already reflects. In removal mode the
    /// class is deregistered instead.
    pub fn register_class(&mut self, schema: ClassSchema) -> &mut Self {
        if self.removal_mode {
            self.deregister(schema.id());
            return self;
        }

        assert!(
            !self.classes.contains_key(&schema.id()),
            "class {} ({}) registered twice",
            schema.name(),
            schema.id()
        );

        for base in schema.bases() {
            if let Some(base_schema) = self.classes.get(&base.class_id()) {
                for inherited in base_schema.fields() {
                    assert!(
                        schema
                            .fields()
                            .iter()
                            .filter(|f| !f.is_base_class())
                            .all(|f| f.name_hash() != inherited.name_hash()),
                        "field {} of {} is already reflected by base {}",
                        inherited.name(),
                        schema.name(),
                        base_schema.name()
                    );
                }
            }
        }

        let mut generics = Vec::new();
        for field in schema.fields() {
            if !self.classes.contains_key(&field.class_id()) {
                if let Some(generator) = field.generic_generator() {
                    generics.push((field.class_id(), generator));
                }
            }
        }
        if let Some(element) = schema.container().and_then(|c| c.element_generic()) {
            if let Some(adapter) = schema.container() {
                generics.push((adapter.element_class(), element));
            }
        }

        debug!(
            "Registered class {} ({}) {}",
            schema.name(),
            schema.id(),
            schema.version()
        );
        self.by_name.insert(schema.name().to_string(), schema.id());
        self.classes.insert(schema.id(), schema);

        for (id, generator) in generics {
            self.register_generic_info(id, generator);
        }
        self
    }

    /// Register a leaf class stored through serde
    pub fn register_leaf<T>(&mut self) -> &mut Self
    where
        T: Class + Clone + PartialEq + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.register_class(ClassSchema::leaf::<T>())
    }

    /// Associate a generic specialization with its schema generator
    ///
    /// The generated schema is registered immediately if it is not known yet.
    pub fn register_generic_info(&mut self, id: ClassId, generator: GenericSchemaFn) -> &mut Self {
        self.generic_infos.insert(id, generator);
        if !self.classes.contains_key(&id) && !self.removal_mode {
            if let Some(schema) = generator() {
                if schema.id() == id {
                    self.register_class(schema);
                } else {
                    warn!(
                        "Generic schema {} does not match specialization {}",
                        schema.id(),
                        id
                    );
                }
            }
        }
        self
    }

    /// Schema generator of a generic specialization
    pub fn find_generic_info(&self, id: ClassId) -> Option<GenericSchemaFn> {
        self.generic_infos.get(&id).copied()
    }

    /// Remove a class
    pub fn deregister(&mut self, id: ClassId) -> Option<ClassSchema> {
        let schema = self.classes.remove(&id)?;
        self.by_name.remove(schema.name());
        self.generic_infos.remove(&id);
        debug!("Deregistered class {} ({})", schema.name(), id);
        Some(schema)
    }

    /// Make subsequent registrations remove classes
    pub fn enable_removal_mode(&mut self) {
        self.removal_mode = true;
    }

    pub fn disable_removal_mode(&mut self) {
        self.removal_mode = false;
    }

    pub fn is_removal_mode(&self) -> bool {
        self.removal_mode
    }

    /// Mark a class deprecated
    ///
    /// Stored instances of the class are dropped on load, after the optional
    /// converter has had a chance to migrate their data.
    pub fn deprecate_class(
        &mut self,
        name: &str,
        id: ClassId,
        converter: Option<VersionConverter>,
    ) -> &mut Self {
        if let Some(previous) = self.classes.remove(&id) {
            self.by_name.remove(previous.name());
        }
        debug!("Deprecated class {} ({})", name, id);
        self.by_name.insert(name.to_string(), id);
        self.classes
            .insert(id, ClassSchema::deprecated(name, id, converter));
        self
    }

    /// Look up a class by id
    pub fn find_class(&self, id: ClassId) -> Option<&ClassSchema> {
        self.classes.get(&id)
    }

    /// Look up a class by name
    pub fn find_class_by_name(&self, name: &str) -> Option<&ClassSchema> {
        self.by_name.get(name).and_then(|id| self.classes.get(id))
    }

    /// Check whether objects of class `actual` can be used as `target`
    pub fn is_type_of(&self, actual: ClassId, target: ClassId) -> bool {
        if actual == target || target == ANY_CLASS_ID {
            return true;
        }
        self.classes
            .get(&actual)
            .map(|schema| schema.bases().any(|base| self.is_type_of(base.class_id(), target)))
            .unwrap_or(false)
    }

    /// View an object as one of its base classes
    pub fn as_type<'a>(&self, object: &'a dyn Reflected, target: ClassId) -> Option<&'a dyn Reflected> {
        if object.class_id() == target || target == ANY_CLASS_ID {
            return Some(object);
        }
        let schema = self.classes.get(&object.class_id())?;
        let base = schema
            .bases()
            .find(|base| self.is_type_of(base.class_id(), target))?;
        self.as_type(base.get(object)?, target)
    }

    /// View an object as one of its base classes (mutable)
    pub fn as_type_mut<'a>(
        &self,
        object: &'a mut dyn Reflected,
        target: ClassId,
    ) -> Option<&'a mut dyn Reflected> {
        if object.class_id() == target || target == ANY_CLASS_ID {
            return Some(object);
        }
        let schema = self.classes.get(&object.class_id())?;
        let base = schema
            .bases()
            .find(|base| self.is_type_of(base.class_id(), target))?;
        self.as_type_mut(base.get_mut(object)?, target)
    }

    /// Create a default instance of a class
    pub fn create(&self, id: ClassId) -> Option<Box<dyn Reflected>> {
        self.classes.get(&id).and_then(ClassSchema::create)
    }

    /// Iterate over all registered schemas
    pub fn iter(&self) -> impl Iterator<Item = &ClassSchema> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Class schemas and field descriptors
//!
//! A [`ClassSchema`] describes one reflected class: its name, id, version
//! and either an ordered field list, a leaf [`Codec`], or a
//! [`ContainerAdapter`]. Field access is type-erased: each descriptor carries
//! getter closures built once at registration from plain typed accessors.
//!
//! ## Example
//!
//! ```ignore
//! let schema = ClassSchema::builder::<Transform>()
//!     .version(2, Some(upgrade_transform))
//!     .field("position", |t| &t.position, |t| &mut t.position)
//!     .field("scale", |t| &t.scale, |t| &mut t.scale)
//!     .build();
//! registry.register_class(schema);
//! ```

use core::fmt;
use core::marker::PhantomData;
use std::sync::Arc;

use void_core::{ClassId, ClassVersion};

use crate::class::{name_hash, Class, Reflected, ANY_CLASS_ID};
use crate::codec::{Codec, SerdeCodec};
use crate::container::{ContainerAdapter, PointerVecAdapter, VecAdapter};
use crate::registry::{GenericSchemaFn, TypeRegistry};
use crate::stream::DataElementNode;

/// Converts a stored element tree from an older class version in place
///
/// Returns `false` if the data could not be converted.
pub type VersionConverter = fn(&TypeRegistry, &mut DataElementNode) -> bool;

/// Creates a default instance of a class
pub type Factory = fn() -> Box<dyn Reflected>;

/// Extracts a stable key used to correlate container elements
pub type PersistentIdFn = Arc<dyn Fn(&dyn Reflected) -> Option<u64> + Send + Sync>;

type Getter = Box<dyn for<'a> Fn(&'a dyn Reflected) -> Option<&'a dyn Reflected> + Send + Sync>;
type GetterMut =
    Box<dyn for<'a> Fn(&'a mut dyn Reflected) -> Option<&'a mut dyn Reflected> + Send + Sync>;
type PointerSetter =
    Box<dyn Fn(&mut dyn Reflected, Option<Box<dyn Reflected>>) -> bool + Send + Sync>;

// ============================================================================
// Field flags
// ============================================================================

/// Flags describing how a field is stored
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldFlags(u8);

impl FieldFlags {
    pub const NONE: FieldFlags = FieldFlags(0);
    /// Field is an optional boxed object resolved polymorphically
    pub const POINTER: FieldFlags = FieldFlags(1 << 0);
    /// Field embeds the state of a base class
    pub const BASE_CLASS: FieldFlags = FieldFlags(1 << 1);
    /// Field has no meaningful default; always stored
    pub const NO_DEFAULT_VALUE: FieldFlags = FieldFlags(1 << 2);
    /// Field holds the identity of the owning object rather than a reference
    pub const IDENTITY: FieldFlags = FieldFlags(1 << 3);

    #[inline]
    pub const fn contains(self, other: FieldFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: FieldFlags) -> FieldFlags {
        FieldFlags(self.0 | other.0)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl core::ops::BitOr for FieldFlags {
    type Output = FieldFlags;

    fn bitor(self, rhs: FieldFlags) -> FieldFlags {
        self.union(rhs)
    }
}

impl fmt::Debug for FieldFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::POINTER) {
            names.push("POINTER");
        }
        if self.contains(Self::BASE_CLASS) {
            names.push("BASE_CLASS");
        }
        if self.contains(Self::NO_DEFAULT_VALUE) {
            names.push("NO_DEFAULT_VALUE");
        }
        if self.contains(Self::IDENTITY) {
            names.push("IDENTITY");
        }
        write!(f, "FieldFlags({})", names.join(" | "))
    }
}

// ============================================================================
// Field descriptor
// ============================================================================

enum FieldAccess {
    Value {
        get: Getter,
        get_mut: GetterMut,
    },
    Pointer {
        get: Getter,
        get_mut: GetterMut,
        set: PointerSetter,
    },
}

/// One member of a reflected class
pub struct FieldDescriptor {
    name: String,
    name_hash: u32,
    class_id: ClassId,
    size: usize,
    offset: usize,
    flags: FieldFlags,
    generic: Option<GenericSchemaFn>,
    access: FieldAccess,
}

impl FieldDescriptor {
    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable hash of the field name
    pub fn name_hash(&self) -> u32 {
        self.name_hash
    }

    /// Declared class of the field value
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    /// Size of the field in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Byte offset of the field within the owning object
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn flags(&self) -> FieldFlags {
        self.flags
    }

    pub fn is_pointer(&self) -> bool {
        self.flags.contains(FieldFlags::POINTER)
    }

    pub fn is_base_class(&self) -> bool {
        self.flags.contains(FieldFlags::BASE_CLASS)
    }

    pub fn is_identity(&self) -> bool {
        self.flags.contains(FieldFlags::IDENTITY)
    }

    /// Read the field from its owner; `None` for null pointers
    pub fn get<'a>(&self, owner: &'a dyn Reflected) -> Option<&'a dyn Reflected> {
        match &self.access {
            FieldAccess::Value { get, .. } | FieldAccess::Pointer { get, .. } => get(owner),
        }
    }

    /// Mutable access to the field; `None` for null pointers
    pub fn get_mut<'a>(&self, owner: &'a mut dyn Reflected) -> Option<&'a mut dyn Reflected> {
        match &self.access {
            FieldAccess::Value { get_mut, .. } | FieldAccess::Pointer { get_mut, .. } => {
                get_mut(owner)
            }
        }
    }

    /// Replace the object behind a pointer field
    ///
    /// Returns `false` for value fields.
    pub fn set_pointer(&self, owner: &mut dyn Reflected, value: Option<Box<dyn Reflected>>) -> bool {
        match &self.access {
            FieldAccess::Pointer { set, .. } => set(owner, value),
            FieldAccess::Value { .. } => false,
        }
    }

    /// Schema generator when the field type is a generic specialization
    pub fn generic_generator(&self) -> Option<GenericSchemaFn> {
        self.generic
    }

    fn value<T: Class, F: Class>(
        name: String,
        flags: FieldFlags,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        let probe = T::default();
        let base = &probe as *const T as usize;
        let offset = (get(&probe) as *const F as usize).wrapping_sub(base);
        Self {
            name_hash: name_hash(&name),
            name,
            class_id: F::CLASS_ID,
            size: core::mem::size_of::<F>(),
            offset,
            flags,
            generic: F::generic_schema().map(|_| F::generic_schema as GenericSchemaFn),
            access: FieldAccess::Value {
                get: erase_getter(move |owner| {
                    owner
                        .as_any()
                        .downcast_ref::<T>()
                        .map(|typed| get(typed) as &dyn Reflected)
                }),
                get_mut: erase_getter_mut(move |owner| {
                    owner
                        .as_any_mut()
                        .downcast_mut::<T>()
                        .map(|typed| get_mut(typed) as &mut dyn Reflected)
                }),
            },
        }
    }

    fn pointer<T: Class>(
        name: String,
        declared: ClassId,
        get: fn(&T) -> &Option<Box<dyn Reflected>>,
        get_mut: fn(&mut T) -> &mut Option<Box<dyn Reflected>>,
    ) -> Self {
        let probe = T::default();
        let base = &probe as *const T as usize;
        let offset = (get(&probe) as *const Option<Box<dyn Reflected>> as usize).wrapping_sub(base);
        Self {
            name_hash: name_hash(&name),
            name,
            class_id: declared,
            size: core::mem::size_of::<Option<Box<dyn Reflected>>>(),
            offset,
            flags: FieldFlags::POINTER,
            generic: None,
            access: FieldAccess::Pointer {
                get: erase_getter(move |owner| {
                    owner
                        .as_any()
                        .downcast_ref::<T>()
                        .and_then(|typed| get(typed).as_deref())
                }),
                get_mut: erase_getter_mut(move |owner| {
                    match owner.as_any_mut().downcast_mut::<T>() {
                        Some(typed) => match get_mut(typed) {
                            Some(boxed) => Some(&mut **boxed),
                            None => None,
                        },
                        None => None,
                    }
                }),
                set: Box::new(move |owner, value| match owner.as_any_mut().downcast_mut::<T>() {
                    Some(typed) => {
                        *get_mut(typed) = value;
                        true
                    }
                    None => false,
                }),
            },
        }
    }
}

fn erase_getter<G>(getter: G) -> Getter
where
    G: for<'a> Fn(&'a dyn Reflected) -> Option<&'a dyn Reflected> + Send + Sync + 'static,
{
    Box::new(getter)
}

fn erase_getter_mut<G>(getter: G) -> GetterMut
where
    G: for<'a> Fn(&'a mut dyn Reflected) -> Option<&'a mut dyn Reflected> + Send + Sync + 'static,
{
    Box::new(getter)
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("class_id", &self.class_id)
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("flags", &self.flags)
            .finish()
    }
}

// ============================================================================
// Event handler
// ============================================================================

/// Synchronous lifecycle hooks invoked by walkers, streams and patches
///
/// Hooks may run on whatever thread performs the operation.
pub trait EventHandler: Send + Sync {
    /// Object is about to be read (saved, diffed, cloned from)
    fn on_read_begin(&self, _object: &dyn Reflected) {}

    /// Object has been read
    fn on_read_end(&self, _object: &dyn Reflected) {}

    /// Object is about to be written (loaded, cloned into)
    fn on_write_begin(&self, _object: &mut dyn Reflected) {}

    /// Object has been written
    fn on_write_end(&self, _object: &mut dyn Reflected) {}

    /// A data patch is about to be applied to the object
    fn on_patch_begin(&self, _object: &dyn Reflected) {}

    /// A data patch has been applied to the object
    fn on_patch_end(&self, _object: &mut dyn Reflected) {}
}

// ============================================================================
// Class schema
// ============================================================================

/// Reflection metadata for one class
pub struct ClassSchema {
    name: String,
    id: ClassId,
    version: ClassVersion,
    converter: Option<VersionConverter>,
    fields: Vec<FieldDescriptor>,
    codec: Option<Box<dyn Codec>>,
    container: Option<Box<dyn ContainerAdapter>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    persistent_id: Option<PersistentIdFn>,
    factory: Option<Factory>,
    attributes: Vec<(String, String)>,
    size: usize,
}

impl ClassSchema {
    /// Start building the schema of a class
    pub fn builder<T: Class>() -> ClassBuilder<T> {
        ClassBuilder::new()
    }

    /// Schema of a leaf class stored through serde
    pub fn leaf<T>() -> ClassSchema
    where
        T: Class + Clone + PartialEq + serde::Serialize + serde::de::DeserializeOwned,
    {
        ClassBuilder::<T>::new().codec(SerdeCodec::<T>::new()).build()
    }

    /// Schema of `Vec<T>`
    pub fn vec<T: Class>() -> ClassSchema {
        let mut schema = ClassBuilder::<Vec<T>>::new().build();
        schema.container = Some(Box::new(VecAdapter::<T>::new()));
        schema
    }

    /// Schema of `Vec<Box<dyn Reflected>>`
    pub fn pointer_vec() -> ClassSchema {
        let mut schema = ClassBuilder::<Vec<Box<dyn Reflected>>>::new().build();
        schema.container = Some(Box::new(PointerVecAdapter::new(ANY_CLASS_ID)));
        schema
    }

    /// Schema of a class marked deprecated
    pub(crate) fn deprecated(name: &str, id: ClassId, converter: Option<VersionConverter>) -> Self {
        Self {
            name: name.to_string(),
            id,
            version: ClassVersion::DEPRECATED,
            converter,
            fields: Vec::new(),
            codec: None,
            container: None,
            event_handler: None,
            persistent_id: None,
            factory: None,
            attributes: Vec::new(),
            size: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn version(&self) -> ClassVersion {
        self.version
    }

    pub fn is_deprecated(&self) -> bool {
        self.version.is_deprecated()
    }

    pub fn converter(&self) -> Option<VersionConverter> {
        self.converter
    }

    /// Ordered field list, base classes included
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Find a field by name hash
    pub fn field_by_hash(&self, hash: u32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name_hash == hash)
    }

    /// Find a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_by_hash(name_hash(name))
    }

    pub fn codec(&self) -> Option<&dyn Codec> {
        self.codec.as_deref()
    }

    pub fn container(&self) -> Option<&dyn ContainerAdapter> {
        self.container.as_deref()
    }

    pub fn event_handler(&self) -> Option<&dyn EventHandler> {
        self.event_handler.as_deref()
    }

    /// Persistent identity of an object of this class
    pub fn persistent_id(&self, object: &dyn Reflected) -> Option<u64> {
        self.persistent_id.as_ref().and_then(|f| f(object))
    }

    pub fn has_persistent_id(&self) -> bool {
        self.persistent_id.is_some()
    }

    /// Create a default instance
    pub fn create(&self) -> Option<Box<dyn Reflected>> {
        self.factory.map(|f| f())
    }

    /// Look up a string attribute
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Size of the class in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Base class fields
    pub fn bases(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_base_class())
    }

    /// Whether the class is a leaf (no recursion into children)
    pub fn is_leaf(&self) -> bool {
        self.codec.is_some()
    }
}

impl fmt::Debug for ClassSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassSchema")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("fields", &self.fields)
            .field("codec", &self.codec.is_some())
            .field("container", &self.container.is_some())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Fluent builder for a [`ClassSchema`]
pub struct ClassBuilder<T: Class> {
    schema: ClassSchema,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Class> ClassBuilder<T> {
    fn new() -> Self {
        Self {
            schema: ClassSchema {
                name: T::class_name(),
                id: T::CLASS_ID,
                version: ClassVersion::INITIAL,
                converter: None,
                fields: Vec::new(),
                codec: None,
                container: None,
                event_handler: None,
                persistent_id: None,
                factory: Some(|| -> Box<dyn Reflected> { Box::new(T::default()) }),
                attributes: Vec::new(),
                size: core::mem::size_of::<T>(),
            },
            _marker: PhantomData,
        }
    }

    /// Set the class version and the converter for older stored data
    pub fn version(mut self, version: u32, converter: Option<VersionConverter>) -> Self {
        assert!(
            version != u32::MAX,
            "version {} of {} is reserved for deprecation",
            version,
            self.schema.name
        );
        self.schema.version = ClassVersion::new(version);
        self.schema.converter = converter;
        self
    }

    /// Add a value field
    pub fn field<F: Class>(
        self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        self.push_field(FieldDescriptor::value(name.to_string(), FieldFlags::NONE, get, get_mut))
    }

    /// Add a value field holding the identity of the object
    pub fn identity_field<F: Class>(
        self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        self.push_field(FieldDescriptor::value(
            name.to_string(),
            FieldFlags::IDENTITY | FieldFlags::NO_DEFAULT_VALUE,
            get,
            get_mut,
        ))
    }

    /// Add a value field with explicit flags
    pub fn field_with_flags<F: Class>(
        self,
        name: &'static str,
        flags: FieldFlags,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        self.push_field(FieldDescriptor::value(name.to_string(), flags, get, get_mut))
    }

    /// Add a polymorphic pointer field whose objects are of class `declared` or derived from it
    pub fn pointer_field(
        self,
        name: &'static str,
        declared: ClassId,
        get: fn(&T) -> &Option<Box<dyn Reflected>>,
        get_mut: fn(&mut T) -> &mut Option<Box<dyn Reflected>>,
    ) -> Self {
        self.push_field(FieldDescriptor::pointer(name.to_string(), declared, get, get_mut))
    }

    /// Embed a base class
    pub fn base<B: Class>(self, get: fn(&T) -> &B, get_mut: fn(&mut T) -> &mut B) -> Self {
        let field = FieldDescriptor::value(
            format!("BaseClass:{}", B::class_name()),
            FieldFlags::BASE_CLASS,
            get,
            get_mut,
        );
        self.push_field(field)
    }

    /// Use a leaf codec instead of fields
    pub fn codec<C: Codec + 'static>(mut self, codec: C) -> Self {
        self.schema.codec = Some(Box::new(codec));
        self
    }

    /// Use a container adapter instead of fields
    pub fn container<A: ContainerAdapter + 'static>(mut self, adapter: A) -> Self {
        self.schema.container = Some(Box::new(adapter));
        self
    }

    pub fn event_handler<H: EventHandler + 'static>(mut self, handler: H) -> Self {
        self.schema.event_handler = Some(Arc::new(handler));
        self
    }

    /// Key used to correlate elements of this class inside containers
    pub fn persistent_id(mut self, id_of: fn(&T) -> u64) -> Self {
        self.schema.persistent_id = Some(Arc::new(move |object: &dyn Reflected| {
            object.as_any().downcast_ref::<T>().map(id_of)
        }));
        self
    }

    /// Attach a named string attribute
    pub fn attribute(mut self, name: &str, value: &str) -> Self {
        self.schema.attributes.push((name.to_string(), value.to_string()));
        self
    }

    /// Finish the schema
    ///
    /// Panics if the schema combines a codec with fields; a codec owns the
    /// full byte representation of its class.
    pub fn build(self) -> ClassSchema {
        assert!(
            self.schema.codec.is_none() || self.schema.fields.is_empty(),
            "class {} has both a codec and fields",
            self.schema.name
        );
        assert!(
            self.schema.codec.is_none() || self.schema.container.is_none(),
            "class {} has both a codec and a container adapter",
            self.schema.name
        );
        self.schema
    }

    fn push_field(mut self, field: FieldDescriptor) -> Self {
        assert!(
            self.schema.field_by_hash(field.name_hash).is_none(),
            "field {} reflected twice in {}",
            field.name(),
            self.schema.name
        );
        self.schema.fields.push(field);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, Clone, PartialEq)]
    struct Base {
        tag: u32,
    }
    crate::impl_class!(Base, "SchemaTestBase");

    #[derive(Default)]
    struct Derived {
        padding: u64,
        base: Base,
        label: String,
        child: Option<Box<dyn Reflected>>,
    }
    crate::impl_class!(Derived, "SchemaTestDerived");

    fn derived_schema() -> ClassSchema {
        ClassSchema::builder::<Derived>()
            .version(3, None)
            .field("padding", |d| &d.padding, |d| &mut d.padding)
            .base::<Base>(|d| &d.base, |d| &mut d.base)
            .field("label", |d| &d.label, |d| &mut d.label)
            .pointer_field("child", ANY_CLASS_ID, |d| &d.child, |d| &mut d.child)
            .attribute("category", "test")
            .build()
    }

    #[test]
    fn test_field_order_and_flags() {
        let schema = derived_schema();
        let names: Vec<_> = schema.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["padding", "BaseClass:SchemaTestBase", "label", "child"]);
        assert!(schema.fields()[1].is_base_class());
        assert!(schema.fields()[3].is_pointer());
        assert_eq!(schema.version(), ClassVersion::new(3));
        assert_eq!(schema.attribute("category"), Some("test"));
        assert_eq!(schema.bases().count(), 1);
    }

    #[test]
    fn test_offsets_are_computed_once() {
        let schema = derived_schema();
        let base = schema.field("BaseClass:SchemaTestBase").unwrap();
        let probe = Derived::default();
        let expected = (&probe.base as *const Base as usize) - (&probe as *const Derived as usize);
        assert_eq!(base.offset(), expected);
        assert_eq!(base.size(), core::mem::size_of::<Base>());
    }

    #[test]
    fn test_erased_access() {
        let schema = derived_schema();
        let mut object = Derived::default();
        object.label = "hello".into();

        let label = schema.field("label").unwrap();
        let value = label.get(&object).unwrap();
        assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("hello"));

        let child = schema.field("child").unwrap();
        assert!(child.get(&object).is_none());
        assert!(child.set_pointer(&mut object, Some(Box::new(7u32))));
        assert_eq!(child.get(&object).and_then(|c| c.downcast_ref::<u32>()), Some(&7));

        if let Some(tag) = schema.fields()[1]
            .get_mut(&mut object)
            .and_then(|b| b.downcast_mut::<Base>())
        {
            tag.tag = 9;
        }
        assert_eq!(object.base.tag, 9);
    }

    #[test]
    #[should_panic(expected = "reflected twice")]
    fn test_duplicate_field_panics() {
        let _ = ClassSchema::builder::<Base>()
            .field("tag", |b| &b.tag, |b| &mut b.tag)
            .field("tag", |b| &b.tag, |b| &mut b.tag)
            .build();
    }
}

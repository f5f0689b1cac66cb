//! Object stream: persistence and versioning
//!
//! Objects are saved as a generic tree of [`DataElementNode`]s. Leaves carry
//! the bytes produced by their codec, every other node carries its children.
//! Because the tree does not depend on the current shape of any class, a
//! version converter can restructure stored data before it is loaded into a
//! typed object.
//!
//! Load rules per node:
//! - Unknown classes are reported and skipped (silently with
//!   [`LoadFilter::ignore_unknown_classes`])
//! - Deprecated classes run their converter; if it moved the data to a live
//!   class loading continues with it, otherwise the node is dropped
//! - Older versions run the class converter exactly once
//! - Newer versions than the schema are reported and skipped

use std::borrow::Cow;
use std::cell::RefCell;

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use void_core::ClassId;

use crate::class::{name_hash, Class, Reflected, ANY_CLASS_ID};
use crate::clone::Cloner;
use crate::codec::{decode, encode};
use crate::error::{ReflectError, Result};
use crate::error_handler::{ErrorHandler, StackFrame};
use crate::registry::TypeRegistry;
use crate::schema::ClassSchema;
use crate::walker::{AccessFlags, ObjectWalker};

// ============================================================================
// Stored element tree
// ============================================================================

/// One stored node of an object tree
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataElementNode {
    /// Field name, empty for roots and container elements
    pub name: String,
    pub name_hash: u32,
    /// Concrete class of the stored object
    pub class_id: ClassId,
    /// Class version the data was stored with
    pub version: u32,
    /// Codec bytes of a leaf (base64 in text documents)
    #[serde(with = "leaf_bytes", default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub children: Vec<DataElementNode>,
    /// Byte order of `data`
    #[serde(skip)]
    pub big_endian: bool,
}

impl DataElementNode {
    pub fn new(name: &str, class_id: ClassId, version: u32) -> Self {
        Self {
            name: name.to_string(),
            name_hash: name_hash(name),
            class_id,
            version,
            ..Default::default()
        }
    }

    /// Index of the direct child with the given name hash
    pub fn find_element(&self, hash: u32) -> Option<usize> {
        self.children.iter().position(|c| c.name_hash == hash)
    }

    /// Direct child by name
    pub fn child(&self, name: &str) -> Option<&DataElementNode> {
        self.find_element(name_hash(name)).map(|i| &self.children[i])
    }

    /// Direct child by name (mutable)
    pub fn child_mut(&mut self, name: &str) -> Option<&mut DataElementNode> {
        self.find_element(name_hash(name))
            .map(move |i| &mut self.children[i])
    }

    /// Follow a path of name hashes down the tree
    pub fn find_sub_element(&self, path: &[u32]) -> Option<&DataElementNode> {
        path.iter().try_fold(self, |node, hash| {
            node.find_element(*hash).map(|i| &node.children[i])
        })
    }

    /// Append a child and return it
    pub fn add_element(&mut self, name: &str, class_id: ClassId, version: u32) -> &mut DataElementNode {
        let mut child = DataElementNode::new(name, class_id, version);
        child.big_endian = self.big_endian;
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Append a leaf child holding `value`
    pub fn add_data<T: Class + Serialize>(&mut self, name: &str, value: &T) -> Result<&mut DataElementNode> {
        let child = self.add_element(name, T::CLASS_ID, 0);
        child.set_data(value)?;
        Ok(child)
    }

    /// Remove every direct child with the given name hash
    pub fn remove_element_by_name(&mut self, hash: u32) -> bool {
        let before = self.children.len();
        self.children.retain(|c| c.name_hash != hash);
        self.children.len() != before
    }

    /// Rename a node, keeping its data
    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
        self.name_hash = name_hash(name);
    }

    /// Change the class and version the node is stored as
    pub fn convert(&mut self, class_id: ClassId, version: u32) {
        self.class_id = class_id;
        self.version = version;
    }

    /// Decode the leaf data
    pub fn get_data<T: DeserializeOwned>(&self) -> Result<T> {
        decode(&self.data, self.big_endian)
    }

    /// Replace the leaf data, turning the node into a leaf of class `T`
    pub fn set_data<T: Class + Serialize>(&mut self, value: &T) -> Result<()> {
        self.data = encode(value, self.big_endian)?;
        self.class_id = T::CLASS_ID;
        self.children.clear();
        Ok(())
    }

    /// Set the byte order of this node and all descendants
    pub fn set_big_endian(&mut self, big_endian: bool) {
        self.big_endian = big_endian;
        for child in &mut self.children {
            child.set_big_endian(big_endian);
        }
    }
}

/// Leaf bytes: raw in binary documents, base64 text in human-readable ones
mod leaf_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            serializer.serialize_str(&encoded)
        } else {
            bytes.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            base64::engine::general_purpose::STANDARD
                .decode(&s)
                .map_err(serde::de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

/// A saved object tree with its byte order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamDocument {
    pub big_endian: bool,
    pub root: DataElementNode,
}

// ============================================================================
// Configuration
// ============================================================================

/// Encoding of stream documents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamFormat {
    #[default]
    Binary,
    Json,
}

/// How objects are written
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectStreamConfig {
    pub format: StreamFormat,
    pub big_endian: bool,
}

impl ObjectStreamConfig {
    /// Compact binary documents
    pub fn binary() -> Self {
        Self::default()
    }

    /// Human-readable JSON documents
    pub fn json() -> Self {
        Self {
            format: StreamFormat::Json,
            ..Self::default()
        }
    }
}

/// What the loader tolerates
#[derive(Clone, Copy, Debug, Default)]
pub struct LoadFilter {
    /// Skip unknown classes without reporting an error
    pub ignore_unknown_classes: bool,
    /// Refuse classes the predicate rejects
    pub class_filter: Option<fn(ClassId) -> bool>,
}

impl LoadFilter {
    pub fn accepts(&self, class_id: ClassId) -> bool {
        self.class_filter.map_or(true, |accept| accept(class_id))
    }
}

// ============================================================================
// Object stream
// ============================================================================

/// Saves and loads reflected objects through the registry
pub struct ObjectStream<'r> {
    registry: &'r TypeRegistry,
    config: ObjectStreamConfig,
    filter: LoadFilter,
}

impl<'r> ObjectStream<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self::with_config(registry, ObjectStreamConfig::default())
    }

    pub fn with_config(registry: &'r TypeRegistry, config: ObjectStreamConfig) -> Self {
        Self {
            registry,
            config,
            filter: LoadFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: LoadFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &ObjectStreamConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------------

    /// Build the stored element tree of an object
    pub fn to_node(&self, object: &dyn Reflected, errors: &mut ErrorHandler) -> Option<DataElementNode> {
        let walker = ObjectWalker::new(self.registry, AccessFlags::READ);
        let big_endian = self.config.big_endian;
        let stack: RefCell<Vec<DataElementNode>> = RefCell::new(Vec::new());
        let mut root = None;
        let mut codec_errors = Vec::new();

        walker.enumerate(
            object,
            object.class_id(),
            &mut |object, schema, field| {
                let name = field.map_or("", |f| f.name());
                let mut node = DataElementNode::new(name, object.class_id(), schema.version().get());
                node.big_endian = big_endian;
                if let Some(codec) = schema.codec() {
                    if let Err(err) = codec.save(object, &mut node.data, big_endian) {
                        codec_errors.push(format!("failed to save {}: {}", schema.name(), err));
                    }
                }
                stack.borrow_mut().push(node);
                true
            },
            &mut || {
                let mut stack = stack.borrow_mut();
                if let Some(node) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
                true
            },
            errors,
        );

        for message in codec_errors {
            errors.report_error(message);
        }
        root
    }

    /// Save an object to bytes in the configured format
    pub fn save(&self, object: &dyn Reflected, errors: &mut ErrorHandler) -> Result<Vec<u8>> {
        let root = self
            .to_node(object, errors)
            .ok_or(ReflectError::Incomplete(errors.error_count().max(1)))?;
        self.encode_document(&StreamDocument {
            big_endian: self.config.big_endian,
            root,
        })
    }

    /// Encode a document in the configured format
    pub fn encode_document(&self, document: &StreamDocument) -> Result<Vec<u8>> {
        match self.config.format {
            StreamFormat::Binary => Ok(bincode::serialize(document)?),
            StreamFormat::Json => Ok(serde_json::to_vec_pretty(document)?),
        }
    }

    /// Decode a document in the configured format
    pub fn decode_document(&self, bytes: &[u8]) -> Result<StreamDocument> {
        let mut document: StreamDocument = match self.config.format {
            StreamFormat::Binary => bincode::deserialize(bytes)?,
            StreamFormat::Json => serde_json::from_slice(bytes)?,
        };
        let big_endian = document.big_endian;
        document.root.set_big_endian(big_endian);
        Ok(document)
    }

    // ------------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------------

    /// Load an object saved with [`save`](Self::save)
    ///
    /// Failures below the root are reported to `errors` and the partially
    /// loaded object is still returned.
    pub fn load(&self, bytes: &[u8], errors: &mut ErrorHandler) -> Result<Box<dyn Reflected>> {
        let document = self.decode_document(bytes)?;
        self.load_node(&document.root, ANY_CLASS_ID, errors)
            .ok_or(ReflectError::Incomplete(errors.error_count()))
    }

    /// Load an object of a known class
    pub fn load_typed<T: Class>(&self, bytes: &[u8], errors: &mut ErrorHandler) -> Result<T> {
        let document = self.decode_document(bytes)?;
        let loaded = self
            .load_node(&document.root, T::CLASS_ID, errors)
            .ok_or(ReflectError::Incomplete(errors.error_count()))?;
        let found = loaded.class_id();
        crate::class::downcast_box::<T>(loaded)
            .map(|typed| *typed)
            .map_err(|_| ReflectError::ClassMismatch {
                expected: T::CLASS_ID,
                found,
            })
    }

    /// Load into an existing object of the same class
    pub fn load_inplace(
        &self,
        bytes: &[u8],
        target: &mut dyn Reflected,
        errors: &mut ErrorHandler,
    ) -> Result<()> {
        let document = self.decode_document(bytes)?;
        let loaded = self
            .load_node(&document.root, target.class_id(), errors)
            .ok_or(ReflectError::Incomplete(errors.error_count()))?;
        Cloner::new(self.registry).clone_object_inplace(&*loaded, target)
    }

    /// Load one stored node expected to be of class `declared` or derived from it
    pub fn load_node(
        &self,
        node: &DataElementNode,
        declared: ClassId,
        errors: &mut ErrorHandler,
    ) -> Option<Box<dyn Reflected>> {
        let mut working = Cow::Borrowed(node);
        let mut schema = self.find_schema(working.class_id, errors)?;

        if schema.is_deprecated() {
            let migrated = match schema.converter() {
                Some(convert) => convert(self.registry, working.to_mut()),
                None => false,
            };
            let live = if migrated && working.class_id != schema.id() {
                self.registry
                    .find_class(working.class_id)
                    .filter(|next| !next.is_deprecated())
            } else {
                None
            };
            match live {
                Some(next) => schema = next,
                None => {
                    errors.report_warning(format!(
                        "dropping stored data of deprecated class {}",
                        schema.name()
                    ));
                    return None;
                }
            }
        }

        let current = schema.version().get();
        let stored = working.version;
        if stored > current {
            errors.report_error(
                ReflectError::NewerVersion {
                    class: schema.name().to_string(),
                    stored,
                    current,
                }
                .to_string(),
            );
            return None;
        }
        if stored < current {
            match schema.converter() {
                Some(convert) => {
                    let node = working.to_mut();
                    if !convert(self.registry, node) {
                        errors.report_error(
                            ReflectError::ConversionFailed {
                                class: schema.name().to_string(),
                                stored,
                            }
                            .to_string(),
                        );
                        return None;
                    }
                    node.version = current;
                }
                None => errors.report_warning(format!(
                    "no converter for {} from version {} to {}, loading as stored",
                    schema.name(),
                    stored,
                    current
                )),
            }
        }

        if !self.registry.is_type_of(schema.id(), declared) {
            errors.report_error(format!(
                "stored class {} is not a {}",
                schema.name(),
                declared
            ));
            return None;
        }

        let Some(mut object) = schema.create() else {
            errors.report_error(
                ReflectError::NoFactory {
                    name: schema.name().to_string(),
                    id: schema.id(),
                }
                .to_string(),
            );
            return None;
        };
        self.fill(&working, &mut *object, schema, errors);
        Some(object)
    }

    fn find_schema(&self, id: ClassId, errors: &mut ErrorHandler) -> Option<&'r ClassSchema> {
        let schema = self.registry.find_class(id).filter(|_| self.filter.accepts(id));
        if schema.is_none() {
            if self.filter.ignore_unknown_classes {
                debug!("Skipping stored data of unknown class {}", id);
            } else {
                errors.report_error(ReflectError::UnknownClass(id).to_string());
            }
        }
        schema
    }

    fn fill(
        &self,
        node: &DataElementNode,
        object: &mut dyn Reflected,
        schema: &'r ClassSchema,
        errors: &mut ErrorHandler,
    ) {
        errors.push(StackFrame {
            class_name: schema.name().to_string(),
            class_id: schema.id(),
            field: (!node.name.is_empty()).then(|| node.name.clone()),
            offset: 0,
        });
        let handler = schema.event_handler();
        if let Some(handler) = handler {
            handler.on_write_begin(object);
        }

        if let Some(codec) = schema.codec() {
            if let Err(err) = codec.load(object, &node.data, node.version, node.big_endian) {
                errors.report_error(format!("failed to load {}: {}", schema.name(), err));
            }
        } else if let Some(container) = schema.container() {
            container.clear_elements(object);
            for child in &node.children {
                let Some(element) = self.load_node(child, container.element_class(), errors) else {
                    continue;
                };
                if container.store_element(object, element).is_err() {
                    errors.report_error(
                        ReflectError::ContainerMismatch(schema.name().to_string()).to_string(),
                    );
                }
            }
        } else {
            let cloner = Cloner::new(self.registry);
            for child in &node.children {
                let Some(field) = schema.field_by_hash(child.name_hash) else {
                    errors.report_warning(format!("{} has no field {}", schema.name(), child.name));
                    continue;
                };
                let Some(loaded) = self.load_node(child, field.class_id(), errors) else {
                    continue;
                };
                if field.is_pointer() {
                    field.set_pointer(object, Some(loaded));
                } else if let Some(slot) = field.get_mut(object) {
                    if let Err(err) = cloner.clone_object_inplace(&*loaded, slot) {
                        errors.report_error(format!("failed to load field {}: {}", field.name(), err));
                    }
                }
            }
        }

        if let Some(handler) = handler {
            handler.on_write_end(object);
        }
        errors.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Settings {
        volume: u32,
        title: String,
        tags: Vec<String>,
        extra: Option<Box<dyn Reflected>>,
    }
    crate::impl_class!(Settings, "StreamTestSettings");

    fn settings_schema() -> ClassSchema {
        ClassSchema::builder::<Settings>()
            .field("volume", |s| &s.volume, |s| &mut s.volume)
            .field("title", |s| &s.title, |s| &mut s.title)
            .field("tags", |s| &s.tags, |s| &mut s.tags)
            .pointer_field("extra", ANY_CLASS_ID, |s| &s.extra, |s| &mut s.extra)
            .build()
    }

    fn sample() -> Settings {
        Settings {
            volume: 7,
            title: "main".into(),
            tags: vec!["a".into(), "b".into()],
            extra: Some(Box::new(99u64)),
        }
    }

    fn assert_sample(settings: &Settings) {
        assert_eq!(settings.volume, 7);
        assert_eq!(settings.title, "main");
        assert_eq!(settings.tags, ["a", "b"]);
        let extra = settings.extra.as_ref().and_then(|e| e.downcast_ref::<u64>());
        assert_eq!(extra, Some(&99));
    }

    #[test]
    fn test_binary_round_trip() {
        let mut registry = TypeRegistry::new();
        registry.register_class(settings_schema());
        let stream = ObjectStream::new(&registry);
        let mut errors = ErrorHandler::new();

        let bytes = stream.save(&sample(), &mut errors).unwrap();
        let loaded: Settings = stream.load_typed(&bytes, &mut errors).unwrap();
        assert_sample(&loaded);
        assert_eq!(errors.error_count(), 0);
    }

    #[test]
    fn test_json_big_endian_round_trip() {
        let mut registry = TypeRegistry::new();
        registry.register_class(settings_schema());
        let config = ObjectStreamConfig {
            format: StreamFormat::Json,
            big_endian: true,
        };
        let stream = ObjectStream::with_config(&registry, config);
        let mut errors = ErrorHandler::new();

        let bytes = stream.save(&sample(), &mut errors).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"big_endian\": true"));

        let loaded: Settings = stream.load_typed(&bytes, &mut errors).unwrap();
        assert_sample(&loaded);
    }

    #[test]
    fn test_node_tree_shape() {
        let mut registry = TypeRegistry::new();
        registry.register_class(settings_schema());
        let stream = ObjectStream::new(&registry);
        let mut errors = ErrorHandler::new();

        let mut settings = sample();
        settings.extra = None;
        let root = stream.to_node(&settings, &mut errors).unwrap();
        let names: Vec<_> = root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["volume", "title", "tags"]);
        assert_eq!(root.child("tags").unwrap().children.len(), 2);
        assert_eq!(root.child("volume").unwrap().get_data::<u32>().unwrap(), 7);
    }

    #[test]
    fn test_unknown_class_reported_or_ignored() {
        let mut registry = TypeRegistry::new();
        registry.register_class(settings_schema());
        let stream = ObjectStream::new(&registry);
        let mut errors = ErrorHandler::new();
        let mut root = stream.to_node(&sample(), &mut errors).unwrap();
        root.child_mut("extra").unwrap().class_id = ClassId::from_name("Gone");

        let loaded = stream.load_node(&root, ANY_CLASS_ID, &mut errors).unwrap();
        assert_eq!(errors.error_count(), 1);
        assert!(loaded.downcast_ref::<Settings>().unwrap().extra.is_none());

        let mut quiet = ErrorHandler::new();
        let lenient = ObjectStream::new(&registry).with_filter(LoadFilter {
            ignore_unknown_classes: true,
            ..Default::default()
        });
        assert!(lenient.load_node(&root, ANY_CLASS_ID, &mut quiet).is_some());
        assert_eq!(quiet.error_count(), 0);
    }

    static UPGRADES: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default, Debug, PartialEq)]
    struct Renamed {
        loudness: u32,
    }
    crate::impl_class!(Renamed, "StreamTestRenamed");

    fn upgrade_renamed(_: &TypeRegistry, node: &mut DataElementNode) -> bool {
        UPGRADES.fetch_add(1, Ordering::SeqCst);
        match node.child_mut("volume") {
            Some(child) => {
                child.rename("loudness");
                true
            }
            None => false,
        }
    }

    #[test]
    fn test_older_version_converted_once() {
        let mut registry = TypeRegistry::new();
        registry.register_class(
            ClassSchema::builder::<Renamed>()
                .version(2, Some(upgrade_renamed))
                .field("loudness", |r| &r.loudness, |r| &mut r.loudness)
                .build(),
        );
        let mut node = DataElementNode::new("", Renamed::CLASS_ID, 1);
        node.add_data("volume", &11u32).unwrap();

        let stream = ObjectStream::new(&registry);
        let mut errors = ErrorHandler::new();
        let loaded = stream.load_node(&node, Renamed::CLASS_ID, &mut errors).unwrap();
        assert_eq!(loaded.downcast_ref::<Renamed>(), Some(&Renamed { loudness: 11 }));
        assert_eq!(UPGRADES.load(Ordering::SeqCst), 1);
        assert_eq!(errors.error_count(), 0);
    }

    #[test]
    fn test_newer_version_skipped() {
        let mut registry = TypeRegistry::new();
        registry.register_class(
            ClassSchema::builder::<Renamed>()
                .field("loudness", |r| &r.loudness, |r| &mut r.loudness)
                .build(),
        );
        let node = DataElementNode::new("", Renamed::CLASS_ID, 5);
        let stream = ObjectStream::new(&registry);
        let mut errors = ErrorHandler::new();
        assert!(stream.load_node(&node, ANY_CLASS_ID, &mut errors).is_none());
        assert_eq!(errors.error_count(), 1);
    }

    #[test]
    fn test_deprecated_class_dropped_or_migrated() {
        fn migrate(_: &TypeRegistry, node: &mut DataElementNode) -> bool {
            node.convert(Renamed::CLASS_ID, 0);
            true
        }

        let mut registry = TypeRegistry::new();
        registry.register_class(
            ClassSchema::builder::<Renamed>()
                .field("loudness", |r| &r.loudness, |r| &mut r.loudness)
                .build(),
        );
        let old = ClassId::from_name("StreamTestOld");
        registry.deprecate_class("StreamTestOld", old, None);
        let older = ClassId::from_name("StreamTestOlder");
        registry.deprecate_class("StreamTestOlder", older, Some(migrate));

        let stream = ObjectStream::new(&registry);
        let mut errors = ErrorHandler::new();
        let dropped = DataElementNode::new("", old, 0);
        assert!(stream.load_node(&dropped, ANY_CLASS_ID, &mut errors).is_none());
        assert_eq!(errors.warning_count(), 1);
        assert_eq!(errors.error_count(), 0);

        let migrated = DataElementNode::new("", older, 0);
        let loaded = stream.load_node(&migrated, ANY_CLASS_ID, &mut errors).unwrap();
        assert!(loaded.is::<Renamed>());
    }

    #[test]
    fn test_sub_element_helpers() {
        let mut root = DataElementNode::new("", ClassId::from_name("Root"), 0);
        let child = root.add_element("child", ClassId::from_name("Child"), 0);
        child.add_data("leaf", &3i32).unwrap();

        let leaf = root
            .find_sub_element(&[name_hash("child"), name_hash("leaf")])
            .unwrap();
        assert_eq!(leaf.get_data::<i32>().unwrap(), 3);
        assert!(root.remove_element_by_name(name_hash("child")));
        assert!(root.children.is_empty());
    }
}

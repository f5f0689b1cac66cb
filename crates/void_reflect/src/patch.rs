//! Data patches
//!
//! A [`DataPatch`] records how a target object graph diverges from a source
//! graph of the same class. Entries are keyed by a [`DataAddress`]: the path
//! of field-name hashes and container element keys from the root to the
//! diverging node. Element keys are the persistent identity of the element
//! when its class defines one, otherwise its index.
//!
//! Each entry holds the full stored form of the target node, or no bytes at
//! all when the node was removed. Leaves are compared with their codec; a
//! node whose class changed is stored whole.
//!
//! [`DataPatchFlags`] modulate the diff per address and propagate down the
//! tree, see [`calculate_data_flags_at_address`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};
use void_core::ClassId;

use crate::class::{name_hash, Reflected};
use crate::clone::Cloner;
use crate::error::{ReflectError, Result};
use crate::error_handler::ErrorHandler;
use crate::registry::TypeRegistry;
use crate::schema::ClassSchema;
use crate::stream::ObjectStream;

/// Path from a patch root to one node
pub type DataAddress = Vec<u64>;

/// Flags keyed by address
pub type FlagsMap = BTreeMap<DataAddress, DataPatchFlags>;

// ============================================================================
// Flags
// ============================================================================

/// Per-address override flags
///
/// `*_SET` bits are what a user sets on an address. `*_EFFECT` bits are what
/// is in force at an address after inheritance from its ancestors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DataPatchFlags(u8);

impl DataPatchFlags {
    pub const NONE: DataPatchFlags = DataPatchFlags(0);
    /// Store the target value even when it equals the source
    pub const FORCE_OVERRIDE_SET: DataPatchFlags = DataPatchFlags(1 << 0);
    /// Instances may not override the value
    pub const PREVENT_OVERRIDE_SET: DataPatchFlags = DataPatchFlags(1 << 1);
    /// The property is hidden from instances
    pub const HIDE_PROPERTY_SET: DataPatchFlags = DataPatchFlags(1 << 2);
    pub const FORCE_OVERRIDE_EFFECT: DataPatchFlags = DataPatchFlags(1 << 3);
    pub const PREVENT_OVERRIDE_EFFECT: DataPatchFlags = DataPatchFlags(1 << 4);
    pub const HIDE_PROPERTY_EFFECT: DataPatchFlags = DataPatchFlags(1 << 5);

    pub const SET_MASK: DataPatchFlags = DataPatchFlags(0x07);
    pub const EFFECT_MASK: DataPatchFlags = DataPatchFlags(0x38);

    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        DataPatchFlags(bits)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether any bit of `other` is set
    #[inline]
    pub const fn intersects(self, other: DataPatchFlags) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn contains(self, other: DataPatchFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: DataPatchFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: DataPatchFlags) {
        self.0 &= !other.0;
    }
}

impl core::ops::BitOr for DataPatchFlags {
    type Output = DataPatchFlags;

    fn bitor(self, rhs: DataPatchFlags) -> DataPatchFlags {
        DataPatchFlags(self.0 | rhs.0)
    }
}

impl core::ops::BitAnd for DataPatchFlags {
    type Output = DataPatchFlags;

    fn bitand(self, rhs: DataPatchFlags) -> DataPatchFlags {
        DataPatchFlags(self.0 & rhs.0)
    }
}

impl fmt::Debug for DataPatchFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataPatchFlags({:#04x})", self.0)
    }
}

/// Flags in force at `address`
///
/// Effects inherited from the parent pass down. Prevent and hide bits set
/// on the source become effects, flags set on the target are taken whole
/// and a forced override on the target becomes an effect.
pub fn calculate_data_flags_at_address(
    address: &[u64],
    source_flags: &FlagsMap,
    target_flags: &FlagsMap,
    parent: DataPatchFlags,
) -> DataPatchFlags {
    let mut flags = parent & DataPatchFlags::EFFECT_MASK;

    if let Some(source) = source_flags.get(address) {
        if source.intersects(DataPatchFlags::PREVENT_OVERRIDE_SET | DataPatchFlags::PREVENT_OVERRIDE_EFFECT) {
            flags.insert(DataPatchFlags::PREVENT_OVERRIDE_EFFECT);
        }
        if source.intersects(DataPatchFlags::HIDE_PROPERTY_SET | DataPatchFlags::HIDE_PROPERTY_EFFECT) {
            flags.insert(DataPatchFlags::HIDE_PROPERTY_EFFECT);
        }
    }

    if let Some(target) = target_flags.get(address) {
        flags.insert(*target);
        if target.contains(DataPatchFlags::FORCE_OVERRIDE_SET) {
            flags.insert(DataPatchFlags::FORCE_OVERRIDE_EFFECT);
        }
    }
    flags
}

// ============================================================================
// Borrowed sources
// ============================================================================

/// One field of a [`ContainerView`]
pub enum ViewField<'a> {
    /// Borrowed elements standing in for a container field
    Elements {
        container_class: ClassId,
        elements: Vec<&'a dyn Reflected>,
    },
    /// A borrowed object standing in for a value field
    Object(&'a dyn Reflected),
}

/// An object of some class assembled from borrowed parts
///
/// Used as the source of a diff or patch when the source elements are
/// owned elsewhere and copying them into a container would be wasted work.
pub struct ContainerView<'a> {
    class_id: ClassId,
    fields: Vec<(u32, ViewField<'a>)>,
}

impl<'a> ContainerView<'a> {
    pub fn new(class_id: ClassId) -> Self {
        Self {
            class_id,
            fields: Vec::new(),
        }
    }

    /// Stand in borrowed elements for the container field `name`
    pub fn with_elements(
        mut self,
        name: &str,
        container_class: ClassId,
        elements: Vec<&'a dyn Reflected>,
    ) -> Self {
        self.fields.push((
            name_hash(name),
            ViewField::Elements {
                container_class,
                elements,
            },
        ));
        self
    }

    /// Stand in a borrowed object for the value field `name`
    pub fn with_object(mut self, name: &str, object: &'a dyn Reflected) -> Self {
        self.fields.push((name_hash(name), ViewField::Object(object)));
        self
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    pub fn fields(&self) -> &[(u32, ViewField<'a>)] {
        &self.fields
    }

    /// Build an owned object with copies of the viewed parts
    pub fn materialize(&self, registry: &TypeRegistry) -> Result<Box<dyn Reflected>> {
        let schema = registry
            .find_class(self.class_id)
            .ok_or(ReflectError::UnknownClass(self.class_id))?;
        let mut object = schema.create().ok_or_else(|| ReflectError::NoFactory {
            name: schema.name().to_string(),
            id: schema.id(),
        })?;
        let cloner = Cloner::new(registry);

        for (hash, part) in &self.fields {
            let Some(field) = schema.field_by_hash(*hash) else {
                warn!("{} has no field with hash {:#x}", schema.name(), hash);
                continue;
            };
            match part {
                ViewField::Object(source) => {
                    if field.is_pointer() {
                        field.set_pointer(&mut *object, Some(cloner.clone_object(*source)?));
                    } else if let Some(slot) = field.get_mut(&mut *object) {
                        cloner.clone_object_inplace(*source, slot)?;
                    }
                }
                ViewField::Elements { container_class, elements } => {
                    let adapter = registry
                        .find_class(*container_class)
                        .and_then(ClassSchema::container)
                        .ok_or(ReflectError::UnknownClass(*container_class))?;
                    let Some(slot) = field.get_mut(&mut *object) else {
                        continue;
                    };
                    adapter.clear_elements(slot);
                    for element in elements {
                        let copy = cloner.clone_object(*element)?;
                        adapter
                            .store_element(slot, copy)
                            .map_err(|_| ReflectError::ContainerMismatch(schema.name().to_string()))?;
                    }
                }
            }
        }
        Ok(object)
    }
}

/// Source of a diff or patch
#[derive(Clone, Copy)]
pub enum PatchSource<'a> {
    Object(&'a dyn Reflected),
    View(&'a ContainerView<'a>),
}

impl<'a> From<&'a dyn Reflected> for PatchSource<'a> {
    fn from(object: &'a dyn Reflected) -> Self {
        PatchSource::Object(object)
    }
}

impl<'a> From<&'a ContainerView<'a>> for PatchSource<'a> {
    fn from(view: &'a ContainerView<'a>) -> Self {
        PatchSource::View(view)
    }
}

#[derive(Clone, Copy)]
enum SourceNode<'a> {
    Object(&'a dyn Reflected),
    Elements(ClassId, &'a [&'a dyn Reflected]),
    View(&'a ContainerView<'a>),
}

impl<'a> SourceNode<'a> {
    fn class_id(&self) -> ClassId {
        match self {
            SourceNode::Object(object) => object.class_id(),
            SourceNode::Elements(class_id, _) => *class_id,
            SourceNode::View(view) => view.class_id,
        }
    }
}

impl<'a> From<PatchSource<'a>> for SourceNode<'a> {
    fn from(source: PatchSource<'a>) -> Self {
        match source {
            PatchSource::Object(object) => SourceNode::Object(object),
            PatchSource::View(view) => SourceNode::View(view),
        }
    }
}

/// Key of a container element: its persistent identity, else its index
pub fn element_key(registry: &TypeRegistry, element: &dyn Reflected, index: usize) -> u64 {
    registry
        .find_class(element.class_id())
        .and_then(|schema| schema.persistent_id(element))
        .unwrap_or(index as u64)
}

fn keyed_elements<'a>(
    registry: &TypeRegistry,
    elements: impl Iterator<Item = &'a dyn Reflected>,
) -> Vec<(u64, &'a dyn Reflected)> {
    elements
        .enumerate()
        .map(|(index, element)| (element_key(registry, element, index), element))
        .collect()
}

/// Keyed children of an object, null pointers excluded
fn object_children<'a>(
    registry: &TypeRegistry,
    object: &'a dyn Reflected,
) -> Vec<(u64, &'a dyn Reflected)> {
    let Some(schema) = registry.find_class(object.class_id()) else {
        return Vec::new();
    };
    if let Some(container) = schema.container() {
        let elements = (0..container.size(object)).filter_map(|i| container.element(object, i));
        return keyed_elements(registry, elements);
    }
    schema
        .fields()
        .iter()
        .filter_map(|field| field.get(object).map(|child| (u64::from(field.name_hash()), child)))
        .collect()
}

fn source_children<'a>(registry: &TypeRegistry, node: SourceNode<'a>) -> Vec<(u64, SourceNode<'a>)> {
    match node {
        SourceNode::Object(object) => object_children(registry, object)
            .into_iter()
            .map(|(key, child)| (key, SourceNode::Object(child)))
            .collect(),
        SourceNode::Elements(_, elements) => keyed_elements(registry, elements.iter().copied())
            .into_iter()
            .map(|(key, child)| (key, SourceNode::Object(child)))
            .collect(),
        SourceNode::View(view) => view
            .fields
            .iter()
            .map(|(hash, part)| {
                let child = match part {
                    ViewField::Object(object) => SourceNode::Object(*object),
                    ViewField::Elements {
                        container_class,
                        elements,
                    } => SourceNode::Elements(*container_class, elements.as_slice()),
                };
                (u64::from(*hash), child)
            })
            .collect(),
    }
}

/// Whether `address` names an existing node below `root`
pub fn address_resolves(registry: &TypeRegistry, root: &dyn Reflected, address: &[u64]) -> bool {
    let mut node = root;
    for key in address {
        match object_children(registry, node)
            .into_iter()
            .find(|(child_key, _)| child_key == key)
        {
            Some((_, child)) => node = child,
            None => return false,
        }
    }
    true
}

// ============================================================================
// Patch
// ============================================================================

/// Divergence of a target graph from a source graph
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPatch {
    target_class: ClassId,
    #[serde(with = "address_map")]
    patch: BTreeMap<DataAddress, Vec<u8>>,
}

crate::impl_class!(DataPatch, "DataPatch");

impl fmt::Debug for DataPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPatch")
            .field("target_class", &self.target_class)
            .field("addresses", &self.patch.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DataPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `target` against `source`
    pub fn create<'a>(
        registry: &TypeRegistry,
        source: impl Into<PatchSource<'a>>,
        target: &dyn Reflected,
        source_flags: &FlagsMap,
        target_flags: &FlagsMap,
    ) -> Result<DataPatch> {
        let mut diff = Differ {
            registry,
            stream: ObjectStream::new(registry),
            source_flags,
            target_flags,
            patch: BTreeMap::new(),
        };
        let source: PatchSource<'a> = source.into();
        let mut address = Vec::new();
        diff.diff(
            Some(SourceNode::from(source)),
            Some(target),
            &mut address,
            DataPatchFlags::NONE,
        )?;
        Ok(DataPatch {
            target_class: target.class_id(),
            patch: diff.patch,
        })
    }

    /// Class of the patched root
    pub fn target_class(&self) -> ClassId {
        self.target_class
    }

    pub fn is_empty(&self) -> bool {
        self.patch.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patch.len()
    }

    /// Stored bytes at an address; empty bytes mean removal
    pub fn get(&self, address: &[u64]) -> Option<&[u8]> {
        self.patch.get(address).map(Vec::as_slice)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &DataAddress> {
        self.patch.keys()
    }

    /// Encode the patch for persistence
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<DataPatch> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Build a patched copy of `source`
    pub fn apply<'a>(
        &self,
        registry: &TypeRegistry,
        source: impl Into<PatchSource<'a>>,
        source_flags: &FlagsMap,
        target_flags: &FlagsMap,
    ) -> Result<Box<dyn Reflected>> {
        let source = source.into();
        if let Some(root) = self.patch.get::<[u64]>(&[]) {
            if root.is_empty() {
                return Err(ReflectError::Codec("patch removes its root".to_string()));
            }
            return self.load_value(registry, root);
        }

        let mut object = match source {
            PatchSource::Object(object) => Cloner::new(registry).clone_object(object)?,
            PatchSource::View(view) => view.materialize(registry)?,
        };
        self.apply_inplace(registry, &mut *object, source_flags, target_flags)?;
        Ok(object)
    }

    /// Patch an object already holding the source state
    pub fn apply_inplace(
        &self,
        registry: &TypeRegistry,
        object: &mut dyn Reflected,
        source_flags: &FlagsMap,
        target_flags: &FlagsMap,
    ) -> Result<()> {
        if self.patch.is_empty() {
            return Ok(());
        }
        if !self.target_class.is_null() && object.class_id() != self.target_class {
            return Err(ReflectError::ClassMismatch {
                expected: self.target_class,
                found: object.class_id(),
            });
        }
        let patcher = Patcher {
            patch: self,
            registry,
            source_flags,
            target_flags,
        };
        let mut address = Vec::new();
        let flags = calculate_data_flags_at_address(&address, source_flags, target_flags, DataPatchFlags::NONE);
        if flags.contains(DataPatchFlags::PREVENT_OVERRIDE_EFFECT) {
            return Ok(());
        }
        patcher.apply_node(object, &mut address, flags)
    }

    fn load_value(&self, registry: &TypeRegistry, bytes: &[u8]) -> Result<Box<dyn Reflected>> {
        let mut errors = ErrorHandler::new();
        let value = ObjectStream::new(registry).load(bytes, &mut errors)?;
        match errors.error_count() {
            0 => Ok(value),
            count => Err(ReflectError::Incomplete(count)),
        }
    }

    /// Next address components below `address`
    fn child_keys(&self, address: &[u64]) -> BTreeSet<u64> {
        self.patch
            .range(address.to_vec()..)
            .take_while(|(key, _)| key.starts_with(address))
            .filter(|(key, _)| key.len() > address.len())
            .map(|(key, _)| key[address.len()])
            .collect()
    }
}

struct Differ<'r, 'f> {
    registry: &'r TypeRegistry,
    stream: ObjectStream<'r>,
    source_flags: &'f FlagsMap,
    target_flags: &'f FlagsMap,
    patch: BTreeMap<DataAddress, Vec<u8>>,
}

impl<'r, 'f> Differ<'r, 'f> {
    fn store(&mut self, address: &[u64], target: &dyn Reflected) -> Result<()> {
        let mut errors = ErrorHandler::new();
        let bytes = self.stream.save(target, &mut errors)?;
        if errors.error_count() > 0 {
            return Err(ReflectError::Incomplete(errors.error_count()));
        }
        self.patch.insert(address.to_vec(), bytes);
        Ok(())
    }

    fn diff(
        &mut self,
        source: Option<SourceNode<'_>>,
        target: Option<&dyn Reflected>,
        address: &mut DataAddress,
        parent: DataPatchFlags,
    ) -> Result<()> {
        let flags = calculate_data_flags_at_address(address, self.source_flags, self.target_flags, parent);
        if flags.contains(DataPatchFlags::PREVENT_OVERRIDE_EFFECT) {
            return Ok(());
        }

        let (source, target) = match (source, target) {
            (None, None) => return Ok(()),
            (Some(_), None) => {
                self.patch.insert(address.clone(), Vec::new());
                return Ok(());
            }
            (None, Some(target)) => return self.store(address, target),
            (Some(source), Some(target)) => (source, target),
        };

        if source.class_id() != target.class_id() {
            return self.store(address, target);
        }
        let schema = self
            .registry
            .find_class(target.class_id())
            .ok_or(ReflectError::UnknownClass(target.class_id()))?;

        if let Some(codec) = schema.codec() {
            let SourceNode::Object(source) = source else {
                return self.store(address, target);
            };
            if flags.contains(DataPatchFlags::FORCE_OVERRIDE_EFFECT)
                || !codec.compare_value_data(source, target)
            {
                self.store(address, target)?;
            }
            return Ok(());
        }

        let source_children = source_children(self.registry, source);
        let target_children = object_children(self.registry, target);
        let by_key: HashMap<u64, SourceNode<'_>> = source_children.iter().copied().collect();

        for (key, child) in &target_children {
            address.push(*key);
            self.diff(by_key.get(key).copied(), Some(*child), address, flags)?;
            address.pop();
        }
        let target_keys: BTreeSet<u64> = target_children.iter().map(|(key, _)| *key).collect();
        for (key, child) in source_children {
            if target_keys.contains(&key) {
                continue;
            }
            address.push(key);
            self.diff(Some(child), None, address, flags)?;
            address.pop();
        }
        Ok(())
    }
}

struct Patcher<'p, 'r, 'f> {
    patch: &'p DataPatch,
    registry: &'r TypeRegistry,
    source_flags: &'f FlagsMap,
    target_flags: &'f FlagsMap,
}

impl<'p, 'r, 'f> Patcher<'p, 'r, 'f> {
    fn flags_at(&self, address: &[u64], parent: DataPatchFlags) -> DataPatchFlags {
        calculate_data_flags_at_address(address, self.source_flags, self.target_flags, parent)
    }

    fn apply_node(
        &self,
        object: &mut dyn Reflected,
        address: &mut DataAddress,
        flags: DataPatchFlags,
    ) -> Result<()> {
        let keys = self.patch.child_keys(address);
        if keys.is_empty() {
            return Ok(());
        }
        let schema = self
            .registry
            .find_class(object.class_id())
            .ok_or(ReflectError::UnknownClass(object.class_id()))?;
        let handler = schema.event_handler();
        if let Some(handler) = handler {
            handler.on_patch_begin(object);
        }

        let result = if schema.container().is_some() {
            self.apply_container(object, schema, keys, address, flags)
        } else {
            self.apply_fields(object, schema, keys, address, flags)
        };

        if let Some(handler) = handler {
            handler.on_patch_end(object);
        }
        result
    }

    fn apply_fields(
        &self,
        object: &mut dyn Reflected,
        schema: &ClassSchema,
        keys: BTreeSet<u64>,
        address: &mut DataAddress,
        flags: DataPatchFlags,
    ) -> Result<()> {
        let cloner = Cloner::new(self.registry);
        for key in keys {
            let Some(field) = u32::try_from(key).ok().and_then(|hash| schema.field_by_hash(hash)) else {
                warn!("{} has no field for patch key {:#x}", schema.name(), key);
                continue;
            };
            address.push(key);
            let child_flags = self.flags_at(address, flags);
            if !child_flags.contains(DataPatchFlags::PREVENT_OVERRIDE_EFFECT) {
                match self.patch.patch.get(address.as_slice()) {
                    Some(bytes) if bytes.is_empty() => {
                        if !field.set_pointer(object, None) {
                            warn!("patch removes value field {} of {}", field.name(), schema.name());
                        }
                    }
                    Some(bytes) => {
                        let value = self.patch.load_value(self.registry, bytes)?;
                        if field.is_pointer() {
                            field.set_pointer(object, Some(value));
                        } else if let Some(slot) = field.get_mut(object) {
                            cloner.clone_object_inplace(&*value, slot)?;
                        }
                    }
                    None => match field.get_mut(object) {
                        Some(child) => self.apply_node(child, address, child_flags)?,
                        None => warn!("patch address {:?} has no data to patch", address),
                    },
                }
            }
            address.pop();
        }
        Ok(())
    }

    fn apply_container(
        &self,
        object: &mut dyn Reflected,
        schema: &ClassSchema,
        keys: BTreeSet<u64>,
        address: &mut DataAddress,
        flags: DataPatchFlags,
    ) -> Result<()> {
        let Some(container) = schema.container() else {
            return Ok(());
        };
        let index_of: HashMap<u64, usize> = (0..container.size(object))
            .filter_map(|index| {
                container
                    .element(object, index)
                    .map(|element| (element_key(self.registry, element, index), index))
            })
            .collect();

        let mut removals = Vec::new();
        let mut additions = Vec::new();
        for key in keys {
            address.push(key);
            let child_flags = self.flags_at(address, flags);
            if !child_flags.contains(DataPatchFlags::PREVENT_OVERRIDE_EFFECT) {
                let existing = index_of.get(&key).copied();
                match (self.patch.patch.get(address.as_slice()), existing) {
                    (Some(bytes), Some(index)) if bytes.is_empty() => removals.push(index),
                    (Some(bytes), None) if bytes.is_empty() => {}
                    (Some(bytes), Some(index)) => {
                        let value = self.patch.load_value(self.registry, bytes)?;
                        container
                            .replace_element(object, index, value)
                            .map_err(|_| ReflectError::ContainerMismatch(schema.name().to_string()))?;
                    }
                    (Some(bytes), None) => additions.push(self.patch.load_value(self.registry, bytes)?),
                    (None, Some(index)) => {
                        if let Some(element) = container.element_mut(object, index) {
                            self.apply_node(element, address, child_flags)?;
                        }
                    }
                    (None, None) => warn!("patch address {:?} has no element to patch", address),
                }
            }
            address.pop();
        }

        removals.sort_unstable_by(|a, b| b.cmp(a));
        for index in removals {
            container.remove_element(object, index);
        }
        for value in additions {
            container
                .store_element(object, value)
                .map_err(|_| ReflectError::ContainerMismatch(schema.name().to_string()))?;
        }
        Ok(())
    }
}

/// Serde adapter storing address-keyed maps as a sequence of pairs
///
/// Text formats only accept string map keys.
pub mod address_map {
    use std::collections::BTreeMap;

    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::DataAddress;

    pub fn serialize<V, S>(map: &BTreeMap<DataAddress, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, V, D>(deserializer: D) -> Result<BTreeMap<DataAddress, V>, D::Error>
    where
        V: DeserializeOwned,
        D: Deserializer<'de>,
    {
        let pairs: Vec<(DataAddress, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

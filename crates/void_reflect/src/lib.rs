//! # void_reflect - Runtime Reflection for Object Graphs
//!
//! Schema-driven introspection of arbitrary object graphs:
//! - **Type registry**: class schemas keyed by stable [`ClassId`]s, with
//!   base classes, polymorphic pointers and generic containers
//! - **Object walker**: depth-first traversal with begin/end callbacks
//! - **Cloner**: deep copies, merging containers by persistent identity
//! - **Object stream**: binary or JSON persistence with version converters
//!   and deprecated classes
//! - **Data patches**: address-keyed diffs between two graphs, modulated by
//!   per-address override flags
//!
//! ## Example
//!
//! ```ignore
//! use void_reflect::prelude::*;
//!
//! #[derive(Default)]
//! struct Health { current: u32, max: u32 }
//! impl_class!(Health, "Health");
//!
//! let mut registry = TypeRegistry::new();
//! registry.register_class(
//!     ClassSchema::builder::<Health>()
//!         .field("current", |h| &h.current, |h| &mut h.current)
//!         .field("max", |h| &h.max, |h| &mut h.max)
//!         .build(),
//! );
//!
//! let copy: Health = Cloner::new(&registry).clone_typed(&Health { current: 3, max: 10 })?;
//! ```

pub mod class;
pub mod clone;
pub mod codec;
pub mod container;
pub mod error;
pub mod error_handler;
pub mod patch;
pub mod registry;
pub mod schema;
pub mod stream;
pub mod walker;

pub use void_core::{ClassId, ClassVersion, EntityId, InstanceId};

pub use class::{downcast_box, name_hash, text_hash, Class, Reflected, ANY_CLASS_ID};
pub use clone::Cloner;
pub use codec::{Codec, SerdeCodec};
pub use container::{ContainerAdapter, PointerVecAdapter, VecAdapter};
pub use error::{ReflectError, Result};
pub use error_handler::{ErrorHandler, StackFrame};
pub use patch::{
    address_resolves, calculate_data_flags_at_address, element_key, ContainerView, DataAddress,
    DataPatch, DataPatchFlags, FlagsMap, PatchSource, ViewField,
};
pub use registry::{GenericSchemaFn, TypeRegistry};
pub use schema::{
    ClassBuilder, ClassSchema, EventHandler, FieldDescriptor, FieldFlags, VersionConverter,
};
pub use stream::{
    DataElementNode, LoadFilter, ObjectStream, ObjectStreamConfig, StreamDocument, StreamFormat,
};
pub use walker::{AccessFlags, ObjectWalker};

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::class::{Class, Reflected, ANY_CLASS_ID};
    pub use crate::clone::Cloner;
    pub use crate::error::ReflectError;
    pub use crate::error_handler::ErrorHandler;
    pub use crate::impl_class;
    pub use crate::patch::{ContainerView, DataPatch, DataPatchFlags, FlagsMap};
    pub use crate::registry::TypeRegistry;
    pub use crate::schema::{ClassSchema, EventHandler};
    pub use crate::stream::{DataElementNode, ObjectStream, ObjectStreamConfig};
    pub use crate::walker::{AccessFlags, ObjectWalker};
    pub use void_core::{ClassId, EntityId, InstanceId};
}

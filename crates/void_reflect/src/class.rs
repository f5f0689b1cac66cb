//! Reflected objects and compile-time class identity
//!
//! Every type the registry can introspect implements [`Class`]; the blanket
//! impl turns it into a [`Reflected`] trait object. Reflection always goes
//! through `&dyn Reflected` plus a [`ClassSchema`](crate::ClassSchema), so
//! identity never depends on `core::any::TypeId` layout of a particular
//! build.

use core::any::Any;
use void_core::{fnv1a_64, ClassId, EntityId, InstanceId};

use crate::schema::ClassSchema;

/// Declared class of fields and containers that accept any reflected object
pub const ANY_CLASS_ID: ClassId = ClassId::from_name("Reflected");

/// An object the registry can introspect
pub trait Reflected: Any + Send + Sync {
    /// Class id of the concrete object
    fn class_id(&self) -> ClassId;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Static class identity of a reflected type
pub trait Class: Any + Send + Sync + Default {
    /// Stable class id
    const CLASS_ID: ClassId;

    /// Human-readable class name
    fn class_name() -> String;

    /// Schema generator for generic specializations such as `Vec<T>`
    ///
    /// Fields of a generic class type register their schema on first use,
    /// so specializations never need manual registration.
    fn generic_schema() -> Option<ClassSchema> {
        None
    }
}

impl<T: Class> Reflected for T {
    fn class_id(&self) -> ClassId {
        T::CLASS_ID
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl<'r> dyn Reflected + 'r {
    /// Check the concrete type
    pub fn is<T: Class>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Downcast to a concrete class
    pub fn downcast_ref<T: Class>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Downcast to a concrete class (mutable)
    pub fn downcast_mut<T: Class>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Downcast a boxed reflected object to its concrete class
pub fn downcast_box<T: Class>(object: Box<dyn Reflected>) -> Result<Box<T>, Box<dyn Reflected>> {
    if object.is::<T>() {
        match object.into_any().downcast::<T>() {
            Ok(typed) => Ok(typed),
            // `is` was checked above, this arm is unreachable in practice
            Err(_) => Err(Box::new(T::default())),
        }
    } else {
        Err(object)
    }
}

/// Implement [`Class`] for a type under a stable name
///
/// ```ignore
/// #[derive(Default)]
/// struct Transform { position: [f32; 3] }
/// impl_class!(Transform, "Transform");
/// ```
#[macro_export]
macro_rules! impl_class {
    ($ty:ty, $name:expr) => {
        impl $crate::Class for $ty {
            const CLASS_ID: $crate::ClassId = $crate::ClassId::from_name($name);

            fn class_name() -> ::std::string::String {
                ::std::string::String::from($name)
            }
        }
    };
}

impl_class!(bool, "bool");
impl_class!(u8, "u8");
impl_class!(u16, "u16");
impl_class!(u32, "u32");
impl_class!(u64, "u64");
impl_class!(i8, "i8");
impl_class!(i16, "i16");
impl_class!(i32, "i32");
impl_class!(i64, "i64");
impl_class!(f32, "f32");
impl_class!(f64, "f64");
impl_class!(String, "String");
impl_class!(ClassId, "ClassId");
impl_class!(EntityId, "EntityId");
impl_class!(InstanceId, "InstanceId");

const VEC_CLASS_ID: ClassId = ClassId::from_name("Vec");

impl<T: Class> Class for Vec<T> {
    const CLASS_ID: ClassId = VEC_CLASS_ID.combine(T::CLASS_ID);

    fn class_name() -> String {
        format!("Vec<{}>", T::class_name())
    }

    fn generic_schema() -> Option<ClassSchema> {
        Some(ClassSchema::vec::<T>())
    }
}

impl Class for Vec<Box<dyn Reflected>> {
    const CLASS_ID: ClassId = VEC_CLASS_ID.combine(ANY_CLASS_ID);

    fn class_name() -> String {
        String::from("Vec<Box<Reflected>>")
    }

    fn generic_schema() -> Option<ClassSchema> {
        Some(ClassSchema::pointer_vec())
    }
}

/// Hash of a field or element name, as stored in data addresses
pub const fn name_hash(name: &str) -> u32 {
    void_core::fnv1a_32(name.as_bytes())
}

/// 64-bit hash of arbitrary text, for persistent identities built from names
pub const fn text_hash(text: &str) -> u64 {
    fnv1a_64(text.as_bytes())
}

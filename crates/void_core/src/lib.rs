//! # void_core - Object Graph Core
//!
//! Leaf primitives shared by the reflection and composition crates:
//! - **Stable class ids**: FNV-1a hashes that survive crate and build boundaries
//! - **Entity and instance ids**: opaque 64-bit handles from an [`IdGenerator`]
//! - **Class versions**: schema versions with a deprecation sentinel
//!
//! Nothing here depends on a registry; these types are plain values.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std as alloc;

pub mod id;
pub mod version;

pub use id::*;
pub use version::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::id::{fnv1a_32, fnv1a_64, ClassId, EntityId, IdGenerator, InstanceId};
    pub use crate::version::ClassVersion;
}

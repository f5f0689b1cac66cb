//! Class schema versions
//!
//! A class version is a plain counter bumped whenever the stored layout of a
//! class changes. The maximum value is reserved as the "deprecated" marker:
//! a class at that version is terminal and its stored instances are dropped.

use core::fmt;

/// Version of a reflected class layout
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassVersion(u32);

impl ClassVersion {
    /// Initial version of every class
    pub const INITIAL: ClassVersion = ClassVersion(0);

    /// Sentinel marking a deprecated class
    pub const DEPRECATED: ClassVersion = ClassVersion(u32::MAX);

    /// Create a version
    #[inline]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Get the raw version number
    #[inline]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Check for the deprecation sentinel
    #[inline]
    pub const fn is_deprecated(&self) -> bool {
        self.0 == u32::MAX
    }
}

impl From<u32> for ClassVersion {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Debug for ClassVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_deprecated() {
            write!(f, "ClassVersion(deprecated)")
        } else {
            write!(f, "ClassVersion({})", self.0)
        }
    }
}

impl fmt::Display for ClassVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_deprecated() {
            write!(f, "deprecated")
        } else {
            write!(f, "v{}", self.0)
        }
    }
}

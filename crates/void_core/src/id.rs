//! Stable identifiers
//!
//! Class ids are FNV-1a hashes of the class name, so two builds (or two
//! crates linked into one build) agree on the id of a type without sharing
//! a process-global table. Entity and instance ids are opaque 64-bit values
//! handed out by an [`IdGenerator`]; zero is reserved for "invalid".

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;
const FNV32_OFFSET: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// 64-bit FNV-1a hash, usable in const context
pub const fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV64_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV64_PRIME);
        i += 1;
    }
    hash
}

/// 32-bit FNV-1a hash, used for field name hashes
pub const fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV32_PRIME);
        i += 1;
    }
    hash
}

/// Stable identifier of a reflected class
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassId(u64);

impl ClassId {
    /// The null class id
    pub const NULL: ClassId = ClassId(0);

    /// Create a class id from a class name
    #[inline]
    pub const fn from_name(name: &str) -> Self {
        Self(fnv1a_64(name.as_bytes()))
    }

    /// Create from raw bits
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Get the raw bits
    #[inline]
    pub const fn to_bits(&self) -> u64 {
        self.0
    }

    /// Check if this is the null id
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Derive the id of a generic specialization (`Vec` combined with `T`)
    ///
    /// Order matters: `a.combine(b) != b.combine(a)`.
    #[inline]
    pub const fn combine(self, argument: ClassId) -> Self {
        let mut hash = self.0;
        let bytes = argument.0.to_le_bytes();
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(FNV64_PRIME);
            i += 1;
        }
        Self(hash)
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({:016x})", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifier of an entity within an owning graph
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityId(u64);

impl EntityId {
    /// The invalid entity id
    pub const INVALID: EntityId = EntityId(0);

    /// Create from a raw value
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Check if this id refers to anything
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Generate a fresh id from the process-wide entity generator
    #[cfg(feature = "std")]
    pub fn generate() -> Self {
        Self(global::entity_ids().next_raw())
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "EntityId({:016x})", self.0)
        } else {
            write!(f, "EntityId(invalid)")
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:016x}]", self.0)
    }
}

/// Identifier of one composition instance
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstanceId(u64);

impl InstanceId {
    /// The null instance id
    pub const NULL: InstanceId = InstanceId(0);

    /// Create from a raw value
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Check if this is the null id
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Generate a fresh id from the process-wide instance generator
    #[cfg(feature = "std")]
    pub fn generate() -> Self {
        Self(global::instance_ids().next_raw())
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({:016x})", self.0)
    }
}

/// Thread-safe id generator
///
/// Each call scrambles a monotonically increasing counter through the
/// splitmix64 finalizer. The finalizer is a bijection, so one generator
/// never repeats a value; the seed keeps separate runs apart.
pub struct IdGenerator {
    seed: u64,
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a generator with a fixed seed
    pub const fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            next: AtomicU64::new(1),
        }
    }

    /// Create a generator with seed zero
    pub const fn new() -> Self {
        Self::with_seed(0)
    }

    /// Generate the next raw id (never zero)
    pub fn next_raw(&self) -> u64 {
        loop {
            let counter = self.next.fetch_add(1, Ordering::Relaxed);
            let value = splitmix64(counter ^ self.seed);
            if value != 0 {
                return value;
            }
        }
    }

    /// Generate the next entity id
    pub fn next_entity(&self) -> EntityId {
        EntityId(self.next_raw())
    }

    /// Generate the next instance id
    pub fn next_instance(&self) -> InstanceId {
        InstanceId(self.next_raw())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

const fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(feature = "std")]
mod global {
    use super::IdGenerator;
    use std::sync::OnceLock;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn clock_seed(salt: u64) -> u64 {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        nanos ^ ((std::process::id() as u64) << 32) ^ salt
    }

    pub fn entity_ids() -> &'static IdGenerator {
        static ENTITIES: OnceLock<IdGenerator> = OnceLock::new();
        ENTITIES.get_or_init(|| IdGenerator::with_seed(clock_seed(0x454e_5449_5459)))
    }

    pub fn instance_ids() -> &'static IdGenerator {
        static INSTANCES: OnceLock<IdGenerator> = OnceLock::new();
        INSTANCES.get_or_init(|| IdGenerator::with_seed(clock_seed(0x494e_5354)))
    }
}

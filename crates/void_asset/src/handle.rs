//! Asset handles
//!
//! Handles are cheap references to catalog entries. Every handle of one
//! asset shares the load state the catalog updates.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stable identifier of an asset
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub u64);

impl AssetId {
    /// Create a new asset ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Asset ID derived from a path or other stable name
    pub const fn from_name(name: &str) -> Self {
        Self(void_core::fnv1a_64(name.as_bytes()))
    }

    /// Invalid asset ID
    pub const fn invalid() -> Self {
        Self(u64::MAX)
    }

    /// Check if valid
    pub const fn is_valid(&self) -> bool {
        self.0 != u64::MAX
    }

    /// Get raw ID value
    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "AssetId({:016x})", self.0)
        } else {
            write!(f, "AssetId(invalid)")
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:016x}}}", self.0)
    }
}

void_reflect::impl_class!(AssetId, "AssetId");

/// Load state for an asset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadState {
    /// Registered, no data yet
    NotLoaded = 0,
    /// Data is available
    Loaded = 1,
}

impl From<u8> for LoadState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Loaded,
            _ => Self::NotLoaded,
        }
    }
}

/// State shared between the catalog and every handle of one asset
pub struct HandleData {
    pub id: AssetId,
    state: AtomicU8,
}

impl HandleData {
    pub fn new(id: AssetId) -> Self {
        Self {
            id,
            state: AtomicU8::new(LoadState::NotLoaded as u8),
        }
    }

    pub fn state(&self) -> LoadState {
        LoadState::from(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: LoadState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Handle to an asset of type `T`
pub struct Handle<T> {
    data: Arc<HandleData>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Create from shared handle data
    pub fn from_data(data: Arc<HandleData>) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> AssetId {
        self.data.id
    }

    pub fn state(&self) -> LoadState {
        self.data.state()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self::from_data(self.data.clone())
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data.id == other.data.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.id.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.data.id)
            .field("state", &self.state())
            .finish()
    }
}

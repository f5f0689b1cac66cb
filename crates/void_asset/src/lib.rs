//! # void_asset - Shared Assets
//!
//! Asset identity and availability for the composition engine:
//! - Stable asset ids that reflect as leaf values
//! - Handles sharing the load state of their asset
//! - An in-memory catalog publishing change events over channels
//!
//! ## Example
//!
//! ```ignore
//! use void_asset::prelude::*;
//!
//! let catalog = AssetCatalog::new();
//! let events = catalog.subscribe();
//!
//! let handle = catalog.insert(AssetId::from_name("levels/town"), "levels/town", level);
//! if catalog.is_ready(&handle) {
//!     let level = catalog.get(&handle);
//! }
//!
//! for event in events.try_iter() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod catalog;
pub mod handle;

pub use catalog::{AssetCatalog, AssetEvent, AssetProvider};
pub use handle::{AssetId, Handle, HandleData, LoadState};

use void_reflect::TypeRegistry;

/// Register the asset leaf classes
pub fn reflect(registry: &mut TypeRegistry) {
    if registry.find_class(<AssetId as void_reflect::Class>::CLASS_ID).is_none() {
        registry.register_leaf::<AssetId>();
    }
}

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::catalog::{AssetCatalog, AssetEvent, AssetProvider};
    pub use crate::handle::{AssetId, Handle, LoadState};
}

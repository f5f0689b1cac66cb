//! Asset catalog - in-memory asset data with change notifications
//!
//! The catalog owns shared asset data by id. Replacing data never mutates
//! the previous value: readers holding an `Arc<T>` keep the old version
//! while new lookups see the replacement. Every state change is published
//! to subscribers as an [`AssetEvent`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::debug;
use parking_lot::RwLock;

use crate::handle::{AssetId, Handle, HandleData, LoadState};

/// Change notification from a catalog
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetEvent {
    /// Asset data became available
    Loaded(AssetId),
    /// Asset data was replaced
    Reloaded(AssetId),
}

impl AssetEvent {
    pub fn id(&self) -> AssetId {
        match self {
            AssetEvent::Loaded(id) | AssetEvent::Reloaded(id) => *id,
        }
    }
}

/// Source of shared assets
///
/// Availability is polled, never awaited: callers check [`is_ready`](Self::is_ready)
/// and fail fast when an asset is missing.
pub trait AssetProvider<T>: Send + Sync {
    /// Handle of a known asset
    fn find_asset(&self, id: AssetId) -> Option<Handle<T>>;

    /// Whether the asset data can be used now
    fn is_ready(&self, handle: &Handle<T>) -> bool;

    /// Current data of an asset
    fn get(&self, handle: &Handle<T>) -> Option<Arc<T>>;

    /// Publish replacement data for a reloaded asset
    ///
    /// Returns `false` if the asset is unknown.
    fn on_asset_reloaded(&self, id: AssetId, data: Arc<T>) -> bool;
}

struct CatalogEntry<T> {
    handle_data: Arc<HandleData>,
    data: Option<Arc<T>>,
}

impl<T> CatalogEntry<T> {
    fn new(id: AssetId, hint: &str) -> Self {
        debug!("Registered asset {} ({})", id, hint);
        Self {
            handle_data: Arc::new(HandleData::new(id)),
            data: None,
        }
    }
}

/// Thread-safe catalog of assets of one type
pub struct AssetCatalog<T> {
    assets: RwLock<BTreeMap<AssetId, CatalogEntry<T>>>,
    subscribers: RwLock<Vec<Sender<AssetEvent>>>,
}

impl<T: Send + Sync + 'static> AssetCatalog<T> {
    pub fn new() -> Self {
        Self {
            assets: RwLock::new(BTreeMap::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Receive every future event of this catalog
    pub fn subscribe(&self) -> Receiver<AssetEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.subscribers.write().push(sender);
        receiver
    }

    fn emit(&self, event: AssetEvent) {
        debug!("Asset event {:?}", event);
        self.subscribers
            .write()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Register an asset without data
    pub fn register(&self, id: AssetId, hint: &str) -> Handle<T> {
        let mut assets = self.assets.write();
        let entry = assets.entry(id).or_insert_with(|| CatalogEntry::new(id, hint));
        Handle::from_data(entry.handle_data.clone())
    }

    /// Store the data of an asset and mark it loaded
    pub fn insert(&self, id: AssetId, hint: &str, data: T) -> Handle<T> {
        self.insert_shared(id, hint, Arc::new(data))
    }

    /// Store already shared data of an asset and mark it loaded
    pub fn insert_shared(&self, id: AssetId, hint: &str, data: Arc<T>) -> Handle<T> {
        let handle = {
            let mut assets = self.assets.write();
            let entry = assets.entry(id).or_insert_with(|| CatalogEntry::new(id, hint));
            entry.data = Some(data);
            entry.handle_data.set_state(LoadState::Loaded);
            Handle::from_data(entry.handle_data.clone())
        };
        self.emit(AssetEvent::Loaded(id));
        handle
    }

    /// Replace the data of a known asset
    ///
    /// Returns `false` if the asset is unknown.
    pub fn reload(&self, id: AssetId, data: Arc<T>) -> bool {
        {
            let mut assets = self.assets.write();
            let Some(entry) = assets.get_mut(&id) else {
                return false;
            };
            entry.data = Some(data);
            entry.handle_data.set_state(LoadState::Loaded);
        }
        self.emit(AssetEvent::Reloaded(id));
        true
    }

    /// Current data of an asset
    pub fn get_by_id(&self, id: AssetId) -> Option<Arc<T>> {
        self.assets.read().get(&id).and_then(|entry| entry.data.clone())
    }

    pub fn state(&self, id: AssetId) -> Option<LoadState> {
        self.assets.read().get(&id).map(|entry| entry.handle_data.state())
    }
}

impl<T: Send + Sync + 'static> Default for AssetCatalog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> AssetProvider<T> for AssetCatalog<T> {
    fn find_asset(&self, id: AssetId) -> Option<Handle<T>> {
        self.assets
            .read()
            .get(&id)
            .map(|entry| Handle::from_data(entry.handle_data.clone()))
    }

    fn is_ready(&self, handle: &Handle<T>) -> bool {
        handle.is_loaded() && self.get_by_id(handle.id()).is_some()
    }

    fn get(&self, handle: &Handle<T>) -> Option<Arc<T>> {
        self.get_by_id(handle.id())
    }

    fn on_asset_reloaded(&self, id: AssetId, data: Arc<T>) -> bool {
        self.reload(id, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct TestAsset(i32);

    #[test]
    fn test_insert_and_get() {
        let catalog = AssetCatalog::new();
        let id = AssetId::from_name("test");
        let handle = catalog.insert(id, "test", TestAsset(42));

        assert_eq!(handle.state(), LoadState::Loaded);
        assert!(catalog.is_ready(&handle));
        assert_eq!(catalog.get(&handle).as_deref(), Some(&TestAsset(42)));
    }

    #[test]
    fn test_registered_asset_is_not_ready() {
        let catalog = AssetCatalog::<TestAsset>::new();
        let handle = catalog.register(AssetId::new(7), "pending");
        assert_eq!(catalog.state(AssetId::new(7)), Some(LoadState::NotLoaded));
        assert!(!catalog.is_ready(&handle));
        assert!(catalog.get(&handle).is_none());
        assert!(catalog.find_asset(AssetId::new(8)).is_none());

        catalog.insert(AssetId::new(7), "pending", TestAsset(1));
        assert!(catalog.is_ready(&handle));
    }

    #[test]
    fn test_reload_keeps_old_data_alive() {
        let catalog = AssetCatalog::new();
        let id = AssetId::new(3);
        let handle = catalog.insert(id, "a", TestAsset(1));
        let old = catalog.get(&handle).unwrap();

        assert!(catalog.reload(id, Arc::new(TestAsset(2))));
        assert_eq!(*old, TestAsset(1));
        assert_eq!(catalog.get(&handle).as_deref(), Some(&TestAsset(2)));
        assert!(!catalog.reload(AssetId::new(99), Arc::new(TestAsset(0))));
    }

    #[test]
    fn test_events_reach_subscribers() {
        let catalog = AssetCatalog::new();
        let events = catalog.subscribe();
        let id = AssetId::new(5);

        catalog.insert(id, "a", TestAsset(1));
        assert!(catalog.on_asset_reloaded(id, Arc::new(TestAsset(2))));

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(received, [AssetEvent::Loaded(id), AssetEvent::Reloaded(id)]);
        assert!(received.iter().all(|event| event.id() == id));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let catalog = AssetCatalog::new();
        drop(catalog.subscribe());
        catalog.insert(AssetId::new(1), "a", TestAsset(1));
        assert!(catalog.subscribers.read().is_empty());
    }
}

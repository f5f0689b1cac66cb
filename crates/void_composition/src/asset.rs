//! Shared composition assets

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use log::error;
use parking_lot::ReentrantMutex;
use void_asset::{AssetId, AssetProvider};
use void_reflect::TypeRegistry;

use crate::component::CompositionComponent;
use crate::error::{CompositionError, Result};

/// Everything composition operations need from their environment
#[derive(Clone, Copy)]
pub struct CompositionContext<'a> {
    pub registry: &'a TypeRegistry,
    pub assets: &'a dyn AssetProvider<CompositionAsset>,
}

impl<'a> CompositionContext<'a> {
    pub fn new(registry: &'a TypeRegistry, assets: &'a dyn AssetProvider<CompositionAsset>) -> Self {
        Self { registry, assets }
    }

    /// Current data of an asset, if the provider has it ready
    pub fn current_asset(&self, id: AssetId) -> Option<Arc<CompositionAsset>> {
        let handle = self.assets.find_asset(id)?;
        if !self.assets.is_ready(&handle) {
            return None;
        }
        self.assets.get(&handle)
    }
}

/// A composition component shared as an asset
///
/// The component is instantiated on first use, under a re-entrant lock:
/// the same thread may lock again while instantiating nested assets, and a
/// nested asset that leads back to this one is reported as a circular
/// reference instead of deadlocking.
pub struct CompositionAsset {
    id: AssetId,
    component: ReentrantMutex<RefCell<CompositionComponent>>,
}

impl CompositionAsset {
    pub fn new(id: AssetId, mut component: CompositionComponent) -> Self {
        component.set_my_asset(Some(id));
        Self {
            id,
            component: ReentrantMutex::new(RefCell::new(component)),
        }
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    /// Read the component
    pub fn with_component<R>(&self, f: impl FnOnce(&CompositionComponent) -> R) -> Result<R> {
        let guard = self.component.lock();
        let component = guard
            .try_borrow()
            .map_err(|_| CompositionError::CircularReference(self.id))?;
        Ok(f(&component))
    }

    /// Modify the component
    pub fn with_component_mut<R>(&self, f: impl FnOnce(&mut CompositionComponent) -> R) -> Result<R> {
        let guard = self.component.lock();
        let mut component = guard
            .try_borrow_mut()
            .map_err(|_| CompositionError::CircularReference(self.id))?;
        Ok(f(&mut component))
    }

    pub fn is_instantiated(&self) -> bool {
        self.with_component(CompositionComponent::is_instantiated)
            .unwrap_or(false)
    }

    /// Instantiate the component if it is not yet
    ///
    /// A partially instantiated component counts as instantiated.
    pub fn instantiate_checked(&self, ctx: &CompositionContext<'_>) -> Result<()> {
        let instantiated = self.with_component_mut(|component| {
            component.instantiate(ctx);
            component.is_instantiated()
        })?;
        if instantiated {
            Ok(())
        } else {
            Err(CompositionError::InstantiateFailed(self.id))
        }
    }

    pub fn instantiate(&self, ctx: &CompositionContext<'_>) -> bool {
        match self.instantiate_checked(ctx) {
            Ok(()) => true,
            Err(err) => {
                error!("Asset {} failed to instantiate: {}", self.id, err);
                false
            }
        }
    }

    /// Rebuild this asset against reloaded dependencies
    ///
    /// See [`CompositionComponent::on_asset_reloaded`].
    pub fn on_asset_reloaded(&self, ctx: &CompositionContext<'_>) -> Option<Arc<CompositionAsset>> {
        match self.with_component(|component| component.on_asset_reloaded(ctx)) {
            Ok(replacement) => replacement,
            Err(err) => {
                error!("Cannot reload asset {}: {}", self.id, err);
                None
            }
        }
    }
}

impl fmt::Debug for CompositionAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionAsset")
            .field("id", &self.id)
            .field("instantiated", &self.is_instantiated())
            .finish()
    }
}

//! Hot reload of composed assets
//!
//! A component whose dependent assets were replaced is never patched in
//! place. A copy is made, its edits are saved against the old asset
//! versions, and the copy is instantiated against the new ones. Components
//! that are assets publish the copy as their own replacement, which in turn
//! reloads the assets referencing them.

use std::collections::BTreeSet;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use void_asset::{AssetEvent, AssetId};

use crate::asset::{CompositionAsset, CompositionContext};
use crate::component::CompositionComponent;

impl CompositionComponent {
    /// References whose asset has a newer version than the one instantiated
    pub fn outdated_references(&self, ctx: &CompositionContext<'_>) -> Vec<AssetId> {
        self.references
            .iter()
            .filter(|reference| match (reference.asset(), ctx.current_asset(reference.asset_id())) {
                (Some(used), Some(current)) => !Arc::ptr_eq(used, &current),
                _ => false,
            })
            .map(|reference| reference.asset_id())
            .collect()
    }

    /// Copy of the component instantiated against the current asset versions
    ///
    /// Returns `None` when no reference is outdated or the copy fails. The
    /// component itself is left untouched.
    pub fn reload_dependencies(&self, ctx: &CompositionContext<'_>) -> Option<CompositionComponent> {
        let outdated = self.outdated_references(ctx);
        if outdated.is_empty() {
            return None;
        }
        let mut updated = match self.clone_component(ctx.registry) {
            Ok(updated) => updated,
            Err(err) => {
                warn!("Cannot copy component for reload: {}", err);
                return None;
            }
        };
        if !updated.prepare_save(ctx.registry) {
            warn!("Edits of some instances could not be saved before reload");
        }

        for asset in &outdated {
            if let Some(reference) = updated.find_composition_mut(*asset) {
                debug!("Repointing reference to reloaded asset {}", asset);
                reference.uninstantiate();
            }
        }
        updated.instantiated = false;
        if !updated.instantiate(ctx) {
            warn!("Component did not fully instantiate against reloaded assets");
        }
        updated.rebuild_entity_info_map();
        Some(updated)
    }

    /// Build and publish a replacement for this component's asset
    ///
    /// The replacement goes to the asset provider, whose subscribers are
    /// notified. Components that are not assets have nothing to publish;
    /// use [`reload_dependencies`](Self::reload_dependencies) for those.
    pub fn on_asset_reloaded(&self, ctx: &CompositionContext<'_>) -> Option<Arc<CompositionAsset>> {
        let my_asset = self.my_asset?;
        let updated = self.reload_dependencies(ctx)?;
        let replacement = Arc::new(CompositionAsset::new(my_asset, updated));
        if !ctx.assets.on_asset_reloaded(my_asset, Arc::clone(&replacement)) {
            warn!("Asset provider does not know asset {}", my_asset);
        }
        info!("Published reloaded asset {}", my_asset);
        Some(replacement)
    }
}

/// Reload every candidate asset affected by pending reload events
///
/// Events are drained until none are left, so a replacement published here
/// cascades to the candidates that reference it. Returns the replacements
/// in publication order.
pub fn propagate_reloads(
    ctx: &CompositionContext<'_>,
    events: &Receiver<AssetEvent>,
    candidates: &[AssetId],
) -> Vec<Arc<CompositionAsset>> {
    let mut published = Vec::new();
    while let Ok(event) = events.try_recv() {
        let AssetEvent::Reloaded(changed) = event else {
            continue;
        };
        for candidate in candidates {
            if *candidate == changed {
                continue;
            }
            let Some(asset) = ctx.current_asset(*candidate) else {
                continue;
            };
            let depends = asset
                .with_component(|component| component.referenced_assets(false))
                .map(|assets: BTreeSet<AssetId>| assets.contains(&changed))
                .unwrap_or(false);
            if !depends {
                continue;
            }
            if let Some(replacement) = asset.on_asset_reloaded(ctx) {
                published.push(replacement);
            }
        }
    }
    published
}

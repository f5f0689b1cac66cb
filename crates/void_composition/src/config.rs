//! Composition configuration

use void_asset::AssetId;
use void_reflect::LoadFilter;

/// How a component reacts to dependent assets that fail to instantiate
#[derive(Clone, Copy, Debug)]
pub struct CompositionConfig {
    /// Strip failing references and keep the rest instead of rolling back
    pub allow_partial_instantiation: bool,
    /// Classes accepted when loading composition documents
    pub filter: LoadFilter,
    /// Dependent assets accepted at instantiation time
    pub asset_filter: Option<fn(AssetId) -> bool>,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self::partial()
    }
}

impl CompositionConfig {
    /// One failing reference un-instantiates the whole component
    pub fn strict() -> Self {
        Self {
            allow_partial_instantiation: false,
            filter: LoadFilter::default(),
            asset_filter: None,
        }
    }

    /// Failing references are dropped, the others stay instantiated
    pub fn partial() -> Self {
        Self {
            allow_partial_instantiation: true,
            ..Self::strict()
        }
    }

    pub fn with_asset_filter(mut self, filter: fn(AssetId) -> bool) -> Self {
        self.asset_filter = Some(filter);
        self
    }

    pub fn with_load_filter(mut self, filter: LoadFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Whether instantiation may use `asset`
    pub fn accepts(&self, asset: AssetId) -> bool {
        self.asset_filter.map_or(true, |accept| accept(asset))
    }

    /// Level failures to instantiate are logged at
    pub(crate) fn failure_level(&self) -> log::Level {
        if self.allow_partial_instantiation {
            log::Level::Warn
        } else {
            log::Level::Error
        }
    }
}

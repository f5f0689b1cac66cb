//! Composition errors

use thiserror::Error;
use void_asset::AssetId;
use void_core::{EntityId, InstanceId};
use void_reflect::ReflectError;

/// Errors raised while composing, saving or restoring entity graphs
#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("Asset {0} not found")]
    AssetNotFound(AssetId),

    #[error("Asset {0} is not ready")]
    AssetNotReady(AssetId),

    #[error("Asset {0} was refused by the asset filter")]
    AssetRejected(AssetId),

    #[error("Failed to instantiate asset {0}")]
    InstantiateFailed(AssetId),

    #[error("Asset {0} references itself")]
    CircularReference(AssetId),

    #[error("Component is not instantiated")]
    NotInstantiated,

    #[error("Instance {instance:?} of asset {asset} has no metadata entity {expected}")]
    MissingMetadataEntity {
        asset: AssetId,
        instance: InstanceId,
        expected: EntityId,
    },

    #[error("Instance {instance:?} of asset {asset} not found")]
    UnknownInstance { asset: AssetId, instance: InstanceId },

    #[error("Entity {0} not found")]
    UnknownEntity(EntityId),

    #[error("Component does not belong to an asset")]
    NoOwningAsset,

    #[error(transparent)]
    Reflect(#[from] ReflectError),
}

/// Result type for composition operations
pub type Result<T> = core::result::Result<T, CompositionError>;

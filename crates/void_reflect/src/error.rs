//! Reflection errors

use thiserror::Error;
use void_core::ClassId;

/// Errors raised by reflection, streaming and patching
#[derive(Error, Debug)]
pub enum ReflectError {
    #[error("Class {0} is not registered")]
    UnknownClass(ClassId),

    #[error("Class {name} ({id}) has no factory")]
    NoFactory { name: String, id: ClassId },

    #[error("Expected class {expected}, found {found}")]
    ClassMismatch { expected: ClassId, found: ClassId },

    #[error("Class {0} is deprecated")]
    Deprecated(String),

    #[error("Stored version {stored} of {class} is newer than schema version {current}")]
    NewerVersion { class: String, stored: u32, current: u32 },

    #[error("Version converter for {class} failed at version {stored}")]
    ConversionFailed { class: String, stored: u32 },

    #[error("Container of {0} rejected element")]
    ContainerMismatch(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Binary stream error: {0}")]
    Binary(#[from] bincode::Error),

    #[error("Text stream error: {0}")]
    Text(#[from] serde_json::Error),

    #[error("Load finished with {0} error(s)")]
    Incomplete(usize),
}

/// Result type for reflection operations
pub type Result<T> = core::result::Result<T, ReflectError>;

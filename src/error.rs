use camino::Utf8PathBuf;
use thiserror::Error;

use crate::key::TaskKey;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Entity `{0}` is not defined")]
    UndefinedEntity(String),

    #[error("Dependency cycle detected: {0}")]
    CycleDetected(String),

    #[error("Bootstrap entity `{name}` must have exactly one value, got {count}")]
    BootstrapCardinality { name: String, count: usize },

    #[error("Cannot apply persistent caching to bootstrap entities {names:?}")]
    BootstrapPersistence { names: Vec<String> },

    #[error("Value for `{key}` failed validation: {source}")]
    Protocol { key: TaskKey, source: ProtocolError },

    #[error("Task `{key}` failed: {source}")]
    Compute { key: TaskKey, source: anyhow::Error },

    #[error("Artifact cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Expected a value of type `{0}`")]
    TypeMismatch(&'static str),

    #[error("Value rejected: {0}")]
    Rejected(String),

    #[error("Values of this protocol cannot be serialized")]
    Opaque,

    #[error("Failed to encode value: {0}")]
    Encode(String),

    #[error("Failed to decode value: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to create cache directory `{0}`: {1}")]
    CreateDir(Utf8PathBuf, std::io::Error),

    #[error("Failed to write cache record `{0}`: {1}")]
    FileWrite(Utf8PathBuf, std::io::Error),

    #[error("Failed to encode cache record: {0}")]
    Encode(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#![deny(unsafe_code, clippy::panic)]

//! Dataflow engine resolving named *entities* through a memoized task graph.
//!
//! An entity is a named, possibly parameterized artifact backed by a
//! [`Provider`]. Registering providers in a [`Flow`] and handing it to a
//! [`Resolver`] builds a directed acyclic graph of tasks, which the resolver
//! evaluates in dependency order with a work-list discipline. Every task runs
//! at most once per resolver lifetime; results are kept in an in-memory table
//! and, for entities that opt in, persisted to an [`ArtifactCache`] keyed by
//! the full [`Provenance`] of each value.
//!
//! The persistent cache is itself wired in as an entity: resolving the
//! internal `core__persistent_cache` entity through a restricted bootstrap
//! mode yields the cache the full resolver then uses.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use kasuri::{
//!     Dynamic, Flow, FunctionProvider, MemoryCache, Resolver, TypedProtocol, ValueProvider,
//! };
//!
//! let int = || TypedProtocol::<i64>::new().arc();
//!
//! let flow = Flow::new()
//!     .register(ValueProvider::new("base", int()).value(Arc::new(2i64)))
//!     .register(FunctionProvider::new("tripled", int(), ["base"], |deps| {
//!         let base = deps[0].downcast_ref::<i64>().unwrap();
//!         Ok(Arc::new(base * 3) as Dynamic)
//!     }))
//!     .with_cache(Arc::new(MemoryCache::new()));
//!
//! let mut resolver = Resolver::new(flow);
//! let group = resolver.resolve("tripled")?;
//! assert_eq!(group[0].value_as::<i64>(), Some(&6));
//! # Ok::<(), kasuri::ResolverError>(())
//! ```

mod cache;
mod core;
mod error;
mod export;
mod flow;
mod graph;
mod key;
#[cfg(feature = "logging")]
mod log;
mod protocol;
mod provenance;
mod provider;
mod query;
mod resolver;
mod task;

pub use camino;

pub use crate::cache::{ArtifactCache, CACHE_ENTITY, CacheHandle, FileCache, MemoryCache};
pub use crate::core::{Dynamic, Hash32};
pub use crate::error::{CacheError, ProtocolError, ResolverError};
pub use crate::export::DagNode;
pub use crate::flow::Flow;
pub use crate::key::{CaseKey, INTERNAL_PREFIX, KeySpace, TaskKey, entity_is_internal};
#[cfg(feature = "logging")]
pub use crate::log::init_logging;
pub use crate::protocol::{OpaqueProtocol, Protocol, TypedProtocol};
pub use crate::provenance::{CodeId, Provenance};
pub use crate::provider::{
    DepKeySpaces, DepTaskKeys, FunctionProvider, Provider, ProviderAttrs, ValueProvider,
};
pub use crate::query::{EntityResult, Query, ResultGroup};
pub use crate::resolver::Resolver;
pub use crate::task::{ComputeFn, Task};

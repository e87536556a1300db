//! Addressable identities of resolved values.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::core::{Dynamic, Hash32};
use crate::key::{CaseKey, KeySpace, TaskKey};
use crate::protocol::Protocol;
use crate::provenance::Provenance;

/// The addressable identity of a result request: which entity, under which
/// protocol, at which case key, with which lineage.
#[derive(Clone)]
pub struct Query {
    pub name: String,
    pub protocol: Arc<dyn Protocol>,
    pub case_key: CaseKey,
    pub provenance: Arc<Provenance>,
}

impl Query {
    pub fn task_key(&self) -> TaskKey {
        TaskKey::new(self.name.clone(), self.case_key.clone())
    }

    /// Content-addressing fingerprint used by caches to key stored records.
    pub fn digest(&self) -> Hash32 {
        let mut parts: Vec<Vec<u8>> = Vec::new();
        parts.push(b"query".to_vec());
        parts.push(self.name.as_bytes().to_vec());
        for (name, value) in self.case_key.iter() {
            parts.push(name.as_bytes().to_vec());
            parts.push(value.as_bytes().to_vec());
        }
        parts.push(self.provenance.digest().as_bytes().to_vec());
        Hash32::hash_parts(parts)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("name", &self.name)
            .field("case_key", &self.case_key)
            .field("provenance", &self.provenance.digest())
            .finish_non_exhaustive()
    }
}

/// A validated value paired with the query that produced it.
#[derive(Clone)]
pub struct EntityResult {
    pub query: Query,
    pub value: Dynamic,
}

impl EntityResult {
    /// Downcasts the value to a concrete type.
    pub fn value_as<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for EntityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityResult({:?})", self.query)
    }
}

/// All results for one entity, ordered by its key space.
#[derive(Debug, Clone)]
pub struct ResultGroup {
    pub results: Vec<EntityResult>,
    pub key_space: KeySpace,
}

impl Deref for ResultGroup {
    type Target = [EntityResult];

    fn deref(&self) -> &Self::Target {
        &self.results
    }
}

impl<'a> IntoIterator for &'a ResultGroup {
    type Item = &'a EntityResult;
    type IntoIter = std::slice::Iter<'a, EntityResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

//! Persistent artifact caches.
//!
//! A cache stores validated results keyed by the content-addressing digest
//! of their [`Query`] — entity name, case key, and full provenance. Because
//! provenance is recursive, any upstream change produces a different digest
//! and the stale artifact is simply never looked up again.
//!
//! The resolver obtains its cache by resolving the internal
//! `core__persistent_cache` entity, whose single value must be a
//! [`CacheHandle`].

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::Hash32;
use crate::error::CacheError;
use crate::query::{EntityResult, Query};

/// The distinguished bootstrap entity whose single value supplies the
/// resolver's persistent cache.
pub const CACHE_ENTITY: &str = "core__persistent_cache";

pub trait ArtifactCache: Send + Sync {
    /// Looks up a stored result. I/O or decoding failures degrade to a miss.
    fn load(&self, query: &Query) -> Option<EntityResult>;

    /// Persists a result so that a subsequent `load` of the same query
    /// returns it.
    fn save(&self, result: &EntityResult) -> Result<(), CacheError>;
}

/// The value carried by the `core__persistent_cache` bootstrap entity.
///
/// The resolver downcasts the bootstrap singleton to this type and adopts
/// the wrapped cache for all persistent entities.
#[derive(Clone)]
pub struct CacheHandle(pub Arc<dyn ArtifactCache>);

/// On-disk envelope for one cached artifact.
#[derive(Serialize, Deserialize)]
struct Record {
    entity: String,
    case: Vec<(String, String)>,
    payload: Vec<u8>,
}

/// A content-addressed cache on the local filesystem.
///
/// Records live at `<root>/<entity_name>/<query-digest>.cbor`; the payload
/// inside the CBOR envelope is whatever the query's protocol serialized.
pub struct FileCache {
    root: Utf8PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, query: &Query) -> Utf8PathBuf {
        self.root
            .join(&query.name)
            .join(query.digest().to_hex())
            .with_extension("cbor")
    }
}

impl ArtifactCache for FileCache {
    fn load(&self, query: &Query) -> Option<EntityResult> {
        let path = self.path_for(query);
        if !path.exists() {
            return None;
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Treating unreadable cache record {path} as a miss: {e}");
                return None;
            }
        };

        let record: Record = match ciborium::de::from_reader(bytes.as_slice()) {
            Ok(record) => record,
            Err(e) => {
                warn!("Treating undecodable cache record {path} as a miss: {e}");
                return None;
            }
        };

        let value = match query.protocol.deserialize(&record.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Treating unreadable cache payload {path} as a miss: {e}");
                return None;
            }
        };

        Some(EntityResult {
            query: query.clone(),
            value,
        })
    }

    fn save(&self, result: &EntityResult) -> Result<(), CacheError> {
        let query = &result.query;
        let payload = query.protocol.serialize(&result.value)?;

        let record = Record {
            entity: query.name.clone(),
            case: query
                .case_key
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            payload,
        };

        let mut buffer = Vec::new();
        ciborium::ser::into_writer(&record, &mut buffer)
            .map_err(|e| CacheError::Encode(e.to_string()))?;

        let path = self.path_for(query);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|e| CacheError::CreateDir(dir.to_path_buf(), e))?;
        fs::write(&path, buffer).map_err(|e| CacheError::FileWrite(path.clone(), e))?;

        Ok(())
    }
}

/// An in-process cache with no serialization, keyed by query digest.
///
/// Useful for tests (pre-populating hits) and for flows that want
/// memoization semantics without touching disk.
#[derive(Default)]
pub struct MemoryCache {
    records: Mutex<HashMap<Hash32, EntityResult>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactCache for MemoryCache {
    fn load(&self, query: &Query) -> Option<EntityResult> {
        self.records.lock().unwrap().get(&query.digest()).cloned()
    }

    fn save(&self, result: &EntityResult) -> Result<(), CacheError> {
        self.records
            .lock()
            .unwrap()
            .insert(result.query.digest(), result.clone());
        Ok(())
    }
}

//! Lineage tracking for computed values.
//!
//! Every evaluated task records how its values came to be: which provider
//! code ran, at which case key, and the full lineage of every dependency
//! value it consumed. The record is recursive and content-addressed — its
//! BLAKE3 digest is what the artifact cache keys on, so a change anywhere in
//! the upstream lineage changes the identity of everything downstream.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::Hash32;
use crate::key::CaseKey;

/// Opaque identifier for the provider code behind one case of an entity.
///
/// Providers choose the format; bumping it invalidates cached artifacts
/// derived from the old code.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CodeId(String);

impl CodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A structural record of how a value was produced.
///
/// Two evaluations with the same code id, case key, and dependency
/// provenances produce equal records with equal digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    code_id: CodeId,
    case_key: CaseKey,
    dep_provenances_by_name: BTreeMap<String, Arc<Provenance>>,
    digest: Hash32,
}

impl Provenance {
    pub fn from_computation(
        code_id: CodeId,
        case_key: CaseKey,
        dep_provenances_by_name: BTreeMap<String, Arc<Provenance>>,
    ) -> Arc<Self> {
        let mut parts: Vec<Vec<u8>> = Vec::new();
        parts.push(b"code".to_vec());
        parts.push(code_id.as_str().as_bytes().to_vec());
        parts.push(b"case".to_vec());
        for (name, value) in case_key.iter() {
            parts.push(name.as_bytes().to_vec());
            parts.push(value.as_bytes().to_vec());
        }
        parts.push(b"deps".to_vec());
        for (name, dep) in &dep_provenances_by_name {
            parts.push(name.as_bytes().to_vec());
            parts.push(dep.digest.as_bytes().to_vec());
        }

        Arc::new(Self {
            code_id,
            case_key,
            dep_provenances_by_name,
            digest: Hash32::hash_parts(parts),
        })
    }

    pub fn code_id(&self) -> &CodeId {
        &self.code_id
    }

    pub fn case_key(&self) -> &CaseKey {
        &self.case_key
    }

    pub fn dep_provenances_by_name(&self) -> &BTreeMap<String, Arc<Provenance>> {
        &self.dep_provenances_by_name
    }

    /// The content-addressing fingerprint of this record.
    pub fn digest(&self) -> Hash32 {
        self.digest
    }
}

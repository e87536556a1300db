use std::any::Any;
use std::sync::Arc;

/// A type-erased, thread-safe container for entity values.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// In `kasuri`, this serves two primary purposes:
/// 1. It fingerprints provenance records, so two evaluations with the same
///    code, case key, and dependency lineage collapse to the same identity.
/// 2. It generates unique filenames inside the artifact cache, so persisted
///    results can be looked up without scanning.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    /// Hashes a sequence of byte chunks as one structural fingerprint.
    ///
    /// Each chunk is prefixed with its length, so `["ab", "c"]` and
    /// `["a", "bc"]` produce different hashes.
    pub fn hash_parts<I, B>(parts: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            let part = part.as_ref();
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        hasher.finalize().into()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = vec![0u8; 64];

        for (i, &byte) in self.0.iter().enumerate() {
            acc[i * 2] = HEX[(byte >> 4) as usize];
            acc[i * 2 + 1] = HEX[(byte & 0xF) as usize];
        }

        String::from_utf8(acc).unwrap()
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

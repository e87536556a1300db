//! Value protocols.
//!
//! A protocol is attached to every entity and does two jobs: it validates
//! computed values before they are installed, and it defines the wire format
//! the artifact cache persists. The resolver treats protocols as opaque
//! trait objects; the types here are the stock implementations.

use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::Dynamic;
use crate::error::ProtocolError;

pub trait Protocol: Send + Sync {
    /// Checks that a computed value is acceptable for the entity.
    fn validate(&self, value: &Dynamic) -> Result<(), ProtocolError>;

    /// Encodes a value into the bytes the artifact cache persists.
    fn serialize(&self, value: &Dynamic) -> Result<Vec<u8>, ProtocolError>;

    /// Decodes previously persisted bytes back into a value.
    fn deserialize(&self, bytes: &[u8]) -> Result<Dynamic, ProtocolError>;
}

/// A protocol for values of a single concrete type `T`.
///
/// Validation checks that the type-erased value actually holds a `T` and
/// then runs the optional user predicate. The wire format is CBOR.
pub struct TypedProtocol<T> {
    check: Option<Arc<dyn Fn(&T) -> Result<(), String> + Send + Sync>>,
    _phantom: PhantomData<T>,
}

impl<T> TypedProtocol<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            check: None,
            _phantom: PhantomData,
        }
    }

    /// Adds a validation predicate on top of the type check. The returned
    /// message becomes the rejection reason.
    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        self.check = Some(Arc::new(check));
        self
    }

    pub fn arc(self) -> Arc<dyn Protocol> {
        Arc::new(self)
    }
}

impl<T> Default for TypedProtocol<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Protocol for TypedProtocol<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn validate(&self, value: &Dynamic) -> Result<(), ProtocolError> {
        let value = value
            .downcast_ref::<T>()
            .ok_or(ProtocolError::TypeMismatch(type_name::<T>()))?;

        if let Some(check) = &self.check {
            check(value).map_err(ProtocolError::Rejected)?;
        }

        Ok(())
    }

    fn serialize(&self, value: &Dynamic) -> Result<Vec<u8>, ProtocolError> {
        let value = value
            .downcast_ref::<T>()
            .ok_or(ProtocolError::TypeMismatch(type_name::<T>()))?;

        let mut buffer = Vec::new();
        ciborium::ser::into_writer(value, &mut buffer)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;

        Ok(buffer)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Dynamic, ProtocolError> {
        let value: T = ciborium::de::from_reader(bytes)
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;

        Ok(Arc::new(value))
    }
}

/// A protocol for values that never leave memory, such as the bootstrap
/// cache handle. Every value passes validation; serialization is an error.
pub struct OpaqueProtocol;

impl Protocol for OpaqueProtocol {
    fn validate(&self, _: &Dynamic) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn serialize(&self, _: &Dynamic) -> Result<Vec<u8>, ProtocolError> {
        Err(ProtocolError::Opaque)
    }

    fn deserialize(&self, _: &[u8]) -> Result<Dynamic, ProtocolError> {
        Err(ProtocolError::Opaque)
    }
}

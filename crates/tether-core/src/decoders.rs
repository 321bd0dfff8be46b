//! Typed payload decoder registry.
//!
//! Message payloads are raw bytes on the wire. Callers that want typed
//! values register a decoding function per target type when building the
//! client; [`Message::decode`] then resolves the function by `TypeId`.
//! `Vec<u8>` and [`bytes::Bytes`] decode without registration - they are the
//! "no decoder, raw bytes" escape hatch.
//!
//! The registry is owned per-client and fixed at construction. There is no
//! process-global decoder table.
//!
//! [`Message::decode`]: crate::Message::decode

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use bytes::Bytes;

use crate::errors::{Error, Result};

type BoxedDecoder = Box<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>> + Send + Sync>;

/// Table from target type to decoding function.
#[derive(Default)]
pub struct DecoderRegistry {
    table: HashMap<TypeId, BoxedDecoder>,
}

impl DecoderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered decoders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when no decoders are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Register a decoder for `T`, replacing any previous one.
    pub fn register<T, F>(&mut self, decode: F)
    where
        T: Any + Send,
        F: Fn(&[u8]) -> Result<T> + Send + Sync + 'static,
    {
        self.table.insert(
            TypeId::of::<T>(),
            Box::new(move |bytes| decode(bytes).map(|v| Box::new(v) as Box<dyn Any + Send>)),
        );
    }

    /// Decode `payload` as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDecoder`] when `T` has no registered decoder and is
    /// not one of the raw-bytes types, or [`Error::DecodeFailed`] when the
    /// registered decoder rejects the payload.
    pub fn decode<T: Any>(&self, payload: &[u8]) -> Result<T> {
        let target = TypeId::of::<T>();

        if let Some(decode) = self.table.get(&target) {
            let boxed = decode(payload)?;
            return boxed
                .downcast::<T>()
                .map(|v| *v)
                .map_err(|_| Error::DecodeFailed("decoder produced a different type".to_string()));
        }

        // Raw-bytes fallbacks need no registration.
        if target == TypeId::of::<Vec<u8>>() {
            return downcast_raw::<T>(Box::new(payload.to_vec()));
        }
        if target == TypeId::of::<Bytes>() {
            return downcast_raw::<T>(Box::new(Bytes::copy_from_slice(payload)));
        }

        Err(Error::NoDecoder(std::any::type_name::<T>()))
    }
}

fn downcast_raw<T: Any>(boxed: Box<dyn Any>) -> Result<T> {
    boxed
        .downcast::<T>()
        .map(|v| *v)
        .map_err(|_| Error::DecodeFailed("raw-bytes downcast failed".to_string()))
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderRegistry").field("registered", &self.table.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_bytes_need_no_registration() {
        let registry = DecoderRegistry::new();
        let raw: Vec<u8> = registry.decode(b"abc").unwrap();
        assert_eq!(raw, b"abc");
        let raw: Bytes = registry.decode(b"abc").unwrap();
        assert_eq!(&raw[..], b"abc");
    }

    #[test]
    fn registered_decoder_is_used() {
        let mut registry = DecoderRegistry::new();
        registry.register::<String, _>(|bytes| {
            String::from_utf8(bytes.to_vec()).map_err(|e| Error::DecodeFailed(e.to_string()))
        });

        let s: String = registry.decode(b"hello").unwrap();
        assert_eq!(s, "hello");
        assert!(matches!(registry.decode::<String>(&[0xFF]), Err(Error::DecodeFailed(_))));
    }

    #[test]
    fn unregistered_type_is_an_error() {
        let registry = DecoderRegistry::new();
        assert!(matches!(registry.decode::<u32>(b"1"), Err(Error::NoDecoder(_))));
    }
}

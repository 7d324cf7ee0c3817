//! Value codecs.
//!
//! The facade owns one codec value for its whole lifetime; it turns loaded
//! rows into the opaque strings the backend stores and back.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::CacheError;

pub trait ValueCodec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, CacheError>;

    fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<T, CacheError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, CacheError> {
        serde_json::to_string(value).map_err(|err| CacheError::encode(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<T, CacheError> {
        serde_json::from_str(payload).map_err(|err| CacheError::decode(err.to_string()))
    }
}

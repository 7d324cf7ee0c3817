//! Cache fault types.
//!
//! Hit conditions are not errors; see [`super::outcome::HitKind`]. Everything
//! here is a genuine failure of the cache layer or of a loader it ran.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed loader failure shared between a single-flight leader and its followers.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache key not found: {key}")]
    NotFound { key: String },
    #[error("storage backend error: {message}")]
    Backend { message: String },
    #[error("storage backend initialization failed: {message}")]
    Init { message: String },
    #[error("failed to encode cache value: {message}")]
    Encode { message: String },
    #[error("cache hit, but decode error: {message}")]
    Decode { message: String },
    #[error("cache miss, and load value error: {0}")]
    Load(SharedError),
    #[error("in-flight load for `{key}` was abandoned before completing")]
    Abandoned { key: String },
}

impl CacheError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn init(message: impl Into<String>) -> Self {
        Self::Init {
            message: message.into(),
        }
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn load<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::Load(Arc::from(error.into()))
    }

    pub fn abandoned(key: impl Into<String>) -> Self {
        Self::Abandoned { key: key.into() }
    }

    /// True when the backend reported the key as absent (or expired).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

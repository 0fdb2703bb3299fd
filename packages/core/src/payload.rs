//! Opaque job payloads.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Encoded caller data attached to a job.
///
/// The queue stores and returns the blob untouched; only callers and
/// processors encode or decode it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(String);

/// Payload codec errors.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),
}

impl Payload {
    /// Encode a caller value.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, PayloadError> {
        serde_json::to_string(value)
            .map(Self)
            .map_err(PayloadError::Encode)
    }

    /// Decode the blob back into a caller type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        serde_json::from_str(&self.0).map_err(PayloadError::Decode)
    }

    /// Wrap an already-encoded blob.
    pub fn from_encoded(blob: impl Into<String>) -> Self {
        Self(blob.into())
    }

    /// The encoded blob.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

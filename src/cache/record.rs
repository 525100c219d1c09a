//! The serialized form of a finished response.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::CacheError;
use crate::{Response, StatusCode};

/// A response captured by the episode leader and replayed to waiters.
///
/// Stored as JSON: `{"statusCode":200,"payload":"<base64>","contentType":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    pub status_code: u16,
    #[serde(with = "base64_payload")]
    pub payload: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl CachedResponse {
    pub fn new(status: StatusCode, payload: impl Into<Bytes>) -> Self {
        Self {
            status_code: status.as_u16(),
            payload: payload.into(),
            content_type: None,
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Captures the status, body and content type of a handler's response.
    pub fn from_response(response: &Response) -> Self {
        Self {
            status_code: response.status().as_u16(),
            payload: response.payload().clone(),
            content_type: response.headers().get("content-type").map(str::to_owned),
        }
    }

    /// Rebuilds a response carrying the same status, body and content type.
    pub fn into_response(self) -> Result<Response, CacheError> {
        let status = StatusCode::from_u16(self.status_code)
            .ok_or(CacheError::InvalidStatus(self.status_code))?;
        let mut response = Response::new(status).body_bytes(self.payload);
        if let Some(content_type) = self.content_type {
            response.set_header("Content-Type", content_type);
        }
        Ok(response)
    }

    pub fn encode(&self) -> Result<Bytes, CacheError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(CacheError::Encode)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(raw).map_err(CacheError::Decode)
    }
}

mod base64_payload {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}

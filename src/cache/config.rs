//! Response cache options.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Method;

/// Errors raised while loading [`ResponseCacheConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid response cache options: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Extra request properties that become part of the cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdditionalCondition {
    /// Header names, in the order they are folded into the key.
    pub headers: Vec<String>,
}

/// Options accepted by [`ResponseCache`](super::ResponseCache).
///
/// Deserializes from the same shape the options object is written in:
///
/// ```
/// use std::time::Duration;
/// use rttp_singleflight::cache::ResponseCacheConfig;
///
/// let config = ResponseCacheConfig::from_json(
///     r#"{"ttl": 2000, "additionalCondition": {"headers": ["x-tenant"]}}"#,
/// )
/// .unwrap();
///
/// assert_eq!(config.ttl, Duration::from_millis(2000));
/// assert_eq!(config.additional_condition.headers, ["x-tenant"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResponseCacheConfig {
    /// Episode lifetime, which is also the longest a follower waits. A zero
    /// TTL disables caching.
    #[serde(with = "millis")]
    pub ttl: Duration,

    pub additional_condition: AdditionalCondition,

    /// Methods whose requests are cacheable.
    pub methods: Vec<Method>,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(1000),
            additional_condition: AdditionalCondition::default(),
            methods: vec![Method::Get],
        }
    }
}

impl ResponseCacheConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Adds a header to the key dimensions, after any already configured.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>) -> Self {
        self.additional_condition.headers.push(name.into());
        self
    }

    #[must_use]
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn is_cacheable(&self, method: &Method) -> bool {
        self.is_enabled() && self.methods.contains(method)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

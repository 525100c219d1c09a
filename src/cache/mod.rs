//! Request-deduplicating response cache.
//!
//! When several identical cacheable requests arrive while the first is still
//! being handled, only the first reaches the handler. The others wait for its
//! response and replay it, tagged `x-response-cache: hit`. Requests that
//! compute a response themselves are tagged `miss`; non-cacheable requests are
//! left untouched.
//!
//! ## Layout
//!
//! - [`key`] — request fingerprints ([`CacheKey`]).
//! - [`store`] — the async TTL store ([`CacheStore`], [`MemoryStore`]).
//! - [`notifier`] — in-process wake-ups for waiting requests ([`Notifier`]).
//! - [`coordinator`] — single-flight admission and publication ([`Coordinator`]).
//! - [`hooks`] — the on-request / on-send adapters and the pipeline
//!   middleware ([`ResponseCache`]).
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rttp_singleflight::cache::{ResponseCache, ResponseCacheConfig};
//! use rttp_singleflight::middleware::Pipeline;
//! use rttp_singleflight::{Response, StatusCode};
//!
//! let cache = ResponseCache::new(ResponseCacheConfig::default().with_header("x-tenant"));
//! let pipeline = Pipeline::new(|_ctx| async {
//!     Response::new(StatusCode::Ok)
//!         .header("Content-Type", "application/json")
//!         .body(r#"{"hello":"world"}"#)
//! })
//! .with(Arc::new(cache));
//! ```

use thiserror::Error;

pub mod config;
pub mod coordinator;
pub mod hooks;
pub mod key;
pub mod notifier;
pub mod record;
pub mod store;

pub use config::{AdditionalCondition, ConfigError, ResponseCacheConfig};
pub use coordinator::{Admission, Coordinator};
pub use hooks::{OnRequest, Pending, ResponseCache};
pub use key::CacheKey;
pub use notifier::{Notifier, Subscription};
pub use record::CachedResponse;
pub use store::{CacheStore, MemoryStore, StoreError};

/// Response header reporting how the cache treated the request.
pub const X_RESPONSE_CACHE: &str = "x-response-cache";

/// [`X_RESPONSE_CACHE`] value for a replayed response.
pub const HIT: &str = "hit";

/// [`X_RESPONSE_CACHE`] value for a response computed by the handler.
pub const MISS: &str = "miss";

/// Errors raised by the coordinator.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode cached response: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed cached response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("cached response has unknown status code {0}")]
    InvalidStatus(u16),
}

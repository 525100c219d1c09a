//! # rttp-singleflight
//!
//! A request-deduplicating response cache for a small async HTTP/1.1 server.
//!
//! Identical cacheable requests that arrive while the first one is still being
//! handled wait for its response instead of running the handler again. Every
//! cacheable response carries `x-response-cache: hit` or `miss`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rttp_singleflight::{Response, ResponseCache, ResponseCacheConfig, Server, StatusCode};
//! use rttp_singleflight::middleware::{LoggerMiddleware, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = ResponseCache::new(ResponseCacheConfig::from_json(r#"{"ttl": 2000}"#)?);
//!     let pipeline = Pipeline::new(|_ctx| async {
//!         Response::new(StatusCode::Ok)
//!             .header("Content-Type", "application/json")
//!             .body(r#"{"hello":"world"}"#)
//!     })
//!     .with(Arc::new(LoggerMiddleware))
//!     .with(Arc::new(cache));
//!
//!     Server::bind("127.0.0.1:8080").await?.run(pipeline).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;
pub mod server;

pub use cache::{ResponseCache, ResponseCacheConfig};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};

//! Binds the coordinator into the request lifecycle.
//!
//! [`ResponseCache::on_request`] runs before the handler and may answer the
//! request from the cache. [`ResponseCache::on_send`] runs once the handler
//! produced a response and publishes it if this request led its episode. The
//! [`Middleware`] impl wires the two around [`Next::run`].
//!
//! Both hooks fail open: any cache error is logged and the request is served
//! live.

use std::{future::Future, pin::Pin, sync::Arc};

use tracing::{debug, warn};

use super::{
    Admission, CacheKey, CacheStore, CachedResponse, Coordinator, HIT, MISS, MemoryStore,
    ResponseCacheConfig, X_RESPONSE_CACHE,
};
use crate::{
    Request, Response,
    context::Context,
    middleware::{Middleware, Next},
};

/// What the host should do with a request after [`ResponseCache::on_request`].
#[derive(Debug)]
pub enum OnRequest {
    /// Not cacheable; run the handler and leave the response alone.
    Bypass,
    /// Run the handler, then hand its response to [`ResponseCache::on_send`].
    Proceed(Pending),
    /// Answer with this cached response without running the handler.
    Respond(Response),
}

/// A cacheable request that is being computed live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    key: CacheKey,
    leader: bool,
}

impl Pending {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Whether this request opened the episode and must publish its response.
    pub fn is_leader(&self) -> bool {
        self.leader
    }
}

struct Inner {
    config: ResponseCacheConfig,
    coordinator: Coordinator,
}

/// A response cache instance. Cloning is cheap and shares the same store and
/// waiters.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

impl ResponseCache {
    /// Creates a cache backed by a fresh [`MemoryStore`].
    pub fn new(config: ResponseCacheConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(config: ResponseCacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                coordinator: Coordinator::new(store),
            }),
        }
    }

    pub fn config(&self) -> &ResponseCacheConfig {
        &self.inner.config
    }

    /// The store holding markers and cached responses.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        self.inner.coordinator.store()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.inner.coordinator
    }

    /// Decides whether `request` is computed live or answered from the cache.
    ///
    /// May wait up to the configured TTL for an identical in-flight request.
    pub async fn on_request(&self, request: &Request) -> OnRequest {
        let config = self.config();
        if !config.is_cacheable(request.method()) {
            return OnRequest::Bypass;
        }

        let key = CacheKey::for_request(request, &config.additional_condition.headers);
        let admission = match self.coordinator().admit_or_wait(&key, config.ttl).await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(%key, error = %e, "response cache unavailable, serving live");
                return OnRequest::Proceed(Pending { key, leader: false });
            }
        };

        match admission {
            Admission::Proceed { leader } => OnRequest::Proceed(Pending { key, leader }),
            Admission::Reuse(cached) => match cached.into_response() {
                Ok(mut response) => {
                    debug!(%key, status = response.status().as_u16(), "serving cached response");
                    response.set_header(X_RESPONSE_CACHE, HIT);
                    OnRequest::Respond(response)
                }
                Err(e) => {
                    warn!(%key, error = %e, "unusable cached response, serving live");
                    OnRequest::Proceed(Pending { key, leader: false })
                }
            },
        }
    }

    /// Tags a live response as a miss and, for the episode leader, publishes
    /// it to waiting requests. The response body is left as produced.
    pub async fn on_send(&self, pending: Pending, response: &mut Response) {
        response.set_header(X_RESPONSE_CACHE, MISS);
        if !pending.leader {
            return;
        }

        let cached = CachedResponse::from_response(response);
        if let Err(e) = self
            .coordinator()
            .publish(&pending.key, self.config().ttl, &cached)
            .await
        {
            warn!(key = %pending.key, error = %e, "failed to store response in cache");
        }
    }
}

impl Middleware for ResponseCache {
    fn handle(
        &self,
        mut ctx: Context,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let cache = self.clone();
        Box::pin(async move {
            match cache.on_request(ctx.request()).await {
                OnRequest::Bypass => next.run(ctx).await,
                OnRequest::Respond(response) => response,
                OnRequest::Proceed(pending) => {
                    ctx.extensions_mut().insert(pending.key().clone());
                    let mut response = next.run(ctx).await;
                    cache.on_send(pending, &mut response).await;
                    response
                }
            }
        })
    }
}

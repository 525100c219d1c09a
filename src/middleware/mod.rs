//! Middleware pipeline — composable before/after request handler logic.
//!
//! The pipeline is where the response cache plugs into the host: a
//! [`Middleware`] sees the request before the handler runs (and may
//! short-circuit it) and sees the response after the handler produced it
//! (and may decorate it).
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`] — an ordered middleware stack terminated by an endpoint handler.
//! - [`LoggerMiddleware`] — built-in request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Request, Response, StatusCode, cache::X_RESPONSE_CACHE, context::Context};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use rttp_singleflight::{Response, context::Context, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wraps a terminal request handler so it can close a middleware chain.
///
/// The handler never sees [`Next`]; it is expected to produce the response.
pub fn endpoint<H, F>(handler: H) -> MiddlewareHandler
where
    H: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    Arc::new(
        move |ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(handler(ctx))
        },
    )
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack.
    pub fn new(middlewares: impl Into<Arc<[MiddlewareHandler]>>) -> Self {
        Self {
            middlewares: middlewares.into(),
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// If the chain is exhausted without producing a response, a
    /// `500 Internal Server Error` response is returned as a safe fallback.
    pub async fn run(mut self, ctx: Context) -> Response {
        let handler = self.middlewares.get(self.index).cloned();
        match handler {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through** — call `next.run(ctx).await` without modification.
/// - **Short-circuit** — return a [`Response`] directly without calling `next`.
/// - **Decorate** — call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// Implementations must be `Send + Sync` because middleware is shared across
/// Tokio tasks, and should not hold `&mut` references to shared state across
/// an `.await` point.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered middleware stack closed by an endpoint handler.
///
/// Middleware run in the order they were added; the endpoint runs last.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_singleflight::{Response, StatusCode};
/// use rttp_singleflight::middleware::{LoggerMiddleware, Pipeline};
///
/// let pipeline = Pipeline::new(|_ctx| async { Response::new(StatusCode::Ok) })
///     .with(Arc::new(LoggerMiddleware));
/// ```
#[derive(Clone)]
pub struct Pipeline {
    layers: Vec<MiddlewareHandler>,
    endpoint: MiddlewareHandler,
    chain: Arc<[MiddlewareHandler]>,
}

impl Pipeline {
    pub fn new<H, F>(handler: H) -> Self
    where
        H: Fn(Context) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let endpoint = endpoint(handler);
        Self {
            layers: Vec::new(),
            chain: Arc::from(vec![endpoint.clone()]),
            endpoint,
        }
    }

    /// Appends a middleware after the ones already registered.
    #[must_use]
    pub fn with<M>(mut self, middleware: Arc<M>) -> Self
    where
        M: Middleware + 'static,
    {
        self.layers.push(from_middleware(middleware));
        self.chain = self
            .layers
            .iter()
            .cloned()
            .chain(std::iter::once(self.endpoint.clone()))
            .collect();
        self
    }

    /// Runs `request` through every layer and the endpoint.
    pub async fn handle(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.chain))
            .run(Context::new(request))
            .await
    }
}

/// Built-in middleware that logs each request's method, path, status,
/// cache status, and duration.
///
/// `LoggerMiddleware` never short-circuits. Register it before the response
/// cache so the cache status it logs is the final one.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            let cache = response.headers().get(X_RESPONSE_CACHE).unwrap_or("-");
            tracing::info!(
                %method,
                %path,
                status = response.status().as_u16(),
                cache,
                elapsed = ?start.elapsed(),
                "request completed"
            );

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn handle(
            &self,
            ctx: Context,
            next: Next,
        ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let tag = self.0;
            Box::pin(async move {
                let mut response = next.run(ctx).await;
                let seen = response.headers().get("x-trail").unwrap_or("").to_owned();
                response.set_header("x-trail", format!("{seen}{tag}"));
                response
            })
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn handle(
            &self,
            _ctx: Context,
            _next: Next,
        ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(async { Response::new(StatusCode::Forbidden) })
        }
    }

    fn get(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[tokio::test]
    async fn layers_unwind_in_reverse_order() {
        let pipeline = Pipeline::new(|_ctx| async { Response::new(StatusCode::Ok) })
            .with(Arc::new(Tag("a")))
            .with(Arc::new(Tag("b")));

        let response = pipeline.handle(get("/")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("x-trail"), Some("ba"));
    }

    #[tokio::test]
    async fn short_circuit_skips_endpoint() {
        let pipeline = Pipeline::new(|_ctx| async { Response::new(StatusCode::Ok) })
            .with(Arc::new(Deny));

        assert_eq!(pipeline.handle(get("/")).await.status(), StatusCode::Forbidden);
    }

    #[tokio::test]
    async fn exhausted_chain_falls_back_to_500() {
        let response = Next::new(Vec::new()).run(Context::new(get("/"))).await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn logger_passes_response_through() {
        let pipeline = Pipeline::new(|_ctx| async { Response::new(StatusCode::Accepted) })
            .with(Arc::new(LoggerMiddleware));

        assert_eq!(pipeline.handle(get("/log")).await.status(), StatusCode::Accepted);
    }
}

//! Middleware pipeline.
//!
//! Every request runs through an ordered stack of [`Middleware`] layers before
//! reaching its route handler. A layer can pass the request on, answer it
//! directly (CORS preflight, rate limiting), or decorate the response on the
//! way back (CORS headers, request logging).
//!
//! - [`Middleware`]: trait implemented by every layer.
//! - [`Next`]: cursor into the rest of the stack.
//! - [`MiddlewareHandler`]: type-erased, cheaply cloneable layer.
//! - [`LoggerMiddleware`]: one log line per request.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;
use tracing::{info, warn};

use crate::{Response, StatusCode, context::Context};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Wraps a [`Middleware`] implementation as a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Cursor into the remaining middleware stack for one request.
///
/// Consumed by [`Next::run`], so a layer can forward at most once.
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    index: usize,
}

impl Next {
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next layer.
    ///
    /// An exhausted stack answers `500`: the router always appends the route
    /// handler last, so reaching the end means a layer forwarded past it.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// A layer in the request pipeline.
///
/// Implementations are shared across tokio tasks, so they must be
/// `Send + Sync` and return `Send` futures. Do not hold locks across an
/// `.await`.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs method, path, peer, status, and duration once the response is ready.
///
/// Server errors are logged at `warn`, everything else at `info`.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_owned();
            let path = ctx.request().path().to_owned();
            let peer = ctx
                .request()
                .remote_addr()
                .map(|addr| addr.ip().to_string())
                .unwrap_or_else(|| "-".to_owned());

            let response = next.run(ctx).await;

            let status = response.status().as_u16();
            let elapsed = start.elapsed();
            if status >= 500 {
                warn!(%method, %path, %peer, status, ?elapsed, "request failed");
            } else {
                info!(%method, %path, %peer, status, ?elapsed, "request served");
            }

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;

    fn ctx(path: &str) -> Context {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        Context::new(req)
    }

    fn terminal(status: StatusCode) -> MiddlewareHandler {
        Arc::new(move |_ctx, _next| Box::pin(async move { Response::new(status) }))
    }

    #[tokio::test]
    async fn empty_chain_is_a_server_error() {
        let res = Next::new(vec![]).run(ctx("/")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn layers_run_in_order() {
        let tag: MiddlewareHandler = Arc::new(|ctx, next: Next| {
            Box::pin(async move {
                let mut res = next.run(ctx).await;
                res.add_header("X-Layer", "outer");
                res
            })
        });

        let res = Next::new(vec![tag, terminal(StatusCode::Ok)])
            .run(ctx("/health"))
            .await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("x-layer"), Some("outer"));
    }

    #[tokio::test]
    async fn logger_passes_response_through() {
        let chain = vec![
            from_middleware(Arc::new(LoggerMiddleware)),
            terminal(StatusCode::NotFound),
        ];
        let res = Next::new(chain).run(ctx("/missing")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }
}

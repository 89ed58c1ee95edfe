//! Request routing and the middleware stack in front of it.
//!
//! | Pattern              | Example match              | Captured params |
//! |----------------------|----------------------------|-----------------|
//! | `/health`            | `/health`                  | *(none)*        |
//! | `/magic-math/:n`     | `/magic-math/42`           | `n → "42"`      |
//!
//! Trailing slashes are ignored on both patterns and paths. Routes are matched
//! in registration order. A path that matches a route under another method is
//! answered with `405 Method Not Allowed`; anything else unmatched gets `404`.

use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;

use crate::context::{Context, PathParams};
use crate::middleware::{Middleware, MiddlewareHandler, Next, from_middleware};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async route handler.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Any `Fn(Context) -> impl Future<Output = Response>` usable as a route handler.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if !pattern.contains(':') {
            return Pattern::Exact(pattern.to_string());
        }

        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Parameter(name.to_string()),
                None => Segment::Static(s.to_string()),
            })
            .collect();
        Pattern::Parameterized { segments }
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), percent_decode(path_seg));
                        }
                    }
                }
                Some(params)
            }
        }
    }
}

/// Decodes `%XX` escapes in a path segment. Malformed escapes are kept
/// verbatim; `+` is literal in paths and stays as is.
fn percent_decode(segment: &str) -> String {
    fn hex(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    if !segment.contains('%') {
        return segment.to_owned();
    }

    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = match bytes.get(i..i + 3) {
            Some([b'%', hi, lo]) => hex(*hi).zip(hex(*lo)).map(|(hi, lo)| hi << 4 | lo),
            _ => None,
        };
        match escaped {
            Some(byte) => {
                out.push(byte);
                i += 3;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// Dispatches requests to handlers through an ordered middleware stack.
///
/// ```rust,no_run
/// use magic_math::{Response, Router, StatusCode};
/// use magic_math::context::Context;
/// use magic_math::middleware::LoggerMiddleware;
///
/// let mut router = Router::new();
/// router.layer(LoggerMiddleware);
/// router.get("/magic-math/:n", |ctx: Context| async move {
///     let n = ctx.params().get("n").unwrap_or("").to_owned();
///     Response::new(StatusCode::Ok).body(n)
/// });
/// ```
pub struct Router {
    routes: Vec<Route>,
    middlewares: Vec<MiddlewareHandler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            middlewares: Vec::new(),
        }
    }

    /// Registers a handler for `GET` requests matching `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add_route(Method::Get, path, handler);
    }

    /// Appends a middleware layer. The first layer added is the outermost.
    pub fn layer<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(from_middleware(Arc::new(middleware)));
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Runs `request` through the middleware stack and the matching handler.
    pub async fn route(&self, request: Request) -> Response {
        let (endpoint, params) = self.resolve(request.method(), request.path());
        let ctx = Context::with_params(request, params);

        let mut chain = self.middlewares.clone();
        chain.push(Arc::new(move |ctx, _next| endpoint(ctx)));
        Next::new(chain).run(ctx).await
    }

    fn resolve(&self, method: &Method, path: &str) -> (Handler, PathParams) {
        let mut allowed: Vec<&str> = Vec::new();

        for route in &self.routes {
            if let Some(params) = route.pattern.matches(path) {
                if &route.method == method {
                    return (Arc::clone(&route.handler), params);
                }
                allowed.push(route.method.as_str());
            }
        }

        if allowed.is_empty() {
            let handler: Handler = Arc::new(|_ctx| Box::pin(not_found()));
            return (handler, PathParams::new());
        }

        allowed.dedup();
        let allow = allowed.join(", ");
        let handler: Handler = Arc::new(move |_ctx| {
            let allow = allow.clone();
            Box::pin(async move {
                Response::json(
                    StatusCode::MethodNotAllowed,
                    &json!({ "error": "Method not allowed" }),
                )
                .header("Allow", allow)
            })
        });
        (handler, PathParams::new())
    }
}

async fn not_found() -> Response {
    Response::json(StatusCode::NotFound, &json!({ "error": "Not found" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    #[test]
    fn pattern_parse_exact() {
        assert!(matches!(Pattern::parse("/health"), Pattern::Exact(s) if s == "/health"));
        assert!(matches!(Pattern::parse("/health/"), Pattern::Exact(s) if s == "/health"));
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
    }

    #[test]
    fn pattern_parse_parameterized() {
        match Pattern::parse("/api/magic-math/:n") {
            Pattern::Parameterized { segments } => {
                assert_eq!(segments.len(), 3);
                assert!(matches!(&segments[0], Segment::Static(s) if s == "api"));
                assert!(matches!(&segments[2], Segment::Parameter(s) if s == "n"));
            }
            other => panic!("expected Parameterized, got {other:?}"),
        }
    }

    #[test]
    fn pattern_param_extracts_value() {
        let pat = Pattern::parse("/magic-math/:n");
        let params = pat.matches("/magic-math/42").unwrap();
        assert_eq!(params.get("n"), Some("42"));

        // Whatever the client sent is captured; validation is the handler's job.
        let params = pat.matches("/magic-math/-1/").unwrap();
        assert_eq!(params.get("n"), Some("-1"));
    }

    #[test]
    fn pattern_param_wrong_shape() {
        let pat = Pattern::parse("/magic-math/:n");
        assert!(pat.matches("/magic-math").is_none());
        assert!(pat.matches("/magic-math/1/2").is_none());
        assert!(pat.matches("/magic-maths/1").is_none());
    }

    #[test]
    fn pattern_exact_root() {
        let pat = Pattern::parse("/");
        assert!(pat.matches("/").is_some());
        assert!(pat.matches("/other").is_none());
    }

    #[tokio::test]
    async fn empty_router_returns_404_json() {
        let router = Router::new();
        assert!(router.is_empty());
        let res = router.route(make_request("GET", "/")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(res.body_ref(), br#"{"error":"Not found"}"#);
    }

    #[tokio::test]
    async fn parameterized_route_receives_params() {
        let mut router = Router::new();
        router.get("/magic-math/:n", |ctx: Context| async move {
            let n = ctx.params().get("n").unwrap_or("").to_owned();
            Response::new(StatusCode::Ok).body(n)
        });
        let res = router.route(make_request("GET", "/magic-math/12")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_ref(), b"12");
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/health", |_ctx| async { Response::new(StatusCode::Ok) });
        router.get("/health", |_ctx| async { Response::new(StatusCode::NoContent) });
        assert_eq!(router.len(), 2);

        let res = router.route(make_request("GET", "/health")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[test]
    fn param_values_are_percent_decoded() {
        let pat = Pattern::parse("/magic-math/:n");
        assert_eq!(pat.matches("/magic-math/%2B7").unwrap().get("n"), Some("+7"));
        assert_eq!(pat.matches("/magic-math/%2b7").unwrap().get("n"), Some("+7"));
        assert_eq!(pat.matches("/magic-math/%20%35").unwrap().get("n"), Some(" 5"));
        assert_eq!(pat.matches("/magic-math/1+2").unwrap().get("n"), Some("1+2"));
        assert_eq!(pat.matches("/magic-math/5%").unwrap().get("n"), Some("5%"));
        assert_eq!(pat.matches("/magic-math/%zz").unwrap().get("n"), Some("%zz"));
    }

    #[tokio::test]
    async fn wrong_method_returns_405_with_allow() {
        let mut router = Router::new();
        router.get("/health", |_ctx| async { Response::new(StatusCode::Ok) });
        router.add_route(Method::Post, "/health", |_ctx| async { Response::new(StatusCode::Ok) });

        let res = router.route(make_request("DELETE", "/health")).await;
        assert_eq!(res.status(), StatusCode::MethodNotAllowed);
        assert_eq!(res.headers().get("allow"), Some("GET, POST"));
    }

    struct Stamp;

    impl Middleware for Stamp {
        fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(async move {
                let mut res = next.run(ctx).await;
                res.add_header("X-Stamp", "1");
                res
            })
        }
    }

    #[tokio::test]
    async fn middleware_wraps_matched_and_unmatched_routes() {
        let mut router = Router::new();
        router.layer(Stamp);
        router.get("/health", |_ctx| async { Response::new(StatusCode::Ok) });

        let hit = router.route(make_request("GET", "/health")).await;
        assert_eq!(hit.headers().get("x-stamp"), Some("1"));

        let miss = router.route(make_request("GET", "/nope")).await;
        assert_eq!(miss.status(), StatusCode::NotFound);
        assert_eq!(miss.headers().get("x-stamp"), Some("1"));
    }
}

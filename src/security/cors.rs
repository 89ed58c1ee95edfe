//! Cross-Origin Resource Sharing.
//!
//! The browser form may be served from a different origin than the API (a dev
//! server on another port, a CDN), so every API response carries
//! `Access-Control-*` headers and preflight requests are answered here.

use std::pin::Pin;

use crate::{
    Method, Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

/// CORS middleware.
///
/// - No `Origin` header, or an origin outside the allow-list: the request
///   passes through untouched.
/// - `OPTIONS` preflight: answered with `204 No Content` and the allow
///   headers; the route handler is not called.
/// - Anything else: the handler runs and the allow headers are appended.
///
/// `Vary: Origin` is added whenever a specific origin is echoed back.
///
/// ```rust
/// use magic_math::security::CorsMiddleware;
///
/// let any = CorsMiddleware::new();
/// let strict = CorsMiddleware::with_origins(["https://magic.example.com"]);
/// ```
pub struct CorsMiddleware {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsMiddleware {
    /// Allows every origin, `GET` and `OPTIONS`, and the `Content-Type` header.
    pub fn new() -> Self {
        Self::with_origins(["*"])
    }

    /// Allows only the listed origins. `"*"` in the list allows all.
    pub fn with_origins<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_origins: origins.into_iter().map(Into::into).collect(),
            allowed_methods: vec!["GET".to_string(), "OPTIONS".to_string()],
            allowed_headers: vec!["Content-Type".to_string()],
        }
    }

    #[must_use]
    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_methods.push(method.into());
        self
    }

    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    // The value for `Access-Control-Allow-Origin`, or `None` if `origin` is refused.
    fn resolve_origin(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let allow_origin = ctx
            .request()
            .headers()
            .get("origin")
            .and_then(|origin| self.resolve_origin(origin));
        let methods = self.allowed_methods.join(", ");
        let headers = self.allowed_headers.join(", ");

        Box::pin(async move {
            let Some(allow_origin) = allow_origin else {
                return next.run(ctx).await;
            };

            let is_preflight = ctx.request().method() == &Method::Options;
            let mut resp = if is_preflight {
                Response::new(StatusCode::NoContent).header("Access-Control-Max-Age", "3600")
            } else {
                next.run(ctx).await
            };

            if allow_origin != "*" {
                resp.add_header("Vary", "Origin");
            }
            resp.add_header("Access-Control-Allow-Origin", allow_origin);
            resp.add_header("Access-Control-Allow-Methods", methods);
            resp.add_header("Access-Control-Allow-Headers", headers);
            resp
        })
    }
}

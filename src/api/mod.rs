//! HTTP surface of the service.
//!
//! | Route                    | Response                                   |
//! |--------------------------|--------------------------------------------|
//! | `GET /`                  | HTML calculator form                       |
//! | `GET /health`            | `{"status":"healthy"}`                     |
//! | `GET /magic-math/:n`     | `{"result": f(n)}`                         |
//! | `GET /api/magic-math/:n` | same as above; the path the form calls     |
//!
//! Invalid input is answered with `400` and an `errors` array:
//!
//! ```json
//! {"errors":[{"type":"field","value":"-1","msg":"Input must be a non-negative integer","path":"n","location":"params"}]}
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::config::Config;
use crate::context::Context;
use crate::engine::{EngineError, MAX_INPUT};
use crate::lookup::{CacheFrontedLookup, LookupError, Source};
use crate::middleware::LoggerMiddleware;
use crate::security::{CorsMiddleware, RateLimitMiddleware};
use crate::{Response, Router, StatusCode};

const INDEX_HTML: &str = include_str!("index.html");

const NOT_AN_INTEGER: &str = "Input must be a non-negative integer";

/// One entry of a `400` response's `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: String,
    pub msg: String,
    pub path: &'static str,
    pub location: &'static str,
}

impl FieldError {
    fn param_n(value: &str, msg: impl Into<String>) -> Self {
        Self {
            kind: "field",
            value: value.to_owned(),
            msg: msg.into(),
            path: "n",
            location: "params",
        }
    }

    fn into_response(self) -> Response {
        Response::json(StatusCode::BadRequest, &json!({ "errors": [self] }))
    }
}

fn too_large_msg() -> String {
    format!("Input must not exceed {MAX_INPUT}")
}

/// Validates the raw `n` path segment.
///
/// Accepts an optional sign followed by decimal digits (zero padding
/// allowed, so `007` is 7), then requires `0 <= n <= MAX_INPUT`.
pub fn parse_n(raw: &str) -> Result<i64, FieldError> {
    let digits = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    let well_formed = !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
    let negative = raw.starts_with('-') && digits.bytes().any(|b| b != b'0');
    if !well_formed || negative {
        return Err(FieldError::param_n(raw, NOT_AN_INTEGER));
    }

    // Well-formed but beyond i64 is certainly beyond MAX_INPUT.
    match raw.parse::<i64>() {
        Ok(n) if n <= MAX_INPUT => Ok(n),
        _ => Err(FieldError::param_n(raw, too_large_msg())),
    }
}

/// Handles `GET /magic-math/:n`.
pub async fn magic_math(lookup: Arc<CacheFrontedLookup>, ctx: Context) -> Response {
    let raw = ctx.params().get("n").unwrap_or_default();
    let n = match parse_n(raw) {
        Ok(n) => n,
        Err(e) => return e.into_response(),
    };

    match lookup.lookup(n).await {
        Ok(found) => {
            let cache_status = match found.source {
                Source::ExternalCache => "HIT",
                Source::Computed => "MISS",
            };
            Response::json(StatusCode::Ok, &json!({ "result": found.value }))
                .header("X-Cache", cache_status)
        }
        Err(LookupError::Engine(EngineError::InvalidInput { .. })) => {
            FieldError::param_n(raw, NOT_AN_INTEGER).into_response()
        }
        Err(LookupError::Engine(EngineError::Overflow { .. })) => {
            FieldError::param_n(raw, too_large_msg()).into_response()
        }
        Err(e) => {
            error!(n, error = %e, "error calculating magic-math");
            internal_error()
        }
    }
}

pub async fn health(_ctx: Context) -> Response {
    Response::json(StatusCode::Ok, &json!({ "status": "healthy" }))
}

pub async fn index(_ctx: Context) -> Response {
    Response::html(INDEX_HTML)
}

fn internal_error() -> Response {
    Response::json(
        StatusCode::InternalServerError,
        &json!({ "error": "Internal server error" }),
    )
}

/// Builds the full router: middleware stack from `config` plus every route.
///
/// Layers, outermost first: request logger, CORS, rate limiter.
pub fn router(lookup: Arc<CacheFrontedLookup>, config: &Config) -> Router {
    let mut router = Router::new();

    router.layer(LoggerMiddleware);
    router.layer(CorsMiddleware::with_origins(config.cors.allowed_origins.clone()));
    if config.rate_limit.enabled {
        router.layer(RateLimitMiddleware::new(
            config.rate_limit.max_requests,
            config.rate_limit.window(),
        ));
    }

    router.get("/", index);
    router.get("/health", health);
    for path in ["/magic-math/:n", "/api/magic-math/:n"] {
        let lookup = Arc::clone(&lookup);
        router.get(path, move |ctx: Context| magic_math(Arc::clone(&lookup), ctx));
    }

    router
}

//! Per-client fixed-window rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::pin::Pin;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use tracing::debug;

use crate::{
    Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

/// Windows are swept for expiry once the table holds this many clients.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Result of counting one request against its client's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Allows at most `max_requests` per client IP in each `window`.
///
/// Every response carries `X-RateLimit-Limit` and `X-RateLimit-Remaining`.
/// Over the limit, the handler is skipped and the client gets `429` with a
/// `Retry-After` header. Requests with no known peer address share a single
/// window.
pub struct RateLimitMiddleware {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<Option<IpAddr>, Window>>,
}

impl RateLimitMiddleware {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, client: Option<IpAddr>, now: Instant) -> Decision {
        let mut clients = self.clients.lock();

        if clients.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = clients.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.started);
            return Decision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        entry.count += 1;
        Decision::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }
}

impl Middleware for RateLimitMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let client = ctx.request().remote_addr().map(|addr| addr.ip());
        let decision = self.check(client, Instant::now());
        let limit = self.max_requests.to_string();

        Box::pin(async move {
            match decision {
                Decision::Allowed { remaining } => {
                    let mut resp = next.run(ctx).await;
                    resp.add_header("X-RateLimit-Limit", limit);
                    resp.add_header("X-RateLimit-Remaining", remaining.to_string());
                    resp
                }
                Decision::Limited { retry_after } => {
                    debug!(client = ?client, ?retry_after, "rate limit exceeded");
                    // Round up so clients never retry a moment too early.
                    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                    Response::json(
                        StatusCode::TooManyRequests,
                        &json!({ "error": "Too many requests, please try again later." }),
                    )
                    .header("Retry-After", secs.to_string())
                    .header("X-RateLimit-Limit", limit)
                    .header("X-RateLimit-Remaining", "0")
                }
            }
        })
    }
}

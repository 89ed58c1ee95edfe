//! Request-level protections: CORS and per-client rate limiting.

mod cors;
mod rate_limit;

pub use cors::CorsMiddleware;
pub use rate_limit::RateLimitMiddleware;

//! # magic-math
//!
//! An HTTP service answering `GET /magic-math/{n}` with
//!
//! ```text
//! f(0) = 0
//! f(1) = 1
//! f(n) = f(n-1) + f(n-2) + n
//! ```
//!
//! Results are memoized in process by [`engine::RecurrenceEngine`] and
//! shared between instances through an external cache (Redis) consulted by
//! [`lookup::CacheFrontedLookup`] before any computation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use magic_math::cache::MemoryCache;
//! use magic_math::config::Config;
//! use magic_math::engine::RecurrenceEngine;
//! use magic_math::lookup::CacheFrontedLookup;
//! use magic_math::{Server, api};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let lookup = CacheFrontedLookup::new(
//!         Arc::new(RecurrenceEngine::new()),
//!         Arc::new(MemoryCache::new()),
//!     );
//!     let router = api::router(Arc::new(lookup), &config);
//!
//!     let server = Server::bind("127.0.0.1:5000").await?;
//!     server.serve(router, std::future::pending()).await?;
//!     Ok(())
//! }
//! ```

// ── Domain ────────────────────────────────────────────────────────────────────
pub mod cache;
pub mod engine;
pub mod lookup;

// ── HTTP plumbing ─────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod security;
pub mod server;

// ── Service wiring ────────────────────────────────────────────────────────────
pub mod api;
pub mod config;
pub mod telemetry;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};

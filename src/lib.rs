//! api-router - an HTTP API gateway for a family of versioned internal APIs.
//!
//! Requests arrive on a single public host. The router picks an upstream from
//! the path prefix, strips the public version segment, proxies the exchange
//! and rewrites `href` links in JSON responses so they point at the public
//! `api.` and `download.` domains. Every request produces two audit events
//! (before and after dispatch), encoded as Avro and handed to a producer.
//!
//! # Features
//! - Path-prefix / pattern / exact mount table with a default upstream
//! - Reverse proxy with hop-by-hop header stripping and an upstream timeout
//! - Streaming JSON link rewriting (non-JSON bodies pass through untouched)
//! - CORS origin allow list and a beta-domain gate for versioned routes
//! - Request identity context (request id, collection id, caller identity)
//! - Deprecation headers and scheduled outage windows
//! - Aggregated upstream health at `/health` and `/<version>/health`
//! - Environment-first configuration with full validation
//! - Structured tracing and graceful shutdown
//!
//! # Architecture
//! Traits for the outside world (upstream HTTP, identity lookup, audit
//! publishing) live in [`ports`]; their implementations and the axum
//! middleware stack live in [`adapters`]; pure request/response logic
//! (routing, rewriting, deprecations, audit encoding) lives in [`core`].
//!
//! # Error Handling
//! Domain modules return their own `thiserror` enums. Startup and wiring use
//! `eyre::Result<T>` with `WrapErr` context.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HealthChecker, HttpClientAdapter, build_router},
    config::Config,
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};

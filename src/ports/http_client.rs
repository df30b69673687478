use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

/// Custom error type for upstream HTTP operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when the connection to the upstream fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the upstream does not answer in time
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// Error when the outbound request cannot be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Error when a probe receives a non-success status
    #[error("Upstream returned error status: {status}, url: {url}")]
    BackendError {
        /// The URL that was requested
        url: String,
        /// The status code returned by the upstream
        status: StatusCode,
    },
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for talking to upstream services
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an already rewritten request to an upstream.
    ///
    /// The request URI must be absolute. The response body is streamed back
    /// untouched; only hop-by-hop headers are removed.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;

    /// Probe `url` with a GET bounded by `timeout`.
    ///
    /// Returns `Ok(true)` for a 2xx answer and an error otherwise.
    async fn health_check(&self, url: &str, timeout: Duration) -> HttpClientResult<bool>;
}

//! Shared doubles for adapter unit tests.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{HeaderMap, Method, Request, Response, Uri};

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

type Responder = dyn Fn(&Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> + Send + Sync;

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// HttpClient double that answers with a closure and remembers every
/// request it was given.
pub struct MockHttpClient {
    responder: Box<Responder>,
    /// URLs whose health probe fails.
    pub down: Mutex<Vec<String>>,
    pub seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockHttpClient {
    pub fn new(
        responder: impl Fn(&Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            down: Mutex::new(Vec::new()),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_body(body: &'static str) -> Self {
        Self::new(move |_| Ok(Response::new(AxumBody::from(body))))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(HttpClientError::ConnectionError("connection refused".into())))
    }

    pub fn set_down(&self, url: &str, down: bool) {
        let mut urls = self.down.lock().unwrap();
        urls.retain(|u| u != url);
        if down {
            urls.push(url.to_string());
        }
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        self.seen.lock().unwrap().push(SeenRequest {
            method: req.method().clone(),
            uri: req.uri().clone(),
            headers: req.headers().clone(),
        });
        (self.responder)(&req)
    }

    async fn health_check(&self, url: &str, timeout: Duration) -> HttpClientResult<bool> {
        if self.down.lock().unwrap().iter().any(|u| u == url) {
            Err(HttpClientError::Timeout(timeout))
        } else {
            Ok(true)
        }
    }
}

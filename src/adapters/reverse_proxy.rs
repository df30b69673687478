use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderValue, Request, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    adapters::http_client::strip_hop_by_hop,
    core::{rewriter::UrlRewriter, routing::ProxyTarget},
    ports::http_client::HttpClient,
};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("invalid upstream URL for {name} '{url}': {reason}")]
    InvalidTarget {
        name: String,
        url: String,
        reason: String,
    },

    #[error("cannot build outbound URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
}

/// Forwards requests for one mount to its upstream.
///
/// Built once per mount at startup and shared between requests.
pub struct ReverseProxy {
    target: ProxyTarget,
    base: String,
    client: Arc<dyn HttpClient>,
    rewriter: Option<Arc<UrlRewriter>>,
}

impl ReverseProxy {
    pub fn new(target: ProxyTarget, client: Arc<dyn HttpClient>) -> Result<Self, ProxyError> {
        let invalid = |reason: String| ProxyError::InvalidTarget {
            name: target.name.clone(),
            url: target.target_url.clone(),
            reason,
        };
        let parsed = url::Url::parse(&target.target_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
        }
        if parsed.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }

        let rewriter = target
            .environment_host
            .as_deref()
            .map(|host| Arc::new(UrlRewriter::new(host, target.context_url.clone())));

        Ok(Self {
            base: target.target_url.trim_end_matches('/').to_string(),
            target,
            client,
            rewriter,
        })
    }

    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }

    /// Upstream URI: target URL, then the path with the version segment
    /// removed, then the original query.
    pub fn outbound_uri(&self, uri: &Uri) -> Result<Uri, ProxyError> {
        let path = self.target.outbound_path(uri.path());
        let outbound = match uri.query() {
            Some(query) => format!("{}{path}?{query}", self.base),
            None => format!("{}{path}", self.base),
        };
        outbound.parse().map_err(|e: http::uri::InvalidUri| ProxyError::InvalidUri {
            uri: outbound.clone(),
            reason: e.to_string(),
        })
    }

    /// Proxy one request. Transport failures become an empty `502`; upstream
    /// statuses pass through.
    pub async fn forward(&self, req: Request<Body>) -> Response {
        let client_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let (mut parts, body) = req.into_parts();

        let uri = match self.outbound_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(upstream = %self.target.name, error = %e, "Cannot proxy request");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        let inbound_host = parts.headers.get(header::HOST).cloned();
        strip_hop_by_hop(&mut parts.headers);

        if let Some(ip) = client_ip {
            let forwarded_for = match parts
                .headers
                .get(X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
            {
                Some(prior) => format!("{prior}, {ip}"),
                None => ip.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
                parts.headers.insert(X_FORWARDED_FOR, value);
            }
        }
        if let Some(host) = inbound_host {
            parts.headers.insert(X_FORWARDED_HOST, host);
        }

        tracing::debug!(
            upstream = %self.target.name,
            from = %parts.uri,
            to = %uri,
            "Proxying request"
        );
        parts.uri = uri;

        match self
            .client
            .send_request(Request::from_parts(parts, body))
            .await
        {
            Ok(mut response) => {
                if let Some(rewriter) = &self.rewriter {
                    response.extensions_mut().insert(Arc::clone(rewriter));
                }
                response
            }
            Err(e) => {
                tracing::warn!(upstream = %self.target.name, error = %e, "Upstream request failed");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

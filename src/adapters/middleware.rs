//! Request pipeline middleware for the gateway.
//!
//! Each concern is a plain async function taking the request, the `Next`
//! handler and its (shared, read-only) state, plus a `create_*` helper that
//! wraps it into a cloneable closure for `axum::middleware::from_fn`. The
//! router installs them in this order, outermost first: origin, beta gate,
//! identity, path filter, deprecation, audit, response interceptor.
use std::{
    collections::HashMap,
    future::Future,
    net::IpAddr,
    pin::Pin,
    sync::Arc,
};

use axum::{
    extract::Request,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use tracing::Instrument;

use crate::{
    adapters::interceptor,
    core::{
        audit::AuditEvent,
        avro::AvroMarshaller,
        clock::Clock,
        context::{COLLECTION_ID_HEADER, REQUEST_ID_HEADER, RequestContext},
        deprecation::{Decision, DeprecationEngine},
        rewriter::UrlRewriter,
        routing::{MountTable, Resolved},
    },
    ports::{audit_producer::AuditProducer, identity::IdentityResolver},
    tracing_setup,
};

/// Boxed future returned by the `create_*` closures.
pub type MiddlewareFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

// ---------------------------------------------------------------------------
// Origin policy
// ---------------------------------------------------------------------------

/// CORS allow list.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allow_any: bool,
    allowed: Vec<String>,
}

/// What the origin middleware does with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginDecision {
    /// Continue, optionally setting `Access-Control-Allow-Origin`.
    Allow(Option<HeaderValue>),
    Reject,
}

impl OriginPolicy {
    pub fn new(allowed: &[String]) -> Self {
        Self {
            allow_any: allowed.iter().any(|o| o == "*"),
            allowed: allowed.to_vec(),
        }
    }

    pub fn evaluate(&self, origin: Option<&HeaderValue>) -> OriginDecision {
        if self.allow_any {
            return OriginDecision::Allow(Some(HeaderValue::from_static("*")));
        }
        let Some(origin) = origin.filter(|o| !o.is_empty()) else {
            return OriginDecision::Allow(None);
        };
        let listed = origin
            .to_str()
            .is_ok_and(|o| self.allowed.iter().any(|allowed| allowed == o));
        if listed {
            OriginDecision::Allow(Some(origin.clone()))
        } else {
            OriginDecision::Reject
        }
    }
}

/// Enforce the CORS allow list. Unlisted origins get `401`.
pub async fn origin_middleware(req: Request, next: Next, policy: Arc<OriginPolicy>) -> Response {
    match policy.evaluate(req.headers().get(header::ORIGIN)) {
        OriginDecision::Reject => {
            tracing::info!(
                origin = ?req.headers().get(header::ORIGIN),
                path = %req.uri().path(),
                "Rejecting request from unlisted origin"
            );
            StatusCode::UNAUTHORIZED.into_response()
        }
        OriginDecision::Allow(allow_origin) => {
            let mut response = next.run(req).await;
            if let Some(value) = allow_origin {
                response
                    .headers_mut()
                    .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
            response
        }
    }
}

/// Create a cloneable closure wrapping [`origin_middleware`].
pub fn create_origin_middleware(
    policy: Arc<OriginPolicy>,
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone {
    move |req, next| {
        let policy = policy.clone();
        Box::pin(async move { origin_middleware(req, next, policy).await })
    }
}

// ---------------------------------------------------------------------------
// Beta gate
// ---------------------------------------------------------------------------

const BETA_HOST_PREFIX: &str = "api.beta";

/// Restricts beta-only mounts to the beta domain and internal traffic.
#[derive(Debug, Clone)]
pub struct BetaGate {
    enabled: bool,
    restricted: MountTable<bool>,
}

impl BetaGate {
    /// `restricted` maps each mount to whether it is beta-only.
    pub fn new(enabled: bool, restricted: MountTable<bool>) -> Self {
        Self {
            enabled,
            restricted,
        }
    }

    pub fn allows(&self, path: &str, host: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }
        let restricted = match self.restricted.resolve(path) {
            Resolved::Upstream(restricted) => *restricted,
            Resolved::Health => false,
        };
        if !restricted {
            return true;
        }
        host.is_some_and(|h| is_internal_host(h) || h.starts_with(BETA_HOST_PREFIX))
    }
}

/// `localhost` or an IP literal, with or without a port.
pub fn is_internal_host(host: &str) -> bool {
    let name = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        match host.rsplit_once(':') {
            Some((name, port))
                if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) =>
            {
                name
            }
            _ => host,
        }
    };
    name.eq_ignore_ascii_case("localhost") || name.parse::<IpAddr>().is_ok()
}

fn request_host(req: &Request) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
}

/// Reject beta-only requests arriving on a public, non-beta host with `404`.
pub async fn beta_gate_middleware(req: Request, next: Next, gate: Arc<BetaGate>) -> Response {
    let host = request_host(&req);
    if gate.allows(req.uri().path(), host.as_deref()) {
        next.run(req).await
    } else {
        tracing::info!(
            host = host.as_deref().unwrap_or_default(),
            path = %req.uri().path(),
            "Rejecting beta request on non-beta host"
        );
        StatusCode::NOT_FOUND.into_response()
    }
}

/// Create a cloneable closure wrapping [`beta_gate_middleware`].
pub fn create_beta_gate_middleware(
    gate: Arc<BetaGate>,
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone {
    move |req, next| {
        let gate = gate.clone();
        Box::pin(async move { beta_gate_middleware(req, next, gate).await })
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Attach a [`RequestContext`] to the request.
///
/// The request id is taken from `X-Request-Id` or generated, and is written
/// back so the upstream sees the same id. Resolver failures leave the caller
/// identity blank.
pub async fn identity_middleware(
    mut req: Request,
    next: Next,
    resolver: Arc<dyn IdentityResolver>,
) -> Response {
    let supplied = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let request_id = match supplied {
        Some(id) => id,
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            id
        }
    };

    let collection_id = req
        .headers()
        .get(COLLECTION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let caller_identity = match resolver.resolve(req.headers()).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Identity lookup failed");
            None
        }
    };

    let span = tracing_setup::create_request_span(
        req.method().as_str(),
        req.uri().path(),
        &request_id,
    );
    req.extensions_mut().insert(RequestContext {
        request_id,
        caller_identity,
        collection_id,
    });

    next.run(req).instrument(span).await
}

/// Create a cloneable closure wrapping [`identity_middleware`].
pub fn create_identity_middleware(
    resolver: Arc<dyn IdentityResolver>,
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone {
    move |req, next| {
        let resolver = resolver.clone();
        Box::pin(async move { identity_middleware(req, next, resolver).await })
    }
}

// ---------------------------------------------------------------------------
// Path filter
// ---------------------------------------------------------------------------

/// Handler run by the path filter in place of the rest of the chain.
pub type FilterHandler = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

struct FilterRoute {
    methods: Vec<Method>,
    handler: FilterHandler,
}

/// Exact-path short circuits, e.g. `GET /health`.
#[derive(Default)]
pub struct PathFilter {
    routes: HashMap<String, FilterRoute>,
}

impl PathFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        mut self,
        path: impl Into<String>,
        methods: &[Method],
        handler: FilterHandler,
    ) -> Self {
        self.routes.insert(
            path.into(),
            FilterRoute {
                methods: methods.to_vec(),
                handler,
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn handler_for(&self, path: &str, method: &Method) -> Option<&FilterHandler> {
        self.routes
            .get(path)
            .filter(|route| route.methods.contains(method))
            .map(|route| &route.handler)
    }
}

pub async fn path_filter_middleware(req: Request, next: Next, filter: Arc<PathFilter>) -> Response {
    match filter.handler_for(req.uri().path(), req.method()) {
        Some(handler) => handler(req).await,
        None => next.run(req).await,
    }
}

/// Create a cloneable closure wrapping [`path_filter_middleware`].
pub fn create_path_filter_middleware(
    filter: Arc<PathFilter>,
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone {
    move |req, next| {
        let filter = filter.clone();
        Box::pin(async move { path_filter_middleware(req, next, filter).await })
    }
}

// ---------------------------------------------------------------------------
// Deprecation
// ---------------------------------------------------------------------------

/// Add deprecation headers to deprecated paths and answer `404` while one of
/// their outages is open.
pub async fn deprecation_middleware(
    req: Request,
    next: Next,
    engine: Arc<DeprecationEngine>,
) -> Response {
    match engine.decide(req.uri().path()) {
        None => next.run(req).await,
        Some(Decision::Outage(deprecation)) => {
            tracing::info!(path = %req.uri().path(), "Deprecated path is in an outage window");
            let mut response =
                (StatusCode::NOT_FOUND, deprecation.message.clone()).into_response();
            deprecation.apply_headers(response.headers_mut());
            response
        }
        Some(Decision::Proceed(deprecation)) => {
            let mut response = next.run(req).await;
            deprecation.apply_headers(response.headers_mut());
            response
        }
    }
}

/// Create a cloneable closure wrapping [`deprecation_middleware`].
pub fn create_deprecation_middleware(
    engine: Arc<DeprecationEngine>,
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone {
    move |req, next| {
        let engine = engine.clone();
        Box::pin(async move { deprecation_middleware(req, next, engine).await })
    }
}

// ---------------------------------------------------------------------------
// Response interceptor
// ---------------------------------------------------------------------------

/// Rewrite JSON bodies of responses that carry a [`UrlRewriter`] extension.
pub async fn response_interceptor_middleware(req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    match response.extensions().get::<Arc<UrlRewriter>>().cloned() {
        Some(rewriter) => interceptor::intercept(response, &rewriter).await,
        None => response,
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Marshals audit events and hands them to the producer.
pub struct Auditor {
    producer: Arc<dyn AuditProducer>,
    marshaller: AvroMarshaller,
    clock: Arc<dyn Clock>,
}

impl Auditor {
    pub fn new(producer: Arc<dyn AuditProducer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            producer,
            marshaller: AvroMarshaller,
            clock,
        }
    }

    pub fn event_for(&self, req: &Request) -> AuditEvent {
        AuditEvent::from_request(
            req.extensions().get::<RequestContext>(),
            req.method(),
            req.uri(),
            self.clock.now(),
        )
    }

    /// Publish one event. Failures are logged and swallowed.
    pub async fn publish(&self, event: &AuditEvent) {
        let bytes = match self.marshaller.marshal(Some(event)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, path = %event.path, "Failed to marshal audit event");
                return;
            }
        };
        if let Err(e) = self.producer.send(bytes).await {
            tracing::error!(
                error = %e,
                request_id = %event.request_id,
                path = %event.path,
                "Failed to publish audit event"
            );
        }
    }
}

/// Emit an audit event before dispatch (status 0) and after it (final
/// status).
pub async fn audit_middleware(req: Request, next: Next, auditor: Arc<Auditor>) -> Response {
    let event = auditor.event_for(&req);
    auditor.publish(&event).await;

    let response = next.run(req).await;

    auditor
        .publish(&event.with_status(response.status().as_u16()))
        .await;
    response
}

/// Create a cloneable closure wrapping [`audit_middleware`].
pub fn create_audit_middleware(
    auditor: Arc<Auditor>,
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone {
    move |req, next| {
        let auditor = auditor.clone();
        Box::pin(async move { audit_middleware(req, next, auditor).await })
    }
}

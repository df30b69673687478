//! Composition of the gateway's axum `Router`.
//!
//! Everything here runs once at startup: the mount table is turned into a
//! table of [`ReverseProxy`] instances, the middleware state is built from
//! configuration, and the layers are stacked in their fixed order.
use std::sync::Arc;

use axum::{
    Router,
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
};
use eyre::{Result, WrapErr};
use futures_util::FutureExt;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::{
        health_checker::HealthChecker,
        middleware::{
            Auditor, BetaGate, FilterHandler, OriginPolicy, PathFilter, create_audit_middleware,
            create_beta_gate_middleware, create_deprecation_middleware, create_identity_middleware,
            create_origin_middleware, create_path_filter_middleware,
            response_interceptor_middleware,
        },
        reverse_proxy::ReverseProxy,
    },
    config::Config,
    core::{
        clock::Clock,
        deprecation::DeprecationEngine,
        routing::{MountTable, PathMatcher, ProxyTarget, Resolved, Route},
    },
    ports::{audit_producer::AuditProducer, http_client::HttpClient, identity::IdentityResolver},
};

/// External collaborators the router is built around.
#[derive(Clone)]
pub struct Collaborators {
    pub http_client: Arc<dyn HttpClient>,
    pub identity: Arc<dyn IdentityResolver>,
    pub audit_producer: Arc<dyn AuditProducer>,
    pub health: Arc<HealthChecker>,
    pub clock: Arc<dyn Clock>,
}

/// Innermost handler: sends each request to the proxy its path resolves to.
pub struct Dispatcher {
    proxies: MountTable<Arc<ReverseProxy>>,
    health: Arc<HealthChecker>,
}

impl Dispatcher {
    pub fn new(proxies: MountTable<Arc<ReverseProxy>>, health: Arc<HealthChecker>) -> Self {
        Self { proxies, health }
    }

    pub async fn dispatch(&self, req: Request) -> Response {
        match self.proxies.resolve(req.uri().path()) {
            Resolved::Upstream(proxy) => proxy.forward(req).await,
            // GET is answered by the path filter; anything else lands here.
            Resolved::Health if req.method() == Method::GET => self.health.handle(),
            Resolved::Health => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        }
    }
}

async fn dispatch_handler(State(dispatcher): State<Arc<Dispatcher>>, req: Request) -> Response {
    dispatcher.dispatch(req).await
}

/// Upstreams to probe: every distinct target in `table`.
pub fn health_targets(table: &MountTable<ProxyTarget>) -> Vec<(String, String)> {
    table
        .mounts()
        .iter()
        .filter_map(|m| match &m.route {
            Route::Upstream(target) => Some(target),
            Route::Health => None,
        })
        .chain(std::iter::once(table.default_upstream()))
        .map(|target| (target.name.clone(), target.target_url.clone()))
        .collect()
}

/// Build the gateway router with every middleware in place.
pub fn build_router(config: &Config, collaborators: Collaborators) -> Result<Router> {
    let table = MountTable::from_config(config).wrap_err("Failed to build mount table")?;

    let deprecations =
        DeprecationEngine::from_json(&config.deprecation_config, collaborators.clock.clone())
            .wrap_err("Failed to load deprecation configuration")?;

    let beta_gate = BetaGate::new(
        config.enable_v1_beta_restriction,
        table.clone().map(|target| target.beta_restricted),
    );

    let mut path_filter = PathFilter::new();
    for mount in table.mounts() {
        if let (PathMatcher::Exact(path), Route::Health) = (&mount.matcher, &mount.route) {
            let health = collaborators.health.clone();
            let handler: FilterHandler = Arc::new(move |_req: Request| {
                let health = health.clone();
                async move { health.handle() }.boxed()
            });
            path_filter = path_filter.route(path.clone(), &[Method::GET], handler);
        }
    }

    let client = collaborators.http_client.clone();
    let proxies = table
        .try_map(|target| ReverseProxy::new(target, client.clone()).map(Arc::new))
        .wrap_err("Failed to create upstream proxies")?;

    tracing::info!(
        mounts = proxies.mounts().len(),
        deprecations = deprecations.entries().len(),
        health_paths = path_filter.len(),
        default_upstream = %proxies.default_upstream().target().target_url,
        "Router assembled"
    );

    let dispatcher = Arc::new(Dispatcher::new(proxies, collaborators.health.clone()));
    let auditor = Arc::new(Auditor::new(
        collaborators.audit_producer.clone(),
        collaborators.clock.clone(),
    ));

    let layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(create_origin_middleware(Arc::new(
            OriginPolicy::new(&config.allowed_origins),
        ))))
        .layer(middleware::from_fn(create_beta_gate_middleware(Arc::new(
            beta_gate,
        ))))
        .layer(middleware::from_fn(create_identity_middleware(
            collaborators.identity.clone(),
        )))
        .layer(middleware::from_fn(create_path_filter_middleware(Arc::new(
            path_filter,
        ))))
        .layer(middleware::from_fn(create_deprecation_middleware(Arc::new(
            deprecations,
        ))))
        .layer(middleware::from_fn(create_audit_middleware(auditor)))
        .layer(middleware::from_fn(response_interceptor_middleware));

    Ok(Router::new()
        .fallback(dispatch_handler)
        .with_state(dispatcher)
        .layer(layers))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{body::Body, http::HeaderMap};
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use tokio::sync::mpsc;
    use tower::ServiceExt; // for oneshot

    use super::*;
    use crate::{
        adapters::{audit_producer::ChannelProducer, test_support::MockHttpClient},
        core::{avro::AvroMarshaller, clock::SystemClock},
        ports::identity::IdentityError,
    };

    struct Anonymous;

    #[async_trait]
    impl IdentityResolver for Anonymous {
        async fn resolve(&self, _headers: &HeaderMap) -> Result<Option<String>, IdentityError> {
            Ok(None)
        }
    }

    fn collaborators(client: Arc<MockHttpClient>, config: &Config) -> Collaborators {
        audited_collaborators(client, config).0
    }

    fn audited_collaborators(
        client: Arc<MockHttpClient>,
        config: &Config,
    ) -> (Collaborators, mpsc::Receiver<Bytes>) {
        let (producer, rx) = ChannelProducer::new(64);
        let table = MountTable::from_config(config).unwrap();
        let health = Arc::new(HealthChecker::new(
            health_targets(&table),
            client.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(30),
            Duration::from_secs(90),
        ));
        let collaborators = Collaborators {
            http_client: client,
            identity: Arc::new(Anonymous),
            audit_producer: Arc::new(producer),
            health,
            clock: Arc::new(SystemClock),
        };
        (collaborators, rx)
    }

    #[tokio::test]
    async fn test_versioned_request_reaches_matching_upstream() {
        let config = Config::default();
        let client = Arc::new(MockHttpClient::with_body("ok"));
        let app = build_router(&config, collaborators(client.clone(), &config)).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/hierarchies/h1?x=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = client.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].uri.to_string(),
            format!("{}/hierarchies/h1?x=1", config.hierarchy_api_url)
        );
    }

    #[tokio::test]
    async fn test_health_is_answered_locally() {
        let config = Config::default();
        let client = Arc::new(MockHttpClient::with_body("ok"));
        let app = build_router(&config, collaborators(client.clone(), &config)).unwrap();

        for path in ["/health", "/v1/health"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["status"], "OK");
        }

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_post_audit_records_status_after_rewrite_failure() {
        let config = Config::default();
        let client = Arc::new(MockHttpClient::with_body("{\"links\": "));
        let (collaborators, mut audit_rx) = audited_collaborators(client, &config);
        let app = build_router(&config, collaborators).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/datasets/d1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let marshaller = AvroMarshaller;
        let pre = marshaller.unmarshal(&audit_rx.recv().await.unwrap()).unwrap();
        let post = marshaller.unmarshal(&audit_rx.recv().await.unwrap()).unwrap();
        assert_eq!(pre.status_code, 0);
        assert_eq!(post.status_code, 500);
    }

    #[tokio::test]
    async fn test_invalid_deprecation_document_fails_build() {
        let config = Config {
            deprecation_config: r#"[{"paths":["no-slash"],"date":"2024-01-01"}]"#.to_string(),
            ..Config::default()
        };
        let client = Arc::new(MockHttpClient::with_body("ok"));
        assert!(build_router(&config, collaborators(client, &config)).is_err());
    }

    #[test]
    fn test_health_targets_cover_default_upstream() {
        let config = Config::default();
        let table = MountTable::from_config(&config).unwrap();
        let targets = health_targets(&table);
        assert!(targets.iter().any(|(_, url)| url == &config.zebedee_url));
        assert!(targets.iter().any(|(_, url)| url == &config.poc_api_url));
    }
}

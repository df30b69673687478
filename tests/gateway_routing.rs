// End-to-end tests: the full router in front of real axum upstreams.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use api_router::{
    adapters::{
        ChannelProducer, Collaborators, HealthChecker, HttpClientAdapter, ZebedeeIdentityClient,
        build_router, health_targets,
    },
    config::Config,
    core::{AvroMarshaller, MountTable, SystemClock},
    ports::HttpClient,
};
use axum::{
    Router,
    body::Body,
    extract::Request,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceExt; // for oneshot

const TEST_BODY_HEADER: &str = "x-test-body";
const BIG_BODY_LEN: usize = 20 * 1024;

#[derive(Debug, Clone)]
struct Seen {
    path_and_query: String,
    headers: HeaderMap,
}

/// A real HTTP upstream on an ephemeral port. It answers with the body named
/// by the `x-test-body` request header, a large plain-text body for paths
/// ending in `/big`, or `ok`.
struct Upstream {
    url: String,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Upstream {
    async fn spawn() -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let app = Router::new().fallback(move |req: Request| {
            let recorder = recorder.clone();
            async move { respond(req, &recorder) }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            seen,
        }
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    fn paths(&self) -> Vec<String> {
        self.seen().into_iter().map(|s| s.path_and_query).collect()
    }
}

fn respond(req: Request, recorder: &Mutex<Vec<Seen>>) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_default();
    recorder.lock().unwrap().push(Seen {
        path_and_query,
        headers: req.headers().clone(),
    });

    if req.uri().path().ends_with("/big") {
        return (StatusCode::OK, "a".repeat(BIG_BODY_LEN)).into_response();
    }
    match req.headers().get(TEST_BODY_HEADER) {
        Some(body) => (StatusCode::OK, body.as_bytes().to_vec()).into_response(),
        None => (StatusCode::OK, "ok").into_response(),
    }
}

/// A URL nothing listens on.
async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn config_with_upstreams(url: &str) -> Config {
    Config {
        zebedee_url: url.to_string(),
        code_list_api_url: url.to_string(),
        dataset_api_url: url.to_string(),
        filter_api_url: url.to_string(),
        hierarchy_api_url: url.to_string(),
        search_api_url: url.to_string(),
        dimension_search_api_url: url.to_string(),
        image_api_url: url.to_string(),
        observation_api_url: url.to_string(),
        articles_api_url: url.to_string(),
        recipe_api_url: url.to_string(),
        import_api_url: url.to_string(),
        upload_service_api_url: url.to_string(),
        identity_api_url: url.to_string(),
        poc_api_url: url.to_string(),
        ..Config::default()
    }
}

struct Gateway {
    app: Router,
    audit_rx: mpsc::Receiver<Bytes>,
}

impl Gateway {
    fn new(config: &Config) -> Self {
        let client: Arc<dyn HttpClient> =
            Arc::new(HttpClientAdapter::new(Duration::from_secs(5)).unwrap());
        let (producer, audit_rx) = ChannelProducer::new(64);
        let table = MountTable::from_config(config).unwrap();
        let health = Arc::new(HealthChecker::new(
            health_targets(&table),
            client.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(30),
            Duration::from_secs(90),
        ));

        let app = build_router(
            config,
            Collaborators {
                http_client: client.clone(),
                identity: Arc::new(ZebedeeIdentityClient::new(&config.zebedee_url, client)),
                audit_producer: Arc::new(producer),
                health,
                clock: Arc::new(SystemClock),
            },
        )
        .unwrap();

        Self { app, audit_rx }
    }

    async fn send(&self, req: Request<Body>) -> Response {
        self.app.clone().oneshot(req).await.unwrap()
    }
}

fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder().uri(uri).header(header::HOST, "localhost")
}

async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn rfc3339(offset: ChronoDuration) -> String {
    (Utc::now() + offset).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_versioned_request_on_beta_host_with_allowed_origin() {
    let upstream = Upstream::spawn().await;
    let config = Config {
        enable_v1_beta_restriction: true,
        allowed_origins: vec!["http://localhost:8081".to_string()],
        ..config_with_upstreams(&upstream.url)
    };
    let gateway = Gateway::new(&config);

    let response = gateway
        .send(
            Request::builder()
                .uri("/v1/code-lists/12345")
                .header(header::HOST, "api.beta.example")
                .header(header::ORIGIN, "http://localhost:8081")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:8081"
    );
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"ok"));

    let seen = upstream.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path_and_query, "/code-lists/12345");
    assert!(seen[0].headers.contains_key("x-request-id"));
    assert_eq!(seen[0].headers["x-forwarded-host"], "api.beta.example");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_links_are_rewritten_to_api_domain() {
    let upstream = Upstream::spawn().await;
    let config = Config {
        environment_host: "https://beta.ons.gov.uk".to_string(),
        ..config_with_upstreams(&upstream.url)
    };
    let gateway = Gateway::new(&config);

    let response = gateway
        .send(
            get("/v1/datasets/12345")
                .header(
                    TEST_BODY_HEADER,
                    r#"{"links":{"self":{"href":"/datasets/12345"}}}"#,
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    let document: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        document,
        json!({"links": {"self": {"href": "https://api.beta.ons.gov.uk/datasets/12345"}}})
    );
    assert_eq!(upstream.paths(), vec!["/datasets/12345".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_downloads_are_rewritten_to_download_domain() {
    let upstream = Upstream::spawn().await;
    let config = Config {
        environment_host: "https://beta.ons.gov.uk".to_string(),
        ..config_with_upstreams(&upstream.url)
    };
    let gateway = Gateway::new(&config);

    let response = gateway
        .send(
            get("/v1/filter-outputs/abc")
                .header(
                    TEST_BODY_HEADER,
                    r#"{"downloads":{"csv":{"href":"http://internal:22000/myfile.csv"}}}"#,
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    let content_length = response.headers()[header::CONTENT_LENGTH].clone();
    let body = body_bytes(response).await;
    assert_eq!(content_length, body.len().to_string().as_str());
    let document: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        document,
        json!({"downloads": {"csv": {"href": "https://download.beta.ons.gov.uk/myfile.csv"}}})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deprecated_paths_follow_outage_windows() {
    let upstream = Upstream::spawn().await;
    let deprecations = json!([
        {
            "paths": ["/outage"],
            "date": rfc3339(ChronoDuration::days(-10)),
            "sunset": rfc3339(ChronoDuration::days(10)),
            "link": "https://example.com/migrate",
            "msg": "gone for good",
            "outages": [
                format!("1h@{}", rfc3339(ChronoDuration::hours(-3))),
                format!("2h@{}", rfc3339(ChronoDuration::hours(-1))),
                format!("1h@{}", rfc3339(ChronoDuration::hours(2))),
            ]
        },
        {
            "paths": ["/past"],
            "date": rfc3339(ChronoDuration::days(-10)),
            "sunset": rfc3339(ChronoDuration::days(10)),
            "link": "https://example.com/migrate",
            "msg": "moved",
            "outages": [format!("1h@{}", rfc3339(ChronoDuration::hours(-3)))]
        }
    ]);
    let config = Config {
        deprecation_config: deprecations.to_string(),
        ..config_with_upstreams(&upstream.url)
    };
    let gateway = Gateway::new(&config);

    let response = gateway
        .send(get("/outage").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    for name in ["deprecation", "link", "sunset"] {
        assert!(response.headers().contains_key(name), "missing {name}");
    }
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"gone for good"));

    let response = gateway.send(get("/past").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    for name in ["deprecation", "link", "sunset"] {
        assert!(response.headers().contains_key(name), "missing {name}");
    }
    assert!(
        response.headers()["deprecation"]
            .to_str()
            .unwrap()
            .starts_with('@')
    );

    assert_eq!(upstream.paths(), vec!["/past".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_non_beta_host_is_rejected_without_calling_upstream() {
    let upstream = Upstream::spawn().await;
    let config = Config {
        enable_v1_beta_restriction: true,
        ..config_with_upstreams(&upstream.url)
    };
    let gateway = Gateway::new(&config);

    let response = gateway
        .send(
            Request::builder()
                .uri("/v1/code-lists/12345")
                .header(header::HOST, "api.not.beta")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(upstream.seen().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_legacy_path_is_proxied_unchanged_to_poc() {
    let upstream = Upstream::spawn().await;
    let poc = Upstream::spawn().await;
    let config = Config {
        poc_api_url: poc.url.clone(),
        ..config_with_upstreams(&upstream.url)
    };
    let gateway = Gateway::new(&config);

    let response = gateway
        .send(get("/timeseries/foo?page=2").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(poc.paths(), vec!["/timeseries/foo?page=2".to_string()]);
    assert!(upstream.seen().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_versioned_search_wins_over_legacy_search() {
    let upstream = Upstream::spawn().await;
    let poc = Upstream::spawn().await;
    let config = Config {
        poc_api_url: poc.url.clone(),
        ..config_with_upstreams(&upstream.url)
    };
    let gateway = Gateway::new(&config);

    gateway
        .send(get("/v1/search?q=cpi").body(Body::empty()).unwrap())
        .await;
    gateway
        .send(get("/search?q=cpi").body(Body::empty()).unwrap())
        .await;

    assert_eq!(upstream.paths(), vec!["/search?q=cpi".to_string()]);
    assert_eq!(poc.paths(), vec!["/search?q=cpi".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_every_request_emits_pre_and_post_audit_events() {
    let upstream = Upstream::spawn().await;
    let config = config_with_upstreams(&upstream.url);
    let mut gateway = Gateway::new(&config);

    let response = gateway
        .send(
            get("/v1/hierarchies/h1?depth=2")
                .header("x-request-id", "req-42")
                .header("collection-id", "col-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let marshaller = AvroMarshaller;
    let pre = marshaller
        .unmarshal(&gateway.audit_rx.recv().await.unwrap())
        .unwrap();
    let post = marshaller
        .unmarshal(&gateway.audit_rx.recv().await.unwrap())
        .unwrap();

    assert_eq!(pre.status_code, 0);
    assert_eq!(post.status_code, 200);
    for event in [&pre, &post] {
        assert_eq!(event.request_id, "req-42");
        assert_eq!(event.collection_id, "col-7");
        assert_eq!(event.path, "/v1/hierarchies/h1");
        assert_eq!(event.query_param, "depth=2");
        assert_eq!(event.method, "GET");
        assert_eq!(event.identity, "");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_upstream_is_bad_gateway() {
    let upstream = Upstream::spawn().await;
    let config = Config {
        dataset_api_url: closed_url().await,
        ..config_with_upstreams(&upstream.url)
    };
    let mut gateway = Gateway::new(&config);

    let response = gateway
        .send(get("/v1/datasets/12345").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(body_bytes(response).await.is_empty());

    let marshaller = AvroMarshaller;
    gateway.audit_rx.recv().await.unwrap();
    let post = marshaller
        .unmarshal(&gateway.audit_rx.recv().await.unwrap())
        .unwrap();
    assert_eq!(post.status_code, 502);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_large_non_json_body_passes_through_untouched() {
    let upstream = Upstream::spawn().await;
    let config = Config {
        environment_host: "https://beta.ons.gov.uk".to_string(),
        ..config_with_upstreams(&upstream.url)
    };
    let gateway = Gateway::new(&config);

    let response = gateway
        .send(get("/v1/datasets/big").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    assert_eq!(body.len(), BIG_BODY_LEN);
    assert!(body.iter().all(|b| *b == b'a'));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_path_goes_to_default_upstream() {
    let upstream = Upstream::spawn().await;
    let zebedee = Upstream::spawn().await;
    let config = Config {
        zebedee_url: zebedee.url.clone(),
        ..config_with_upstreams(&upstream.url)
    };
    let gateway = Gateway::new(&config);

    let response = gateway
        .send(get("/v1/unknown/thing").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(zebedee.paths(), vec!["/v1/unknown/thing".to_string()]);
    assert!(upstream.seen().is_empty());
}

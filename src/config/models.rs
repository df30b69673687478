//! Configuration data structures for the API router.
//!
//! The gateway is configured from environment variables (optionally layered on
//! top of a YAML / JSON / TOML file). Every field name maps to the upper-case
//! environment variable of the same name, e.g. `bind_addr` ← `BIND_ADDR`.
//! All fields carry defaults so a bare environment yields a working local
//! setup. Once loaded and validated the value is frozen behind an `Arc` and
//! handed to the composition root; nothing mutates it afterwards.
use std::time::Duration;

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

/// Frozen gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Socket address to listen on (e.g. `0.0.0.0:23200`).
    pub bind_addr: String,
    /// Public API version segment (`v1`).
    pub version: String,
    /// Public `scheme://host` from which `api.` and `download.` domains derive.
    pub environment_host: String,
    /// JSON-LD context URL substituted into rewritten documents (empty = off).
    pub context_url: String,

    pub enable_private_endpoints: bool,
    pub enable_v1_beta_restriction: bool,
    pub enable_observation_api: bool,
    pub enable_articles_api: bool,

    /// Default upstream (CMS) and identity endpoint.
    pub zebedee_url: String,
    pub code_list_api_url: String,
    pub dataset_api_url: String,
    pub filter_api_url: String,
    pub hierarchy_api_url: String,
    pub search_api_url: String,
    pub dimension_search_api_url: String,
    pub image_api_url: String,
    pub observation_api_url: String,
    pub articles_api_url: String,
    pub recipe_api_url: String,
    pub import_api_url: String,
    pub upload_service_api_url: String,
    pub identity_api_url: String,
    /// Proof-of-concept upstream serving the legacy un-versioned paths.
    pub poc_api_url: String,
    pub identity_api_versions: Vec<String>,

    /// CORS allow list; `*` allows every origin.
    pub allowed_origins: Vec<String>,

    /// Drain window for in-flight requests, parsed by humantime (e.g. "5s").
    pub graceful_shutdown: String,
    pub health_check_interval: String,
    pub health_check_critical_timeout: String,
    /// Upper bound on a single upstream exchange before answering 502.
    pub upstream_timeout: String,

    pub brokers: Vec<String>,
    pub kafka_version: String,
    pub kafka_max_bytes: u64,
    pub audit_topic: String,
    /// Capacity of the bounded audit channel.
    pub audit_queue_size: usize,

    /// JSON deprecation document (empty = no deprecations).
    pub deprecation_config: String,

    pub log_level: String,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:23200".to_string(),
            version: "v1".to_string(),
            environment_host: "http://localhost:23200".to_string(),
            context_url: String::new(),
            enable_private_endpoints: false,
            enable_v1_beta_restriction: false,
            enable_observation_api: false,
            enable_articles_api: false,
            zebedee_url: "http://localhost:8082".to_string(),
            code_list_api_url: "http://localhost:22400".to_string(),
            dataset_api_url: "http://localhost:22000".to_string(),
            filter_api_url: "http://localhost:22100".to_string(),
            hierarchy_api_url: "http://localhost:22600".to_string(),
            search_api_url: "http://localhost:23900".to_string(),
            dimension_search_api_url: "http://localhost:23100".to_string(),
            image_api_url: "http://localhost:24700".to_string(),
            observation_api_url: "http://localhost:24500".to_string(),
            articles_api_url: "http://localhost:27000".to_string(),
            recipe_api_url: "http://localhost:22300".to_string(),
            import_api_url: "http://localhost:21800".to_string(),
            upload_service_api_url: "http://localhost:25100".to_string(),
            identity_api_url: "http://localhost:25600".to_string(),
            poc_api_url: "http://localhost:3000".to_string(),
            identity_api_versions: vec!["v1".to_string()],
            allowed_origins: vec!["http://localhost:20000".to_string()],
            graceful_shutdown: "5s".to_string(),
            health_check_interval: "30s".to_string(),
            health_check_critical_timeout: "90s".to_string(),
            upstream_timeout: "30s".to_string(),
            brokers: vec!["localhost:9092".to_string()],
            kafka_version: "1.0.2".to_string(),
            kafka_max_bytes: 2_000_000,
            audit_topic: "audit".to_string(),
            audit_queue_size: 100,
            deprecation_config: String::new(),
            log_level: "info".to_string(),
            log_json: true,
        }
    }
}

impl Config {
    pub fn graceful_shutdown_timeout(&self) -> Result<Duration> {
        parse_duration("graceful_shutdown", &self.graceful_shutdown)
    }

    pub fn health_check_interval(&self) -> Result<Duration> {
        parse_duration("health_check_interval", &self.health_check_interval)
    }

    pub fn health_check_critical_timeout(&self) -> Result<Duration> {
        parse_duration(
            "health_check_critical_timeout",
            &self.health_check_critical_timeout,
        )
    }

    pub fn upstream_timeout(&self) -> Result<Duration> {
        parse_duration("upstream_timeout", &self.upstream_timeout)
    }

    /// True when the allow list contains the `*` wildcard.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .wrap_err_with(|| format!("Invalid duration for {field}: '{value}'"))
}

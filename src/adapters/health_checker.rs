use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::sleep;

use crate::{core::clock::Clock, ports::http_client::HttpClient};

/// Upper bound for a single probe; shorter intervals shorten it further.
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Aggregate health of the gateway's upstreams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn http_status(self) -> StatusCode {
        match self {
            HealthStatus::Ok => StatusCode::OK,
            HealthStatus::Warning => StatusCode::TOO_MANY_REQUESTS,
            HealthStatus::Critical => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// State of one upstream probe.
#[derive(Debug, Clone, Serialize)]
pub struct CheckState {
    pub name: String,
    pub url: String,
    pub status: HealthStatus,
    pub message: String,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub start_time: DateTime<Utc>,
    pub checks: Vec<CheckState>,
}

impl HealthSnapshot {
    fn aggregate(start_time: DateTime<Utc>, checks: Vec<CheckState>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Ok);
        Self {
            status,
            start_time,
            checks,
        }
    }
}

/// Periodically probes every upstream and publishes the aggregate.
///
/// A failing check is WARNING until it has been failing for longer than the
/// critical timeout, then CRITICAL.
pub struct HealthChecker {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    critical_timeout: Duration,
    snapshot: ArcSwap<HealthSnapshot>,
}

impl HealthChecker {
    /// `upstreams` is a list of `(name, base_url)`; duplicate URLs are probed
    /// once.
    pub fn new(
        upstreams: Vec<(String, String)>,
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        critical_timeout: Duration,
    ) -> Self {
        let start_time = clock.now();
        let mut checks: Vec<CheckState> = Vec::with_capacity(upstreams.len());
        for (name, url) in upstreams {
            let url = format!("{}/health", url.trim_end_matches('/'));
            if checks.iter().any(|c| c.url == url) {
                continue;
            }
            checks.push(CheckState {
                name,
                url,
                status: HealthStatus::Ok,
                message: "not checked yet".to_string(),
                last_checked: None,
                last_success: None,
                last_failure: None,
            });
        }

        Self {
            http_client,
            clock,
            interval,
            critical_timeout,
            snapshot: ArcSwap::from_pointee(HealthSnapshot::aggregate(start_time, checks)),
        }
    }

    pub fn snapshot(&self) -> Arc<HealthSnapshot> {
        self.snapshot.load_full()
    }

    /// Run the health checker loop. Checks run immediately, then every
    /// interval, until the task is dropped.
    pub async fn run(&self) {
        tracing::info!(
            "Starting health checker with interval: {:?}, critical timeout: {:?}, {} upstreams",
            self.interval,
            self.critical_timeout,
            self.snapshot().checks.len()
        );
        loop {
            self.check_all().await;
            sleep(self.interval).await;
        }
    }

    /// Probe every upstream once and publish a new snapshot.
    pub async fn check_all(&self) {
        let previous = self.snapshot();
        let probe_timeout = self.interval.min(MAX_PROBE_TIMEOUT);
        let mut checks = Vec::with_capacity(previous.checks.len());

        for check in &previous.checks {
            let outcome = self
                .http_client
                .health_check(&check.url, probe_timeout)
                .await
                .map_err(|e| e.to_string());
            let now = self.clock.now();
            let next = self.next_state(check, previous.start_time, outcome, now);
            if next.status != check.status {
                tracing::warn!(
                    "Upstream {} ({}) is now {:?}: {}",
                    next.name,
                    next.url,
                    next.status,
                    next.message
                );
            }
            checks.push(next);
        }

        let snapshot = HealthSnapshot::aggregate(previous.start_time, checks);
        tracing::debug!("Health check cycle completed: {:?}", snapshot.status);
        self.snapshot.store(Arc::new(snapshot));
    }

    fn next_state(
        &self,
        check: &CheckState,
        start_time: DateTime<Utc>,
        outcome: Result<bool, String>,
        now: DateTime<Utc>,
    ) -> CheckState {
        let mut next = CheckState {
            last_checked: Some(now),
            ..check.clone()
        };
        match outcome {
            Ok(_) => {
                next.status = HealthStatus::Ok;
                next.message = "ok".to_string();
                next.last_success = Some(now);
            }
            Err(reason) => {
                let failing_since = check.last_success.unwrap_or(start_time);
                let critical = (now - failing_since)
                    .to_std()
                    .is_ok_and(|elapsed| elapsed > self.critical_timeout);
                next.status = if critical {
                    HealthStatus::Critical
                } else {
                    HealthStatus::Warning
                };
                next.message = reason;
                next.last_failure = Some(now);
            }
        }
        next
    }

    /// JSON health document with the aggregate status mapped to HTTP.
    pub fn handle(&self) -> Response {
        let snapshot = self.snapshot();
        (snapshot.status.http_status(), Json(snapshot.as_ref().clone())).into_response()
    }
}

//! Deprecation and outage handling for retired API paths.
//!
//! The engine is built once from a JSON document of the form
//!
//! ```json
//! [{"paths": ["/datasets/{id}"], "date": "2024-01-01", "sunset": "2024-06-01",
//!   "outages": ["2h@2024-03-01T10:00:00Z", "2024-06-01"],
//!   "link": "https://example.com/migration", "msg": "gone"}]
//! ```
//!
//! Every matched request is tagged with `Deprecation`, `Link` and `Sunset`
//! headers. While an outage window is open the request is answered with `404`
//! and the configured message instead of being forwarded.
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use thiserror::Error;

use crate::core::clock::Clock;

pub const DEPRECATION_HEADER: &str = "deprecation";
pub const SUNSET_HEADER: &str = "sunset";

const RFC1123_GMT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Errors raised while loading a deprecation document.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DeprecationError {
    #[error("invalid deprecation document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    #[error("deprecation entry {index} has no paths")]
    NoPaths { index: usize },

    #[error("deprecation entry {index} is missing a date")]
    MissingDate { index: usize },

    #[error("unable to parse time '{value}' (expected RFC3339, YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)")]
    InvalidTime { value: String },

    #[error("unable to parse outage duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("deprecation date {date} is after sunset {sunset}")]
    DateAfterSunset { date: String, sunset: String },

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid header value for {field}: '{value}'")]
    InvalidHeaderValue { field: &'static str, value: String },
}

#[derive(Debug, Deserialize)]
struct DeprecationEntry {
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    date: String,
    #[serde(default)]
    sunset: String,
    #[serde(default)]
    outages: Vec<String>,
    #[serde(default)]
    link: String,
    #[serde(default)]
    msg: String,
}

/// Half-open interval `[start, end)`; no end means open-ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outage {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl Outage {
    /// Parse `"[duration@]time"`.
    pub fn parse(value: &str) -> Result<Self, DeprecationError> {
        match value.split_once('@') {
            Some((duration, time)) => {
                let start = parse_time(time)?;
                let length = humantime::parse_duration(duration.trim()).map_err(|e| {
                    DeprecationError::InvalidDuration {
                        value: duration.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                let length = chrono::Duration::from_std(length).map_err(|e| {
                    DeprecationError::InvalidDuration {
                        value: duration.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                let end = start.checked_add_signed(length).ok_or_else(|| {
                    DeprecationError::InvalidDuration {
                        value: duration.to_string(),
                        reason: "outage ends beyond the supported date range".to_string(),
                    }
                })?;
                Ok(Self {
                    start,
                    end: Some(end),
                })
            }
            None => Ok(Self {
                start: parse_time(value)?,
                end: None,
            }),
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && self.end.is_none_or(|end| end > now)
    }
}

/// One validated deprecation entry.
#[derive(Debug, Clone)]
pub struct Deprecation {
    pub paths: Vec<String>,
    pub date: DateTime<Utc>,
    pub sunset: Option<DateTime<Utc>>,
    pub link: Option<String>,
    pub message: String,
    outages: Vec<Outage>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Deprecation {
    fn from_entry(index: usize, entry: DeprecationEntry) -> Result<Self, DeprecationError> {
        if entry.paths.is_empty() {
            return Err(DeprecationError::NoPaths { index });
        }
        if entry.date.trim().is_empty() {
            return Err(DeprecationError::MissingDate { index });
        }

        let date = parse_time(&entry.date)?;
        let sunset = match entry.sunset.trim() {
            "" => None,
            value => Some(parse_time(value)?),
        };
        if let Some(sunset) = sunset {
            if date > sunset {
                return Err(DeprecationError::DateAfterSunset {
                    date: entry.date,
                    sunset: entry.sunset,
                });
            }
        }

        let mut outages = entry
            .outages
            .iter()
            .map(|o| Outage::parse(o))
            .collect::<Result<Vec<_>, _>>()?;
        outages.sort_by_key(|o| o.start);

        let link = Some(entry.link).filter(|l| !l.is_empty());

        let mut headers = vec![(
            HeaderName::from_static(DEPRECATION_HEADER),
            header_value("date", format!("@{}", date.timestamp()))?,
        )];
        if let Some(link) = &link {
            headers.push((
                http::header::LINK,
                header_value("link", format!("<{link}>; rel=\"sunset\""))?,
            ));
        }
        if let Some(sunset) = sunset {
            headers.push((
                HeaderName::from_static(SUNSET_HEADER),
                header_value("sunset", sunset.format(RFC1123_GMT).to_string())?,
            ));
        }

        Ok(Self {
            paths: entry.paths,
            date,
            sunset,
            link,
            message: entry.msg,
            outages,
            headers,
        })
    }

    /// `Deprecation` header value: `@` followed by the unix seconds of `date`.
    pub fn date_unix(&self) -> String {
        format!("@{}", self.date.timestamp())
    }

    /// Outages sorted ascending by start.
    pub fn outages(&self) -> &[Outage] {
        &self.outages
    }

    /// Whether an outage window is open at `now`.
    ///
    /// Outages are sorted by start, so the walk stops at the first outage
    /// that has not started yet.
    pub fn outage_active(&self, now: DateTime<Utc>) -> bool {
        self.outages
            .iter()
            .take_while(|outage| outage.start <= now)
            .any(|outage| outage.is_active(now))
    }

    /// Insert the deprecation headers into `headers`.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }
}

/// Outcome for a request on a deprecated path.
#[derive(Debug)]
pub enum Decision<'a> {
    /// Forward the request; the headers of the entry still apply.
    Proceed(&'a Deprecation),
    /// Answer 404 with the entry's message.
    Outage(&'a Deprecation),
}

/// Lookup structure for all deprecated paths.
pub struct DeprecationEngine {
    entries: Vec<Deprecation>,
    router: matchit::Router<usize>,
    clock: Arc<dyn Clock>,
}

impl DeprecationEngine {
    pub fn empty(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Vec::new(),
            router: matchit::Router::new(),
            clock,
        }
    }

    /// Build the engine from a JSON document. An empty or blank document
    /// yields an engine without entries.
    pub fn from_json(document: &str, clock: Arc<dyn Clock>) -> Result<Self, DeprecationError> {
        if document.trim().is_empty() {
            return Ok(Self::empty(clock));
        }

        let raw: Vec<DeprecationEntry> = serde_json::from_str(document)?;
        let mut entries = Vec::with_capacity(raw.len());
        let mut router = matchit::Router::new();

        for (index, entry) in raw.into_iter().enumerate() {
            let deprecation = Deprecation::from_entry(index, entry)?;
            for path in &deprecation.paths {
                validate_path(path)?;
                router
                    .insert(path.clone(), index)
                    .map_err(|e| DeprecationError::InvalidPath {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
            }
            entries.push(deprecation);
        }

        tracing::info!("Loaded {} deprecation entries", entries.len());
        Ok(Self {
            entries,
            router,
            clock,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Deprecation] {
        &self.entries
    }

    pub fn lookup(&self, path: &str) -> Option<&Deprecation> {
        self.router
            .at(path)
            .ok()
            .and_then(|matched| self.entries.get(*matched.value))
    }

    /// Decide how to treat `path` at the current clock time. `None` means the
    /// path is not deprecated.
    pub fn decide(&self, path: &str) -> Option<Decision<'_>> {
        let deprecation = self.lookup(path)?;
        if deprecation.outage_active(self.clock.now()) {
            Some(Decision::Outage(deprecation))
        } else {
            Some(Decision::Proceed(deprecation))
        }
    }
}

fn header_value(field: &'static str, value: String) -> Result<HeaderValue, DeprecationError> {
    HeaderValue::from_str(&value)
        .map_err(|_| DeprecationError::InvalidHeaderValue { field, value })
}

/// Parse RFC3339, date-only or date-time (UTC); the first format that
/// matches wins.
pub fn parse_time(value: &str) -> Result<DateTime<Utc>, DeprecationError> {
    let value = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    if let Ok(time) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(time.and_utc());
    }
    Err(DeprecationError::InvalidTime {
        value: value.to_string(),
    })
}

/// Check a path against the routing grammar: absolute, no whitespace,
/// `{name}` parameters and an optional trailing `{*name}` catch-all.
pub fn validate_path(path: &str) -> Result<(), DeprecationError> {
    let invalid = |reason: &str| DeprecationError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if path.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }

    let segments: Vec<&str> = path[1..].split('/').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        let opens = segment.matches('{').count();
        let closes = segment.matches('}').count();
        if opens == 0 && closes == 0 {
            continue;
        }
        if opens != 1
            || closes != 1
            || !segment.starts_with('{')
            || !segment.ends_with('}')
        {
            return Err(invalid("parameters must span a whole segment as {name}"));
        }
        let name = &segment[1..segment.len() - 1];
        let (name, catch_all) = match name.strip_prefix('*') {
            Some(rest) => (rest, true),
            None => (name, false),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("parameter names must be alphanumeric"));
        }
        if catch_all && i != last {
            return Err(invalid("catch-all parameter must be the last segment"));
        }
    }
    Ok(())
}

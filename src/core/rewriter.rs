//! JSON link rewriting.
//!
//! Upstream services describe their resources with absolute URLs built from
//! their own (internal) addresses. Before a JSON document leaves the gateway
//! every `href` found under a `links` or `downloads` object, or inside a
//! `dimensions` array, is re-rooted on the public environment domain:
//!
//! * `links.*.href` and `dimensions[].href` → `scheme://api.<host><path>`
//! * `downloads.*.href` → `scheme://download.<host><path>`
//!
//! Only the path of the original href survives; scheme, host, query and
//! fragment are replaced or dropped. Rewriting is therefore idempotent.
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use url::{ParseError, Url};

static HOST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+://)(.+)$").expect("host pattern is a valid regex"));

// Relative hrefs are resolved against this base; only the path is kept.
static RELATIVE_BASE: Lazy<Url> =
    Lazy::new(|| Url::parse("http://localhost/").expect("relative base is a valid URL"));

/// Errors raised while rewriting a response document.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RewriteError {
    #[error("response body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unable to parse href '{href}': {source}")]
    InvalidHref {
        href: String,
        #[source]
        source: ParseError,
    },
}

/// Derive the `api.` domain from an environment host (`https://beta.example`
/// becomes `https://api.beta.example`). Hosts without a scheme are returned
/// unchanged.
pub fn api_domain(environment_host: &str) -> String {
    HOST_PATTERN
        .replace(environment_host, "${1}api.${2}")
        .into_owned()
}

/// Derive the `download.` domain from an environment host.
pub fn download_domain(environment_host: &str) -> String {
    HOST_PATTERN
        .replace(environment_host, "${1}download.${2}")
        .into_owned()
}

/// Re-root a single href on `domain`, keeping only its path.
pub fn rewrite_href(href: &str, domain: &str) -> Result<String, RewriteError> {
    if href.is_empty() {
        return Ok(domain.to_string());
    }

    let parsed = match Url::parse(href) {
        Ok(url) => url,
        Err(ParseError::RelativeUrlWithoutBase) => {
            RELATIVE_BASE
                .join(href)
                .map_err(|source| RewriteError::InvalidHref {
                    href: href.to_string(),
                    source,
                })?
        }
        Err(source) => {
            return Err(RewriteError::InvalidHref {
                href: href.to_string(),
                source,
            });
        }
    };

    Ok(format!("{domain}{}", parsed.path()))
}

/// Rewrites JSON documents for one environment host.
#[derive(Debug, Clone)]
pub struct UrlRewriter {
    api_domain: String,
    download_domain: String,
    context_url: Option<String>,
}

impl UrlRewriter {
    pub fn new(environment_host: &str, context_url: Option<String>) -> Self {
        Self {
            api_domain: api_domain(environment_host),
            download_domain: download_domain(environment_host),
            context_url: context_url.filter(|url| !url.is_empty()),
        }
    }

    pub fn api_domain(&self) -> &str {
        &self.api_domain
    }

    pub fn download_domain(&self) -> &str {
        &self.download_domain
    }

    /// Parse, rewrite and re-serialise a complete JSON body.
    pub fn rewrite(&self, body: &[u8]) -> Result<Vec<u8>, RewriteError> {
        let mut document: Value = serde_json::from_slice(body)?;
        self.rewrite_document(&mut document)?;
        Ok(serde_json::to_vec(&document)?)
    }

    /// Rewrite an already parsed document in place.
    pub fn rewrite_document(&self, document: &mut Value) -> Result<(), RewriteError> {
        if let (Some(context_url), Value::Object(root)) = (&self.context_url, &mut *document) {
            if let Some(Value::String(context)) = root.get_mut("@context") {
                *context = context_url.clone();
            }
        }
        self.walk(document)
    }

    fn walk(&self, node: &mut Value) -> Result<(), RewriteError> {
        match node {
            Value::Object(map) => {
                if let Some(Value::Object(links)) = map.get_mut("links") {
                    for link in links.values_mut() {
                        rewrite_child_href(link, &self.api_domain)?;
                    }
                }
                if let Some(Value::Object(downloads)) = map.get_mut("downloads") {
                    for download in downloads.values_mut() {
                        rewrite_child_href(download, &self.download_domain)?;
                    }
                }
                if let Some(Value::Array(dimensions)) = map.get_mut("dimensions") {
                    for dimension in dimensions.iter_mut() {
                        rewrite_child_href(dimension, &self.api_domain)?;
                    }
                }
                for child in map.values_mut() {
                    if child.is_object() || child.is_array() {
                        self.walk(child)?;
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.walk(item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn rewrite_child_href(child: &mut Value, domain: &str) -> Result<(), RewriteError> {
    if let Some(Value::String(href)) = child.as_object_mut().and_then(|o| o.get_mut("href")) {
        *href = rewrite_href(href, domain)?;
    }
    Ok(())
}

//! Path based upstream selection.
//!
//! The [`MountTable`] is built once from [`Config`] and never mutated. Each
//! request path resolves to exactly one [`Route`]: exact mounts are checked
//! first, then pattern mounts, then the longest matching prefix; anything
//! left over goes to the default upstream. The table is generic over the
//! upstream payload so the core plan (`MountTable<ProxyTarget>`) can be turned
//! into a table of live proxies by the adapters with [`MountTable::map`].
use regex::Regex;
use thiserror::Error;

use crate::config::Config;

/// Versioned public APIs always mounted.
const VERSIONED_APIS: [&str; 8] = [
    "code-lists",
    "datasets",
    "filters",
    "filter-outputs",
    "hierarchies",
    "search",
    "dimension-search",
    "images",
];

/// Legacy un-versioned paths served by the proof-of-concept upstream.
const LEGACY_PATHS: [&str; 4] = ["/ops", "/dataset", "/timeseries", "/search"];

const IDENTITY_APIS: [&str; 4] = ["tokens", "users", "groups", "password-reset"];

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RoutingError {
    #[error("invalid mount pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Everything the reverse proxy needs to know about one upstream mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    /// Mount name used in logs (e.g. `code-lists`).
    pub name: String,
    pub target_url: String,
    /// Version segment stripped from the head of the path before forwarding.
    pub version: Option<String>,
    /// Public host used to rewrite JSON responses; `None` disables rewriting.
    pub environment_host: Option<String>,
    pub context_url: Option<String>,
    pub beta_restricted: bool,
}

impl ProxyTarget {
    /// Path sent upstream: the request path with a leading `/<version>`
    /// segment removed once.
    pub fn outbound_path<'a>(&self, path: &'a str) -> &'a str {
        let Some(version) = &self.version else {
            return path;
        };
        let Some(rest) = path
            .strip_prefix('/')
            .and_then(|p| p.strip_prefix(version.as_str()))
        else {
            return path;
        };
        if rest.is_empty() {
            "/"
        } else if rest.starts_with('/') {
            rest
        } else {
            path
        }
    }
}

#[derive(Debug, Clone)]
pub enum PathMatcher {
    Exact(String),
    Prefix(String),
    Pattern(Regex),
}

impl PathMatcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathMatcher::Exact(p) => path == p,
            PathMatcher::Prefix(p) => path.starts_with(p.as_str()),
            PathMatcher::Pattern(re) => re.is_match(path),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Route<T> {
    Health,
    Upstream(T),
}

#[derive(Debug, Clone)]
pub struct Mount<T> {
    pub matcher: PathMatcher,
    pub route: Route<T>,
}

#[derive(Debug, Clone)]
pub struct MountTable<T> {
    mounts: Vec<Mount<T>>,
    default: T,
}

impl<T> MountTable<T> {
    pub fn new(default: T) -> Self {
        Self {
            mounts: Vec::new(),
            default,
        }
    }

    pub fn mount(&mut self, matcher: PathMatcher, route: Route<T>) {
        self.mounts.push(Mount { matcher, route });
    }

    pub fn mounts(&self) -> &[Mount<T>] {
        &self.mounts
    }

    pub fn default_upstream(&self) -> &T {
        &self.default
    }

    /// Resolve a request path to exactly one route.
    pub fn resolve(&self, path: &str) -> Resolved<'_, T> {
        let exact = self
            .mounts
            .iter()
            .find(|m| matches!(m.matcher, PathMatcher::Exact(_)) && m.matcher.matches(path));
        let pattern = || {
            self.mounts
                .iter()
                .find(|m| matches!(m.matcher, PathMatcher::Pattern(_)) && m.matcher.matches(path))
        };
        let prefix = || {
            self.mounts
                .iter()
                .filter_map(|m| match &m.matcher {
                    PathMatcher::Prefix(p) if path.starts_with(p.as_str()) => Some((p.len(), m)),
                    _ => None,
                })
                .max_by_key(|(len, _)| *len)
                .map(|(_, m)| m)
        };

        match exact.or_else(pattern).or_else(prefix) {
            Some(Mount {
                route: Route::Health,
                ..
            }) => Resolved::Health,
            Some(Mount {
                route: Route::Upstream(upstream),
                ..
            }) => Resolved::Upstream(upstream),
            None => Resolved::Upstream(&self.default),
        }
    }

    /// Transform every upstream payload, keeping the mount structure.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> MountTable<U> {
        let mounts = self
            .mounts
            .into_iter()
            .map(|m| Mount {
                matcher: m.matcher,
                route: match m.route {
                    Route::Health => Route::Health,
                    Route::Upstream(t) => Route::Upstream(f(t)),
                },
            })
            .collect();
        MountTable {
            mounts,
            default: f(self.default),
        }
    }

    /// Fallible [`MountTable::map`]; stops at the first error.
    pub fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<MountTable<U>, E> {
        let mut mounts = Vec::with_capacity(self.mounts.len());
        for m in self.mounts {
            let route = match m.route {
                Route::Health => Route::Health,
                Route::Upstream(t) => Route::Upstream(f(t)?),
            };
            mounts.push(Mount {
                matcher: m.matcher,
                route,
            });
        }
        Ok(MountTable {
            mounts,
            default: f(self.default)?,
        })
    }
}

/// Result of [`MountTable::resolve`].
#[derive(Debug)]
pub enum Resolved<'a, T> {
    Health,
    Upstream(&'a T),
}

impl MountTable<ProxyTarget> {
    /// Build the gateway's mount plan from configuration.
    pub fn from_config(config: &Config) -> Result<Self, RoutingError> {
        let version = config.version.as_str();
        let context_url = Some(config.context_url.clone()).filter(|c| !c.is_empty());

        let versioned = |name: &str, url: &str, strip: &str| ProxyTarget {
            name: name.to_string(),
            target_url: url.to_string(),
            version: Some(strip.to_string()),
            environment_host: Some(config.environment_host.clone()),
            context_url: context_url.clone(),
            beta_restricted: config.enable_v1_beta_restriction,
        };
        let unversioned = |name: &str, url: &str| ProxyTarget {
            name: name.to_string(),
            target_url: url.to_string(),
            version: None,
            environment_host: None,
            context_url: None,
            beta_restricted: false,
        };

        let mut table = MountTable::new(unversioned("zebedee", &config.zebedee_url));

        table.mount(PathMatcher::Exact("/health".to_string()), Route::Health);
        table.mount(
            PathMatcher::Exact(format!("/{version}/health")),
            Route::Health,
        );

        for api in VERSIONED_APIS {
            let url = match api {
                "code-lists" => &config.code_list_api_url,
                "datasets" => &config.dataset_api_url,
                "filters" | "filter-outputs" => &config.filter_api_url,
                "hierarchies" => &config.hierarchy_api_url,
                "search" => &config.search_api_url,
                "dimension-search" => &config.dimension_search_api_url,
                _ => &config.image_api_url,
            };
            table.mount(
                PathMatcher::Prefix(format!("/{version}/{api}")),
                Route::Upstream(versioned(api, url, version)),
            );
        }

        if config.enable_articles_api {
            table.mount(
                PathMatcher::Prefix(format!("/{version}/articles")),
                Route::Upstream(versioned("articles", &config.articles_api_url, version)),
            );
        }

        if config.enable_observation_api {
            let pattern = format!(
                "^/{}/datasets/[^/]+/editions/[^/]+/versions/[^/]+/observations",
                regex::escape(version)
            );
            let regex = Regex::new(&pattern).map_err(|source| RoutingError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            table.mount(
                PathMatcher::Pattern(regex),
                Route::Upstream(versioned(
                    "observations",
                    &config.observation_api_url,
                    version,
                )),
            );
        }

        if config.enable_private_endpoints {
            let private = [
                ("recipes", &config.recipe_api_url),
                ("jobs", &config.import_api_url),
                ("upload", &config.upload_service_api_url),
                ("instances", &config.dataset_api_url),
            ];
            for (api, url) in private {
                table.mount(
                    PathMatcher::Prefix(format!("/{version}/{api}")),
                    Route::Upstream(versioned(api, url, version)),
                );
            }

            for identity_version in &config.identity_api_versions {
                for api in IDENTITY_APIS {
                    table.mount(
                        PathMatcher::Prefix(format!("/{identity_version}/{api}")),
                        Route::Upstream(versioned(
                            api,
                            &config.identity_api_url,
                            identity_version,
                        )),
                    );
                }
            }
        }

        for path in LEGACY_PATHS {
            table.mount(
                PathMatcher::Prefix(path.to_string()),
                Route::Upstream(unversioned("legacy", &config.poc_api_url)),
            );
        }

        Ok(table)
    }
}

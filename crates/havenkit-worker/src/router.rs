//! Request classification.

use havenkit_net::Request;
use http::Method;
use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

/// How an intercepted request is handled. Derived per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Same-origin GET whose freshness matters: network first.
    Critical,
    /// Any other same-origin GET: stale-while-revalidate.
    Ordinary,
    /// GET to another origin: not intercepted.
    CrossOrigin,
    /// Anything but GET: not intercepted.
    NonGet,
}

impl RequestClass {
    /// Whether the controller answers this request itself.
    pub fn is_intercepted(&self) -> bool {
        matches!(self, RequestClass::Critical | RequestClass::Ordinary)
    }
}

/// Pattern over a URL path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathPattern {
    /// Path equals the pattern.
    Exact(String),
    /// Path starts with the pattern.
    Prefix(String),
    /// Path ends with the pattern (e.g. a document name).
    Suffix(String),
}

impl PathPattern {
    pub fn exact(path: &str) -> Self {
        Self::Exact(path.to_string())
    }

    pub fn prefix(prefix: &str) -> Self {
        Self::Prefix(prefix.to_string())
    }

    pub fn suffix(suffix: &str) -> Self {
        Self::Suffix(suffix.to_string())
    }

    /// Check if a path matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => path == p,
            PathPattern::Prefix(p) => path.starts_with(p.as_str()),
            PathPattern::Suffix(p) => path.ends_with(p.as_str()),
        }
    }
}

/// The deployment's set of critical paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CriticalPaths(Vec<PathPattern>);

impl CriticalPaths {
    pub fn new(patterns: Vec<PathPattern>) -> Self {
        Self(patterns)
    }

    /// No critical paths: every same-origin GET is ordinary.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// Add a pattern.
    pub fn with(mut self, pattern: PathPattern) -> Self {
        self.0.push(pattern);
        self
    }

    pub fn patterns(&self) -> &[PathPattern] {
        &self.0
    }

    pub fn matches(&self, path: &str) -> bool {
        self.0.iter().any(|p| p.matches(path))
    }
}

impl Default for CriticalPaths {
    /// Site root, primary document, primary stylesheet and the photo listing.
    fn default() -> Self {
        Self(vec![
            PathPattern::exact("/"),
            PathPattern::suffix("index.html"),
            PathPattern::suffix("styles.css"),
            PathPattern::suffix("fotos.html"),
        ])
    }
}

/// Classify a request against the worker's origin and critical paths.
pub fn classify(request: &Request, origin: &Url, critical: &CriticalPaths) -> RequestClass {
    let class = if request.method != Method::GET {
        RequestClass::NonGet
    } else if !request.is_same_origin(origin) {
        RequestClass::CrossOrigin
    } else if critical.matches(request.url.path()) {
        RequestClass::Critical
    } else {
        RequestClass::Ordinary
    };

    trace!(url = %request.url, method = %request.method, ?class, "Classified request");
    class
}

//! The precache manifest.

use hashbrown::HashSet;
use havenkit_cache::cache_key;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::WorkerError;

/// Ordered list of same-origin paths populated into a fresh generation at
/// install time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetManifest(Vec<String>);

impl AssetManifest {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    pub fn paths(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a path unless it is already listed.
    pub fn push(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.0.contains(&path) {
            self.0.push(path);
        }
    }

    /// Resolve every entry against `origin`, in order, dropping entries that
    /// resolve to an already listed URL.
    pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>, WorkerError> {
        let mut seen = HashSet::new();
        let mut urls = Vec::with_capacity(self.0.len());

        for path in &self.0 {
            let url = resolve_same_origin(origin, path)?;
            if seen.insert(cache_key(&url)) {
                urls.push(url);
            }
        }

        Ok(urls)
    }
}

/// Join `path` onto `origin`, rejecting anything that lands on another origin.
pub(crate) fn resolve_same_origin(origin: &Url, path: &str) -> Result<Url, WorkerError> {
    let url = origin
        .join(path)
        .map_err(|e| WorkerError::Config(format!("manifest entry '{path}': {e}")))?;
    if url.origin() != origin.origin() {
        return Err(WorkerError::Config(format!(
            "manifest entry '{path}' is not same-origin with {origin}"
        )));
    }
    Ok(url)
}

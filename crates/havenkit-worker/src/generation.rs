//! Cache generation ids.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Names exactly one cache store. Bumped by the deploying party on every
/// release; exactly one generation is current at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheGeneration(String);

impl CacheGeneration {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Numeric release from a `name-vN` id.
    pub fn version(&self) -> Option<u64> {
        self.split().map(|(_, version)| version)
    }

    /// The id for the next release: `name-vN` becomes `name-v(N+1)`, any
    /// other id gets `-v1` appended.
    pub fn next(&self) -> Self {
        match self.split() {
            Some((base, version)) => Self(format!("{base}-v{}", version + 1)),
            None => Self(format!("{}-v1", self.0)),
        }
    }

    fn split(&self) -> Option<(&str, u64)> {
        let (base, version) = self.0.rsplit_once("-v")?;
        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        version.parse().ok().map(|v| (base, v))
    }
}

impl fmt::Display for CacheGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheGeneration {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl PartialEq<str> for CacheGeneration {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

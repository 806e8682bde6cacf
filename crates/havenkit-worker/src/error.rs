//! Worker error taxonomy.

use havenkit_cache::CacheError;
use havenkit_common::HavenError;
use havenkit_net::NetError;
use thiserror::Error;

/// Errors surfaced by the offline cache controller.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A manifest entry could not be precached; the install failed as a whole.
    #[error("Precache of {url} failed: {reason}")]
    AssetFetchFailure { url: String, reason: String },

    /// The live fetch (and any last-resort fetch) failed with nothing to fall back to.
    #[error("Network unavailable for {url}: {source}")]
    NetworkUnavailable {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(String),
}

impl WorkerError {
    pub(crate) fn network(url: &url::Url, source: NetError) -> Self {
        Self::NetworkUnavailable {
            url: url.to_string(),
            source,
        }
    }
}

impl From<WorkerError> for HavenError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::NetworkUnavailable { source, .. } => source.into(),
            WorkerError::Cache(e) => e.into(),
            WorkerError::Config(msg) => HavenError::config(msg),
            other => HavenError::lifecycle(other.to_string()),
        }
    }
}

//! Install and activate procedures.

use std::sync::Arc;

use futures::future::try_join_all;
use havenkit_cache::{Cache, CacheStorage};
use havenkit_common::{retry_with_backoff, RetryConfig};
use havenkit_net::{FetchOptions, Fetcher, Request, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::{AssetManifest, CacheGeneration, WorkerError};

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, nothing done yet.
    #[default]
    Parsed,
    /// Precaching the manifest.
    Installing,
    /// Precache complete; activation requested.
    Installed,
    /// Sweeping stale generations.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Precache failed; the previous generation stays in charge.
    InstallFailed,
    /// Replaced by a newer worker.
    Redundant,
}

impl WorkerState {
    /// Whether fetch events are intercepted in this state.
    pub fn intercepts_fetch(&self) -> bool {
        *self == WorkerState::Activated
    }

    /// Whether `install` may run from this state.
    pub fn can_install(&self) -> bool {
        matches!(
            self,
            WorkerState::Parsed | WorkerState::InstallFailed | WorkerState::Installed
        )
    }
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: CacheGeneration,
    /// Cache keys written, in manifest order.
    pub cached: Vec<String>,
}

/// Outcome of an activation. Sweep failures are recorded, not fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    pub clients_claimed: usize,
}

/// Fetch every manifest entry, then write them all into the generation's
/// store. Nothing is written unless every fetch returned an ok response.
pub async fn precache(
    storage: &Arc<dyn CacheStorage>,
    fetcher: &Arc<dyn Fetcher>,
    origin: &Url,
    generation: &CacheGeneration,
    manifest: &AssetManifest,
    retry: &RetryConfig,
) -> Result<InstallReport, WorkerError> {
    let urls = manifest.resolve(origin)?;
    info!(generation = %generation, assets = urls.len(), "Precaching manifest");

    let pairs = try_join_all(urls.into_iter().map(|url| fetch_asset(fetcher, url, retry))).await?;

    let existed = storage.has(generation.as_str()).await?;
    let cache = storage.open(generation.as_str()).await?;

    if let Err(e) = cache.put_all(&pairs).await {
        warn!(generation = %generation, error = %e, "Precache write failed");
        if !existed {
            if let Err(cleanup) = storage.delete(generation.as_str()).await {
                warn!(generation = %generation, error = %cleanup, "Could not remove partial store");
            }
        }
        return Err(e.into());
    }

    let cached = pairs
        .iter()
        .map(|(request, _)| havenkit_cache::cache_key(&request.url))
        .collect();

    Ok(InstallReport {
        generation: generation.clone(),
        cached,
    })
}

async fn fetch_asset(
    fetcher: &Arc<dyn Fetcher>,
    url: Url,
    retry: &RetryConfig,
) -> Result<(Request, Response), WorkerError> {
    let request = Request::get(url);
    let req = &request;

    let response = retry_with_backoff(retry, || async move {
        let response = fetcher
            .fetch(req, FetchOptions::default())
            .await
            .map_err(|e| WorkerError::AssetFetchFailure {
                url: req.url.to_string(),
                reason: e.to_string(),
            })?;
        if !response.ok() {
            return Err(WorkerError::AssetFetchFailure {
                url: req.url.to_string(),
                reason: format!("status {}", response.status),
            });
        }
        Ok(response)
    })
    .await?;

    debug!(url = %request.url, bytes = response.body.len(), "Fetched precache asset");
    Ok((request, response))
}

/// Delete every store except `current`. One failing delete does not stop
/// the others.
pub async fn sweep_stale(storage: &Arc<dyn CacheStorage>, current: &CacheGeneration) -> ActivateReport {
    let mut report = ActivateReport::default();

    let names = match storage.keys().await {
        Ok(names) => names,
        Err(e) => {
            warn!(error = %e, "Could not list cache stores, skipping sweep");
            return report;
        }
    };

    for name in names.into_iter().filter(|name| current != name.as_str()) {
        match storage.delete(&name).await {
            Ok(_) => {
                info!(cache = %name, "Deleted stale cache generation");
                report.deleted.push(name);
            }
            Err(e) => {
                warn!(cache = %name, error = %e, "Failed to delete stale cache generation");
                report.failed.push(name);
            }
        }
    }

    report
}

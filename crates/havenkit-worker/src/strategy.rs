//! Cache/network reconciliation strategies.
//!
//! Both strategies work against the single current cache store. Every
//! fallback is an explicit branch; a failed cache write never fails the
//! request that produced the response.

use std::sync::Arc;
use std::time::Duration;

use havenkit_cache::{Cache, MatchOptions};
use havenkit_common::with_timeout;
use havenkit_net::{Destination, FetchOptions, Fetcher, NetError, Request, Response};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::{ControllerEvent, WorkerError};

/// Background revalidation started by stale-while-revalidate.
pub type Revalidation = JoinHandle<Result<Response, NetError>>;

/// Merges cache and network results for intercepted requests.
#[derive(Clone)]
pub struct Reconciler {
    fetcher: Arc<dyn Fetcher>,
    network_timeout: Option<Duration>,
    offline_page: Option<Url>,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl Reconciler {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        network_timeout: Option<Duration>,
        offline_page: Option<Url>,
        event_tx: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Self {
        Self {
            fetcher,
            network_timeout,
            offline_page,
            event_tx,
        }
    }

    /// Network-first, for critical requests.
    ///
    /// 1. Fetch live, bypassing HTTP caches, within the deadline.
    /// 2. Any response: an ok one is written back; either way it is returned.
    /// 3. Failed attempt: the cached entry (query ignored), if any.
    /// 4. No entry: one more uncached fetch with no deadline.
    /// 5. That fails too: the offline page for document requests, else the error.
    pub async fn network_first(
        &self,
        cache: &Arc<dyn Cache>,
        request: &Request,
    ) -> Result<Response, WorkerError> {
        let live_error = match self.fetch_live(request).await {
            Ok(response) => {
                if response.ok() {
                    write_back(cache, request, &response, &self.event_tx).await;
                } else {
                    debug!(url = %request.url, status = %response.status, "Non-ok response passed through uncached");
                }
                return Ok(response);
            }
            Err(e) => e,
        };

        debug!(url = %request.url, error = %live_error, "Network-first fetch failed, trying cache");

        if let Some(cached) = lookup(cache, request).await {
            return Ok(cached);
        }

        match self.fetcher.fetch(request, FetchOptions::default()).await {
            Ok(response) => Ok(response),
            Err(last_error) => {
                if let Some(page) = self.offline_fallback(cache, request).await {
                    return Ok(page);
                }
                warn!(url = %request.url, error = %last_error, "Critical request failed with no cache entry");
                Err(WorkerError::network(&request.url, last_error))
            }
        }
    }

    /// Stale-while-revalidate, for ordinary requests.
    ///
    /// The network fetch always starts. A cached entry is returned at once and
    /// the fetch only refreshes the cache; without one the caller gets the
    /// fetch's own result.
    pub async fn stale_while_revalidate(
        &self,
        cache: &Arc<dyn Cache>,
        request: &Request,
    ) -> (Result<Response, WorkerError>, Option<Revalidation>) {
        let cached = lookup(cache, request).await;
        let revalidation = self.spawn_revalidation(Arc::clone(cache), request.clone());

        match cached {
            Some(response) => (Ok(response), Some(revalidation)),
            None => {
                let result = match revalidation.await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(e)) => Err(WorkerError::network(&request.url, e)),
                    Err(join) => Err(WorkerError::State(format!(
                        "revalidation task for {} aborted: {join}",
                        request.url
                    ))),
                };
                (result, None)
            }
        }
    }

    fn spawn_revalidation(&self, cache: Arc<dyn Cache>, request: Request) -> Revalidation {
        let fetcher = Arc::clone(&self.fetcher);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            match fetcher.fetch(&request, FetchOptions::default()).await {
                Ok(response) => {
                    if response.ok() {
                        write_back(&cache, &request, &response, &event_tx).await;
                    }
                    let _ = event_tx.send(ControllerEvent::Revalidated {
                        url: request.url.to_string(),
                        status: response.status.as_u16(),
                    });
                    Ok(response)
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Revalidation fetch failed");
                    let _ = event_tx.send(ControllerEvent::RevalidationFailed {
                        url: request.url.to_string(),
                        reason: e.to_string(),
                    });
                    Err(e)
                }
            }
        })
    }

    async fn fetch_live(&self, request: &Request) -> Result<Response, NetError> {
        let fetch = || self.fetcher.fetch(request, FetchOptions::reload());
        match self.network_timeout {
            Some(deadline) => with_timeout(deadline, fetch)
                .await
                .map_err(|_| NetError::Timeout(deadline))?,
            None => fetch().await,
        }
    }

    async fn offline_fallback(&self, cache: &Arc<dyn Cache>, request: &Request) -> Option<Response> {
        if request.destination != Destination::Document {
            return None;
        }
        let page = self.offline_page.as_ref()?;
        let page_request = Request::get(page.clone());
        let response = lookup(cache, &page_request).await?;
        debug!(url = %request.url, offline_page = %page, "Serving offline page");
        Some(response)
    }
}

/// Cache lookup ignoring the query string. A failing store counts as a miss.
async fn lookup(cache: &Arc<dyn Cache>, request: &Request) -> Option<Response> {
    match cache
        .match_request(request, MatchOptions::ignore_search())
        .await
    {
        Ok(found) => found,
        Err(e) => {
            warn!(cache = %cache.name(), url = %request.url, error = %e, "Cache lookup failed, treating as miss");
            None
        }
    }
}

/// Best-effort write of a fresh response.
async fn write_back(
    cache: &Arc<dyn Cache>,
    request: &Request,
    response: &Response,
    event_tx: &mpsc::UnboundedSender<ControllerEvent>,
) {
    if let Err(e) = cache.put(request, response).await {
        warn!(cache = %cache.name(), url = %request.url, error = %e, "Cache write failed");
        let _ = event_tx.send(ControllerEvent::CacheWriteFailed {
            url: request.url.to_string(),
            reason: e.to_string(),
        });
    }
}

//! reqwest-backed [`Fetcher`] used against a live origin.

use std::time::Duration;

use async_trait::async_trait;
use http::header::{CACHE_CONTROL, PRAGMA};
use http::HeaderValue;
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::{CacheMode, FetchOptions, Fetcher, NetError, Request, Response, ResponseSource};

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("havenkit/", env!("CARGO_PKG_VERSION")).to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Fetches over HTTP(S) with reqwest.
pub struct HttpFetcher {
    client: Client,
    default_timeout: Duration,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");

        Ok(Self {
            client,
            default_timeout: config.default_timeout,
        })
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> NetError {
    if err.is_timeout() {
        NetError::Timeout(timeout)
    } else if err.is_connect() {
        NetError::Unreachable(err.to_string())
    } else {
        NetError::HttpError(err)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request, options: FetchOptions) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, cache = ?options.cache, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if options.cache == CacheMode::Reload {
            req_builder = req_builder
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .header(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        req_builder = req_builder.timeout(timeout);

        let response = req_builder
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify(e, timeout))?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url,
            status,
            headers,
            body,
            source: ResponseSource::Network,
        })
    }
}

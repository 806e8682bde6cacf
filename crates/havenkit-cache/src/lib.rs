//! # HavenKit Cache
//!
//! Named, versioned request/response stores for the offline cache
//! controller.
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage (one per origin)
//!     └── Cache (one per generation, e.g. "house-v7")
//!             └── GET URL → CacheEntry (status, headers, body)
//! ```
//!
//! Only GET requests are ever keyed. Every write is a whole-entry
//! overwrite, so the last writer for a key wins.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use havenkit_common::HavenError;
use havenkit_net::{Request, Response, ResponseSource};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod memory;
pub mod snapshot;

pub use memory::{MemoryCache, MemoryCacheStorage};
pub use snapshot::{CacheSnapshot, StorageSnapshot};

// ==================== Errors ====================

/// Errors that can occur in cache store operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Only GET requests can be cached, got {0}")]
    MethodNotCacheable(Method),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<CacheError> for HavenError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Io(e) => HavenError::Io(e),
            other => HavenError::cache_with_source("cache operation failed", other),
        }
    }
}

// ==================== Keys ====================

/// Options for [`Cache::match_request`] and [`Cache::delete`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Compare URLs with their query string removed.
    pub ignore_search: bool,
}

impl MatchOptions {
    /// Match regardless of query string.
    pub fn ignore_search() -> Self {
        Self {
            ignore_search: true,
        }
    }
}

/// Storage key for a URL: the URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// The URL with both query and fragment removed.
pub fn search_stripped_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.set_query(None);
    url.into()
}

/// Whether a stored key matches `url` under `options`.
pub fn key_matches(stored: &str, url: &Url, options: MatchOptions) -> bool {
    if !options.ignore_search {
        return stored == cache_key(url);
    }
    match Url::parse(stored) {
        Ok(stored) => search_stripped_key(&stored) == search_stripped_key(url),
        Err(_) => false,
    }
}

// ==================== Entries ====================

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (fragment removed).
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order.
    pub headers: Vec<(String, String)>,

    /// Response body.
    #[serde(with = "snapshot::base64_body")]
    pub body: Bytes,

    /// Stored at timestamp (ms since epoch).
    pub stored_at: u64,

    /// Write sequence within the owning cache; higher is newer.
    pub seq: u64,
}

impl CacheEntry {
    /// Snapshot a response for storage under `request`.
    pub fn from_response(request: &Request, response: &Response, seq: u64) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: cache_key(&request.url),
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            stored_at: now_millis(),
            seq,
        }
    }

    /// Rebuild a response marked as served from cache.
    pub fn to_response(&self) -> Result<Response, CacheError> {
        let url = Url::parse(&self.url)
            .map_err(|e| CacheError::Corrupt(format!("{}: {e}", self.url)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| CacheError::Corrupt(format!("{}: {e}", self.url)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| CacheError::Corrupt(format!("header {name}: {e}")))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| CacheError::Corrupt(format!("header value: {e}")))?;
            headers.append(name, value);
        }

        Ok(Response {
            url,
            status,
            headers,
            body: self.body.clone(),
            source: ResponseSource::Cache,
        })
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Seams ====================

/// One named cache store.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Store name.
    fn name(&self) -> &str;

    /// Find the entry for `request`. Under `ignore_search`, the most
    /// recently written matching entry wins.
    async fn match_request(
        &self,
        request: &Request,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError>;

    /// Store (or overwrite) the response for a GET request.
    async fn put(&self, request: &Request, response: &Response) -> Result<(), CacheError>;

    /// Store several entries. Stores that can do so write them as one unit.
    async fn put_all(&self, pairs: &[(Request, Response)]) -> Result<(), CacheError> {
        for (request, response) in pairs {
            self.put(request, response).await?;
        }
        Ok(())
    }

    /// Remove matching entries. Returns whether anything was removed.
    async fn delete(&self, request: &Request, options: MatchOptions) -> Result<bool, CacheError>;

    /// All stored keys, oldest write first.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;
}

/// The set of named cache stores for one origin.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a store, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError>;

    /// Check if a store exists.
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Delete a store. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// All store names, in creation order.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;
}

/// Reject anything but GET before it reaches a store.
pub fn ensure_cacheable(request: &Request) -> Result<(), CacheError> {
    if request.method == Method::GET {
        Ok(())
    } else {
        Err(CacheError::MethodNotCacheable(request.method.clone()))
    }
}

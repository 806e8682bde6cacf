//! In-process cache stores.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use havenkit_net::{Request, Response};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::{
    cache_key, ensure_cacheable, key_matches, Cache, CacheEntry, CacheError, CacheStorage,
    MatchOptions,
};

/// A cache store held in memory.
#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<String, CacheEntry>>,
    next_seq: AtomicU64,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Rebuild a cache from stored entries.
    pub fn from_entries(name: &str, entries: Vec<CacheEntry>) -> Self {
        let next_seq = entries.iter().map(|e| e.seq).max().unwrap_or(0) + 1;
        let entries = entries.into_iter().map(|e| (e.url.clone(), e)).collect();
        Self {
            name: name.to_string(),
            entries: RwLock::new(entries),
            next_seq: AtomicU64::new(next_seq),
        }
    }

    /// Copy out every entry, oldest write first.
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache has no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(
        &self,
        request: &Request,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError> {
        let entries = self.entries.read().await;

        let found = if options.ignore_search {
            entries
                .values()
                .filter(|e| key_matches(&e.url, &request.url, options))
                .max_by_key(|e| e.seq)
        } else {
            entries.get(&cache_key(&request.url))
        };

        trace!(cache = %self.name, url = %request.url, hit = found.is_some(), "Cache match");
        found.map(CacheEntry::to_response).transpose()
    }

    async fn put(&self, request: &Request, response: &Response) -> Result<(), CacheError> {
        ensure_cacheable(request)?;
        // The sequence number is taken under the lock so write order and seq order agree.
        let mut entries = self.entries.write().await;
        let entry = CacheEntry::from_response(request, response, self.seq());
        debug!(cache = %self.name, url = %entry.url, status = entry.status, "Cache put");
        entries.insert(entry.url.clone(), entry);
        Ok(())
    }

    async fn put_all(&self, pairs: &[(Request, Response)]) -> Result<(), CacheError> {
        for (request, _) in pairs {
            ensure_cacheable(request)?;
        }
        let mut entries = self.entries.write().await;
        for (request, response) in pairs {
            let entry = CacheEntry::from_response(request, response, self.seq());
            entries.insert(entry.url.clone(), entry);
        }
        debug!(cache = %self.name, count = pairs.len(), "Cache put_all");
        Ok(())
    }

    async fn delete(&self, request: &Request, options: MatchOptions) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key_matches(key, &request.url, options));
        Ok(entries.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.entries().await.into_iter().map(|e| e.url).collect())
    }
}

/// Cache storage held in memory.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, (u64, Arc<MemoryCache>)>>,
    next_order: AtomicU64,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store and keep its concrete type.
    pub async fn open_memory(&self, name: &str) -> Arc<MemoryCache> {
        let mut caches = self.caches.write().await;
        let (_, cache) = caches.entry(name.to_string()).or_insert_with(|| {
            debug!(cache = %name, "Creating cache store");
            (
                self.next_order.fetch_add(1, Ordering::Relaxed),
                Arc::new(MemoryCache::new(name)),
            )
        });
        Arc::clone(cache)
    }

    /// Insert a fully built store, replacing any store of the same name.
    pub async fn insert(&self, cache: MemoryCache) {
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        self.caches
            .write()
            .await
            .insert(cache.name.clone(), (order, Arc::new(cache)));
    }

    /// All stores, in creation order.
    pub async fn stores(&self) -> Vec<Arc<MemoryCache>> {
        let caches = self.caches.read().await;
        let mut stores: Vec<_> = caches.values().cloned().collect();
        stores.sort_by_key(|(order, _)| *order);
        stores.into_iter().map(|(_, cache)| cache).collect()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError> {
        Ok(self.open_memory(name).await)
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let removed = self.caches.write().await.remove(name).is_some();
        if removed {
            debug!(cache = %name, "Deleted cache store");
        }
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .stores()
            .await
            .iter()
            .map(|cache| cache.name.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;
    use url::Url;

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    fn response(url: &str, body: &'static str) -> Response {
        Response::new(Url::parse(url).unwrap(), StatusCode::OK, body)
    }

    #[tokio::test]
    async fn test_cache_put_and_match() {
        let cache = MemoryCache::new("house-v1");
        let url = "https://house.example/styles.css";

        cache.put(&get(url), &response(url, "a{}")).await.unwrap();

        let hit = cache
            .match_request(&get(url), MatchOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"a{}"));
        assert!(hit.from_cache());

        let miss = cache
            .match_request(&get("https://house.example/other.css"), MatchOptions::default())
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = MemoryCache::new("house-v1");
        let url = "https://house.example/";

        cache.put(&get(url), &response(url, "old")).await.unwrap();
        cache.put(&get(url), &response(url, "new")).await.unwrap();

        assert_eq!(cache.len().await, 1);
        let hit = cache
            .match_request(&get(url), MatchOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.text().unwrap(), "new");
    }

    #[tokio::test]
    async fn test_ignore_search_prefers_latest_write() {
        let cache = MemoryCache::new("house-v1");
        let old = "https://house.example/index.html?v=10";
        let new = "https://house.example/index.html?v=11";

        cache.put(&get(old), &response(old, "ten")).await.unwrap();
        cache.put(&get(new), &response(new, "eleven")).await.unwrap();

        let hit = cache
            .match_request(
                &get("https://house.example/index.html"),
                MatchOptions::ignore_search(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.text().unwrap(), "eleven");

        let exact = cache
            .match_request(&get("https://house.example/index.html"), MatchOptions::default())
            .await
            .unwrap();
        assert!(exact.is_none());
    }

    #[tokio::test]
    async fn test_ignore_search_follows_write_order_not_query() {
        let cache = MemoryCache::new("house-v1");
        let newer_query = "https://house.example/app.js?v=11";
        let older_query = "https://house.example/app.js?v=10";

        cache
            .put(&get(newer_query), &response(newer_query, "eleven"))
            .await
            .unwrap();
        cache
            .put(&get(older_query), &response(older_query, "ten"))
            .await
            .unwrap();

        let hit = cache
            .match_request(
                &get("https://house.example/app.js?v=12"),
                MatchOptions::ignore_search(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.text().unwrap(), "ten");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_keep_seq_in_write_order() {
        let cache = Arc::new(MemoryCache::new("house-v1"));
        let url = "https://house.example/app.js";

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let response =
                        Response::new(Url::parse(url).unwrap(), StatusCode::OK, format!("{i}"));
                    cache.put(&get(url), &response).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // The surviving entry is the last write, so it holds the highest seq issued.
        let entries = cache.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].seq, 64);
    }

    #[tokio::test]
    async fn test_put_rejects_post() {
        let cache = MemoryCache::new("house-v1");
        let url = Url::parse("https://house.example/contact").unwrap();
        let post = Request::post(url.clone(), Bytes::from_static(b"msg"));

        let result = cache.put(&post, &Response::new(url, StatusCode::OK, "")).await;
        assert!(matches!(result, Err(CacheError::MethodNotCacheable(_))));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_all_is_all_or_nothing_on_method() {
        let cache = MemoryCache::new("house-v1");
        let a = "https://house.example/a.js";
        let url = Url::parse("https://house.example/b").unwrap();
        let pairs = vec![
            (get(a), response(a, "a")),
            (
                Request::post(url.clone(), Bytes::new()),
                Response::new(url, StatusCode::OK, ""),
            ),
        ];

        assert!(cache.put_all(&pairs).await.is_err());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_cache_delete_and_keys() {
        let cache = MemoryCache::new("house-v1");
        for url in ["https://house.example/a.js", "https://house.example/b.js?v=2"] {
            cache.put(&get(url), &response(url, "x")).await.unwrap();
        }

        assert_eq!(
            cache.keys().await.unwrap(),
            vec!["https://house.example/a.js", "https://house.example/b.js?v=2"]
        );

        let removed = cache
            .delete(&get("https://house.example/b.js"), MatchOptions::ignore_search())
            .await
            .unwrap();
        assert!(removed);
        assert_eq!(cache.keys().await.unwrap(), vec!["https://house.example/a.js"]);
    }

    #[tokio::test]
    async fn test_cache_storage() {
        let storage = MemoryCacheStorage::new();

        assert!(!storage.has("v1").await.unwrap());

        storage.open("v1").await.unwrap();
        storage.open("v2").await.unwrap();
        assert!(storage.has("v1").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["v1", "v2"]);

        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["v2"]);
    }

    #[tokio::test]
    async fn test_open_returns_same_store() {
        let storage = MemoryCacheStorage::new();
        let url = "https://house.example/";

        let first = storage.open("v1").await.unwrap();
        first.put(&get(url), &response(url, "home")).await.unwrap();

        let second = storage.open("v1").await.unwrap();
        assert_eq!(second.keys().await.unwrap(), vec![url]);
    }
}

//! JSON snapshots of a [`MemoryCacheStorage`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Cache, CacheEntry, CacheError, MemoryCache, MemoryCacheStorage};

/// Serialized form of one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub name: String,
    pub entries: Vec<CacheEntry>,
}

/// Serialized form of every store, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub caches: Vec<CacheSnapshot>,
}

impl StorageSnapshot {
    /// Look up a store by name.
    pub fn cache(&self, name: &str) -> Option<&CacheSnapshot> {
        self.caches.iter().find(|c| c.name == name)
    }
}

impl MemoryCacheStorage {
    /// Copy out every store.
    pub async fn snapshot(&self) -> StorageSnapshot {
        let mut caches = Vec::new();
        for cache in self.stores().await {
            caches.push(CacheSnapshot {
                name: cache.name().to_string(),
                entries: cache.entries().await,
            });
        }
        StorageSnapshot { caches }
    }

    /// Build storage from a snapshot.
    pub async fn restore(snapshot: StorageSnapshot) -> Self {
        let storage = Self::new();
        for cache in snapshot.caches {
            storage
                .insert(MemoryCache::from_entries(&cache.name, cache.entries))
                .await;
        }
        storage
    }

    /// Write a JSON snapshot to `path`.
    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<(), CacheError> {
        let path = path.as_ref();
        let snapshot = self.snapshot().await;
        let json = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), stores = snapshot.caches.len(), "Saved cache snapshot");
        Ok(())
    }

    /// Read a JSON snapshot from `path`.
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let snapshot: StorageSnapshot = serde_json::from_slice(&bytes)?;
        Ok(Self::restore(snapshot).await)
    }
}

/// Serde adapter storing bodies as base64 strings.
pub(crate) mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheStorage, MatchOptions};
    use havenkit_net::{Request, Response};
    use http::StatusCode;
    use url::Url;

    async fn seeded() -> MemoryCacheStorage {
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("house-v3").await.unwrap();
        for (path, body) in [("/", "home"), ("/styles.css", "body{}")] {
            let url = Url::parse("https://house.example/").unwrap().join(path).unwrap();
            cache
                .put(
                    &Request::get(url.clone()),
                    &Response::new(url, StatusCode::OK, body),
                )
                .await
                .unwrap();
        }
        storage.open("house-v2").await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let storage = seeded().await;
        let snapshot = storage.snapshot().await;

        assert_eq!(snapshot.caches.len(), 2);
        assert_eq!(snapshot.cache("house-v3").unwrap().entries.len(), 2);

        let restored = MemoryCacheStorage::restore(snapshot.clone()).await;
        assert_eq!(restored.keys().await.unwrap(), vec!["house-v3", "house-v2"]);
        assert_eq!(restored.snapshot().await, snapshot);
    }

    #[tokio::test]
    async fn test_restored_cache_keeps_write_order() {
        let storage = MemoryCacheStorage::restore(seeded().await.snapshot().await).await;
        let cache = storage.open("house-v3").await.unwrap();
        let url = Url::parse("https://house.example/?utm=mail").unwrap();
        cache
            .put(
                &Request::get(url.clone()),
                &Response::new(url, StatusCode::OK, "newest"),
            )
            .await
            .unwrap();

        let hit = cache
            .match_request(
                &Request::parse_get("https://house.example/").unwrap(),
                MatchOptions::ignore_search(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.text().unwrap(), "newest");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let storage = seeded().await;
        storage.save_to(&path).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"aG9tZQ==\""));

        let loaded = MemoryCacheStorage::load_from(&path).await.unwrap();
        assert_eq!(loaded.snapshot().await, storage.snapshot().await);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = MemoryCacheStorage::load_from(dir.path().join("absent.json")).await;
        assert!(matches!(result, Err(CacheError::Io(_))));
    }
}

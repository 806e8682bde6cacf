#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use havenkit_cache::{Cache, CacheError, CacheStorage, MatchOptions, MemoryCacheStorage};
use havenkit_net::{CacheMode, FetchOptions, Fetcher, NetError, Request, Response};
use havenkit_worker::{AssetManifest, ControllerEvent, OfflineCacheController, WorkerConfig};
use http::{Method, StatusCode};
use tokio::sync::mpsc;
use url::Url;

pub const ORIGIN: &str = "https://house.example/";

pub fn origin() -> Url {
    Url::parse(ORIGIN).unwrap()
}

pub fn url(path: &str) -> Url {
    origin().join(path).unwrap()
}

/// A recorded fetch.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub url: String,
    pub cache: CacheMode,
}

/// Serves bodies by path (query ignored). Unknown paths get a 404.
pub struct ScriptedFetcher {
    online: AtomicBool,
    delay_ms: AtomicU64,
    bodies: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(true),
            delay_ms: AtomicU64::new(0),
            bodies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn serve(&self, path: &str, body: &str) {
        self.bodies
            .lock()
            .unwrap()
            .insert(path.to_string(), body.to_string());
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request, options: FetchOptions) -> Result<Response, NetError> {
        self.calls.lock().unwrap().push(Call {
            method: request.method.clone(),
            url: request.url.to_string(),
            cache: options.cache,
        });

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Unreachable(request.url.to_string()));
        }

        let body = self.bodies.lock().unwrap().get(request.url.path()).cloned();
        Ok(match body {
            Some(body) => Response::new(request.url.clone(), StatusCode::OK, body),
            None => Response::new(request.url.clone(), StatusCode::NOT_FOUND, "not found"),
        })
    }
}

/// In-memory storage with injectable delete and write failures.
pub struct FaultyStorage {
    inner: MemoryCacheStorage,
    undeletable: Mutex<HashSet<String>>,
    fail_writes: Arc<AtomicBool>,
}

impl FaultyStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCacheStorage::new(),
            undeletable: Mutex::new(HashSet::new()),
            fail_writes: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn inner(&self) -> &MemoryCacheStorage {
        &self.inner
    }

    pub fn refuse_delete(&self, name: &str) {
        self.undeletable.lock().unwrap().insert(name.to_string());
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStorage for FaultyStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError> {
        let inner = self.inner.open(name).await?;
        Ok(Arc::new(FaultyCache {
            inner,
            fail_writes: Arc::clone(&self.fail_writes),
        }))
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if self.undeletable.lock().unwrap().contains(name) {
            return Err(CacheError::Unavailable(format!("{name} is locked")));
        }
        self.inner.delete(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.keys().await
    }
}

struct FaultyCache {
    inner: Arc<dyn Cache>,
    fail_writes: Arc<AtomicBool>,
}

impl FaultyCache {
    fn check_writes(&self) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("quota exceeded".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for FaultyCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn match_request(
        &self,
        request: &Request,
        options: MatchOptions,
    ) -> Result<Option<Response>, CacheError> {
        self.inner.match_request(request, options).await
    }

    async fn put(&self, request: &Request, response: &Response) -> Result<(), CacheError> {
        self.check_writes()?;
        self.inner.put(request, response).await
    }

    async fn put_all(&self, pairs: &[(Request, Response)]) -> Result<(), CacheError> {
        self.check_writes()?;
        self.inner.put_all(pairs).await
    }

    async fn delete(&self, request: &Request, options: MatchOptions) -> Result<bool, CacheError> {
        self.inner.delete(request, options).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.keys().await
    }
}

pub fn site_config(generation: &str) -> WorkerConfig {
    WorkerConfig::new(
        origin(),
        generation,
        AssetManifest::new(["/", "/index.html", "/styles.css"]),
    )
}

/// A fetcher serving the three site assets.
pub fn site_fetcher() -> Arc<ScriptedFetcher> {
    let fetcher = ScriptedFetcher::new();
    fetcher.serve("/", "home v1");
    fetcher.serve("/index.html", "index v1");
    fetcher.serve("/styles.css", "body {}");
    fetcher
}

pub fn controller(
    config: WorkerConfig,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<ScriptedFetcher>,
) -> (OfflineCacheController, mpsc::UnboundedReceiver<ControllerEvent>) {
    OfflineCacheController::new(config, storage, fetcher).unwrap()
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

//! The offline cache controller and its event surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use havenkit_cache::CacheStorage;
use havenkit_net::{FetchOptions, Fetcher, Request, Response};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::lifecycle::{precache, sweep_stale};
use crate::strategy::Revalidation;
use crate::{
    classify, ActivateReport, Client, ClientType, Clients, InstallReport, Reconciler,
    RequestClass, WorkerConfig, WorkerError, WorkerState,
};

// ==================== Types ====================

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// Page that issued the request.
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }

    pub fn from_client(request: Request, client_id: impl Into<String>) -> Self {
        Self {
            request,
            client_id: Some(client_id.into()),
        }
    }
}

/// What the controller did with a fetch event.
#[derive(Debug)]
pub enum FetchDisposition {
    /// Not intercepted; the host fetches as if no worker existed.
    Passthrough,
    /// Answered by the controller.
    Respond(Response),
}

/// Controller notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    StateChange {
        worker_id: WorkerId,
        state: WorkerState,
    },
    /// Install finished; the worker skips waiting.
    ActivationRequested { worker_id: WorkerId },
    CacheDeleted { name: String },
    CacheDeleteFailed { name: String },
    ClientsClaimed { count: usize },
    Revalidated { url: String, status: u16 },
    RevalidationFailed { url: String, reason: String },
    CacheWriteFailed { url: String, reason: String },
}

/// Lifecycle and fetch events delivered by the host runtime.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchEvent),
}

/// Result of dispatching a [`WorkerEvent`].
#[derive(Debug)]
pub enum WorkerOutcome {
    Installed(InstallReport),
    Activated(ActivateReport),
    Fetched(FetchDisposition),
}

/// One method per lifecycle hook. Each returned future must be driven to
/// completion before the host considers the event handled.
#[async_trait]
pub trait WorkerEventHandler: Send + Sync {
    async fn install(&self) -> Result<InstallReport, WorkerError>;

    async fn activate(&self) -> Result<ActivateReport, WorkerError>;

    async fn fetch(&self, event: FetchEvent) -> Result<FetchDisposition, WorkerError>;

    async fn dispatch(&self, event: WorkerEvent) -> Result<WorkerOutcome, WorkerError> {
        match event {
            WorkerEvent::Install => self.install().await.map(WorkerOutcome::Installed),
            WorkerEvent::Activate => self.activate().await.map(WorkerOutcome::Activated),
            WorkerEvent::Fetch(event) => self.fetch(event).await.map(WorkerOutcome::Fetched),
        }
    }
}

// ==================== Controller ====================

/// Versioned offline cache for one origin.
pub struct OfflineCacheController {
    id: WorkerId,
    config: Arc<WorkerConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    reconciler: Reconciler,
    state: RwLock<WorkerState>,
    clients: RwLock<Clients>,
    background: Mutex<Vec<Revalidation>>,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl OfflineCacheController {
    /// Create a controller. The config is validated once here.
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ControllerEvent>), WorkerError> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reconciler = Reconciler::new(
            Arc::clone(&fetcher),
            config.network_timeout(),
            config.offline_page_url(),
            event_tx.clone(),
        );

        Ok((
            Self {
                id: WorkerId::new(),
                config: Arc::new(config),
                storage,
                fetcher,
                reconciler,
                state: RwLock::new(WorkerState::Parsed),
                clients: RwLock::new(Clients::new()),
                background: Mutex::new(Vec::new()),
                event_tx,
            },
            event_rx,
        ))
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Install, then activate immediately.
    pub async fn start(&self) -> Result<ActivateReport, WorkerError> {
        self.install().await?;
        self.activate().await
    }

    /// Mark this worker as replaced by a newer one.
    pub async fn retire(&self) {
        self.set_state(WorkerState::Redundant).await;
    }

    /// Register an open page. Pages opened while this worker is active are
    /// controlled from the start.
    pub async fn open_client(&self, url: Url) -> String {
        let active = self.state().await.intercepts_fetch();
        let mut clients = self.clients.write().await;
        let id = clients.open(url, ClientType::Window);
        if active {
            clients.claim(self.id, &self.config.origin);
        }
        id
    }

    pub async fn close_client(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    pub async fn client(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Snapshot of registered pages.
    pub async fn clients(&self, include_uncontrolled: bool) -> Vec<Client> {
        self.clients
            .read()
            .await
            .match_all(include_uncontrolled)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Handle a fetch event end to end: passthrough requests go straight to
    /// the network without touching the cache.
    pub async fn serve(&self, event: FetchEvent) -> Result<Response, WorkerError> {
        let request = event.request.clone();
        match self.fetch(event).await? {
            FetchDisposition::Respond(response) => Ok(response),
            FetchDisposition::Passthrough => self
                .fetcher
                .fetch(&request, FetchOptions::default())
                .await
                .map_err(|e| WorkerError::network(&request.url, e)),
        }
    }

    /// Wait for every background revalidation started so far.
    pub async fn settle(&self) {
        loop {
            let pending = std::mem::take(&mut *self.background.lock().await);
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Revalidation task did not complete");
                }
            }
        }
    }

    async fn track(&self, handle: Revalidation) {
        let mut background = self.background.lock().await;
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
        self.state_changed(state);
    }

    /// Check the current state and move to `next` under one write guard, so
    /// two concurrent lifecycle events cannot both pass the check.
    async fn transition(
        &self,
        allowed: impl Fn(WorkerState) -> bool,
        next: WorkerState,
        action: &str,
    ) -> Result<(), WorkerError> {
        {
            let mut state = self.state.write().await;
            if !allowed(*state) {
                return Err(WorkerError::State(format!("cannot {action} from {:?}", *state)));
            }
            *state = next;
        }
        self.state_changed(next);
        Ok(())
    }

    fn state_changed(&self, state: WorkerState) {
        debug!(worker = self.id.raw(), ?state, "Worker state changed");
        let _ = self.event_tx.send(ControllerEvent::StateChange {
            worker_id: self.id,
            state,
        });
    }
}

#[async_trait]
impl WorkerEventHandler for OfflineCacheController {
    async fn install(&self) -> Result<InstallReport, WorkerError> {
        self.transition(|state| state.can_install(), WorkerState::Installing, "install")
            .await?;

        let retry = self.config.precache_retry.to_retry_config();
        let result = precache(
            &self.storage,
            &self.fetcher,
            &self.config.origin,
            &self.config.generation,
            &self.config.precache_manifest(),
            &retry,
        )
        .await;

        match result {
            Ok(report) => {
                info!(generation = %report.generation, assets = report.cached.len(), "Install complete");
                self.set_state(WorkerState::Installed).await;
                let _ = self
                    .event_tx
                    .send(ControllerEvent::ActivationRequested { worker_id: self.id });
                Ok(report)
            }
            Err(e) => {
                warn!(generation = %self.config.generation, error = %e, "Install failed");
                self.set_state(WorkerState::InstallFailed).await;
                Err(e)
            }
        }
    }

    async fn activate(&self) -> Result<ActivateReport, WorkerError> {
        self.transition(
            |state| state == WorkerState::Installed,
            WorkerState::Activating,
            "activate",
        )
        .await?;

        let mut report = sweep_stale(&self.storage, &self.config.generation).await;
        for name in &report.deleted {
            let _ = self
                .event_tx
                .send(ControllerEvent::CacheDeleted { name: name.clone() });
        }
        for name in &report.failed {
            let _ = self
                .event_tx
                .send(ControllerEvent::CacheDeleteFailed { name: name.clone() });
        }

        report.clients_claimed = self
            .clients
            .write()
            .await
            .claim(self.id, &self.config.origin);
        let _ = self.event_tx.send(ControllerEvent::ClientsClaimed {
            count: report.clients_claimed,
        });

        self.set_state(WorkerState::Activated).await;
        info!(
            generation = %self.config.generation,
            deleted = report.deleted.len(),
            claimed = report.clients_claimed,
            "Activated"
        );
        Ok(report)
    }

    async fn fetch(&self, event: FetchEvent) -> Result<FetchDisposition, WorkerError> {
        if !self.state().await.intercepts_fetch() {
            return Ok(FetchDisposition::Passthrough);
        }

        let request = &event.request;
        let class = classify(request, &self.config.origin, &self.config.critical);
        if !class.is_intercepted() {
            return Ok(FetchDisposition::Passthrough);
        }

        // A newer generation deletes this store on activation; reopening it
        // would bring the old generation back.
        match self.storage.has(self.config.generation.as_str()).await {
            Ok(true) => {}
            Ok(false) => {
                info!(generation = %self.config.generation, "Cache store deleted, worker is redundant");
                self.set_state(WorkerState::Redundant).await;
                return Ok(FetchDisposition::Passthrough);
            }
            Err(e) => {
                warn!(generation = %self.config.generation, error = %e, "Cache store unavailable, passing through");
                return Ok(FetchDisposition::Passthrough);
            }
        }

        let cache = match self.storage.open(self.config.generation.as_str()).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(generation = %self.config.generation, error = %e, "Cache store unavailable, passing through");
                return Ok(FetchDisposition::Passthrough);
            }
        };

        debug!(url = %request.url, ?class, client = ?event.client_id, "Intercepting fetch");

        match class {
            RequestClass::Critical => self
                .reconciler
                .network_first(&cache, request)
                .await
                .map(FetchDisposition::Respond),
            _ => {
                let (result, revalidation) =
                    self.reconciler.stale_while_revalidate(&cache, request).await;
                if let Some(handle) = revalidation {
                    self.track(handle).await;
                }
                result.map(FetchDisposition::Respond)
            }
        }
    }
}

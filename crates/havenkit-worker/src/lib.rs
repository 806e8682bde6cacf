//! # HavenKit Worker
//!
//! The offline cache controller: a worker-side request interceptor that keeps
//! a site usable without a network.
//!
//! ## Features
//!
//! - **Lifecycle**: install (atomic precache), activate (sweep stale
//!   generations, claim open pages)
//! - **Routing**: every GET is classified as critical, ordinary, cross-origin
//!   or non-GET
//! - **Reconciliation**: network-first for critical pages, stale-while-revalidate
//!   for everything else
//!
//! ## Architecture
//!
//! ```text
//! host runtime ──install/activate/fetch──▶ WorkerEventHandler
//!                                              │
//!                                   OfflineCacheController
//!                                    ├── router (RequestClass)
//!                                    ├── Reconciler (strategies)
//!                                    ├── Clients
//!                                    └── CacheStorage ──▶ Cache "site-vN"
//! ```

pub mod clients;
pub mod config;
pub mod controller;
pub mod error;
pub mod generation;
pub mod lifecycle;
pub mod manifest;
pub mod router;
pub mod strategy;

pub use clients::{Client, ClientType, Clients};
pub use config::{PrecacheRetry, WorkerConfig};
pub use controller::{
    ControllerEvent, FetchDisposition, FetchEvent, OfflineCacheController, WorkerEvent,
    WorkerEventHandler, WorkerId, WorkerOutcome,
};
pub use error::WorkerError;
pub use generation::CacheGeneration;
pub use lifecycle::{ActivateReport, InstallReport, WorkerState};
pub use manifest::AssetManifest;
pub use router::{classify, CriticalPaths, PathPattern, RequestClass};
pub use strategy::Reconciler;

//! Deployment configuration, injected once at worker startup.

use std::path::Path;
use std::time::Duration;

use havenkit_common::RetryConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::manifest::resolve_same_origin;
use crate::{AssetManifest, CacheGeneration, CriticalPaths, WorkerError};

const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 5_000;

fn default_network_timeout_ms() -> Option<u64> {
    Some(DEFAULT_NETWORK_TIMEOUT_MS)
}

/// Retry budget for each precache fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheRetry {
    pub max_attempts: u32,
}

impl Default for PrecacheRetry {
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

impl PrecacheRetry {
    pub fn to_retry_config(self) -> RetryConfig {
        RetryConfig::attempts(self.max_attempts)
    }
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// The worker's own origin; anything else passes through.
    pub origin: Url,

    /// Current cache generation.
    pub generation: CacheGeneration,

    /// Assets precached on install.
    pub manifest: AssetManifest,

    /// Paths served network-first.
    #[serde(default)]
    pub critical: CriticalPaths,

    /// Deadline for the network-first fetch. `null` waits indefinitely.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: Option<u64>,

    /// Page served to document navigations when nothing else can answer.
    #[serde(default)]
    pub offline_page: Option<String>,

    #[serde(default)]
    pub precache_retry: PrecacheRetry,
}

impl WorkerConfig {
    /// Create a config with default routing and timeouts.
    pub fn new(origin: Url, generation: impl Into<CacheGeneration>, manifest: AssetManifest) -> Self {
        Self {
            origin,
            generation: generation.into(),
            manifest,
            critical: CriticalPaths::default(),
            network_timeout_ms: default_network_timeout_ms(),
            offline_page: None,
            precache_retry: PrecacheRetry::default(),
        }
    }

    pub fn with_critical(mut self, critical: CriticalPaths) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_network_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.network_timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    pub fn with_offline_page(mut self, path: impl Into<String>) -> Self {
        self.offline_page = Some(path.into());
        self
    }

    pub fn with_precache_attempts(mut self, max_attempts: u32) -> Self {
        self.precache_retry = PrecacheRetry { max_attempts };
        self
    }

    /// Parse a JSON config.
    pub fn from_json(json: &str) -> Result<Self, WorkerError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| WorkerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WorkerError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| WorkerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Check invariants the controller relies on.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(WorkerError::Config(format!(
                "origin must be http(s), got {}",
                self.origin
            )));
        }
        if self.generation.is_empty() {
            return Err(WorkerError::Config("generation id is empty".to_string()));
        }
        self.manifest.resolve(&self.origin)?;
        if let Some(ref page) = self.offline_page {
            resolve_same_origin(&self.origin, page)?;
        }
        Ok(())
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout_ms.map(Duration::from_millis)
    }

    /// Manifest entries plus the offline page, if any.
    pub fn precache_manifest(&self) -> AssetManifest {
        let mut manifest = self.manifest.clone();
        if let Some(ref page) = self.offline_page {
            manifest.push(page.clone());
        }
        manifest
    }

    /// Absolute URL of the offline page.
    pub fn offline_page_url(&self) -> Option<Url> {
        self.offline_page
            .as_deref()
            .and_then(|page| resolve_same_origin(&self.origin, page).ok())
    }
}

//! # HavenKit Common
//!
//! Shared by every havenkit crate:
//!
//! - [`HavenError`], the category error the per-crate errors convert into
//! - [`init_logging`] and its [`LogConfig`]
//! - [`retry_with_backoff`] and [`with_timeout`]

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for havenkit.
#[derive(Error, Debug)]
pub enum HavenError {
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Install, activate or state-transition failures.
    #[error("Lifecycle error: {message}")]
    Lifecycle { message: String },

    #[error("Config error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl HavenError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    pub fn network_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    pub fn cache_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HavenError::Network { .. } | HavenError::Timeout(_) | HavenError::Io(_)
        )
    }

    /// Short label for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            HavenError::Network { .. } => "network",
            HavenError::Cache { .. } => "cache",
            HavenError::Lifecycle { .. } => "lifecycle",
            HavenError::Config { .. } => "config",
            HavenError::Io(_) => "io",
            HavenError::Timeout(_) => "timeout",
            HavenError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

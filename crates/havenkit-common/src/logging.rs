//! Logging setup for binaries and tests.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::HavenError;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = HavenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(HavenError::InvalidArgument(format!(
                "unknown log format '{other}'"
            ))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Fallback level when neither `filter` nor `RUST_LOG` is set.
    pub level: Level,
    pub format: LogFormat,
    /// Print file and line of each event.
    pub with_location: bool,
    /// Directive string, e.g. `havenkit_worker=debug,reqwest=warn`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_location: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Level from a `-v` count: none = info, one = debug, more = trace with locations.
    pub fn from_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            with_location: verbosity > 1,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.as_str());
        match self.filter {
            Some(ref directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Install the global subscriber.
///
/// Fails if one is already installed.
pub fn init_logging(config: LogConfig) -> Result<(), HavenError> {
    let pretty = (config.format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .with_file(config.with_location)
            .with_line_number(config.with_location)
    });
    let compact = (config.format == LogFormat::Compact).then(|| {
        fmt::layer()
            .compact()
            .with_file(config.with_location)
            .with_line_number(config.with_location)
    });
    let json = (config.format == LogFormat::Json).then(|| fmt::layer().json());

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(pretty)
        .with(compact)
        .with(json)
        .try_init()
        .map_err(|e| HavenError::config(format!("logging already initialized: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(LogConfig::default().level, Level::INFO);
        assert_eq!(LogConfig::from_verbosity(0).level, Level::INFO);
        assert_eq!(LogConfig::from_verbosity(1).level, Level::DEBUG);

        let trace = LogConfig::from_verbosity(3);
        assert_eq!(trace.level, Level::TRACE);
        assert!(trace.with_location);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!(matches!(
            "xml".parse::<LogFormat>(),
            Err(HavenError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_filter_directives() {
        let config = LogConfig::default().with_filter("havenkit_worker=debug");
        assert_eq!(config.filter.as_deref(), Some("havenkit_worker=debug"));
        assert!(config.env_filter().to_string().contains("havenkit_worker=debug"));
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging(LogConfig::default().with_format(LogFormat::Compact));
        assert!(init_logging(LogConfig::default()).is_err());
    }
}

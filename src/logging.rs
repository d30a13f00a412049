//! Structured logging bootstrap (console + rolling file).
//!
//! The adapter itself only emits `tracing` events; hosts that have no
//! subscriber of their own can call [`init_logging`] once at startup.

use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,tpe_ingenico=debug";

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_dir: PathBuf,
    pub file_prefix: String,
    /// "hourly", "daily", anything else never rotates.
    pub rotation: String,
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    pub filter: String,
    /// JSON lines in the file instead of plain text.
    pub json: bool,
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            file_prefix: "tpe".into(),
            rotation: "daily".into(),
            filter: DEFAULT_FILTER.into(),
            json: false,
            console: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot create log directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("a global subscriber is already installed: {0}")]
    Init(#[from] TryInitError),
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process; dropping it flushes and stops the file writer.
pub fn init_logging(config: &LogConfig) -> Result<WorkerGuard, LoggingError> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(&config.log_dir, &config.file_prefix),
        "daily" => tracing_appender::rolling::daily(&config.log_dir, &config.file_prefix),
        _ => tracing_appender::rolling::never(&config.log_dir, &config.file_prefix),
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let json_file = config.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(non_blocking.clone())
            .with_ansi(false)
            .with_target(true)
    });
    let text_file = (!config.json).then(|| {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
    });
    let console = config.console.then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(json_file)
        .with(text_file)
        .try_init()?;

    tracing::info!("Logging initialised in {}", config.log_dir.display());
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_init_logging_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            log_dir: dir.path().join("nested"),
            rotation: "never".into(),
            console: false,
            ..Default::default()
        };

        let guard = init_logging(&config).unwrap();
        assert!(config.log_dir.is_dir());

        // The global subscriber can only be installed once per process.
        assert!(matches!(init_logging(&config), Err(LoggingError::Init(_))));
        drop(guard);
    }

    #[test]
    fn test_default_config() {
        let c = LogConfig::default();
        assert_eq!(c.file_prefix, "tpe");
        assert_eq!(c.rotation, "daily");
        assert!(c.filter.contains("tpe_ingenico=debug"));
    }
}

//! Process-wide log setup for fabric binaries and test harnesses.
//!
//! Library crates only emit `tracing` events; whoever owns `main` calls
//! [`init_logging`] once.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use tracing::{debug, error, info, trace, warn};

/// Target used for active-message handler diagnostics.
pub const AMHANDLER_TARGET: &str = "fabric::amhandler";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to create log file appender: {0}")]
    Appender(#[from] rolling::InitError),

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `fabric::amhandler=debug,warn`.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for log files. No file output when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    /// "hourly", "daily" or "never".
    #[serde(default = "default_rotation")]
    pub rotation: String,

    #[serde(default)]
    pub json_format: bool,

    #[serde(default = "default_true")]
    pub console_output: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "fabric".into()
}

fn default_rotation() -> String {
    "daily".into()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            log_dir: None,
            file_prefix: default_prefix(),
            rotation: default_rotation(),
            json_format: false,
            console_output: true,
        }
    }
}

impl LogConfig {
    fn rotation(&self) -> rolling::Rotation {
        match self.rotation.as_str() {
            "hourly" => rolling::Rotation::HOURLY,
            "never" => rolling::Rotation::NEVER,
            _ => rolling::Rotation::DAILY,
        }
    }
}

type BoxedLayer<S> = Box<dyn tracing_subscriber::Layer<S> + Send + Sync>;

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `config.level` when set. The returned guard flushes
/// the file writer on drop and must live as long as the process logs.
pub fn init_logging(
    config: &LogConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, LogError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let console_layer: Option<BoxedLayer<_>> = match (config.console_output, config.json_format) {
        (false, _) => None,
        (true, true) => Some(Box::new(fmt::layer().json())),
        (true, false) => Some(Box::new(fmt::layer())),
    };

    let (file_layer, guard): (Option<BoxedLayer<_>>, _) = match config.log_dir {
        Some(ref log_dir) => {
            let appender = rolling::RollingFileAppender::builder()
                .rotation(config.rotation())
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(log_dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer: BoxedLayer<_> = if config.json_format {
                Box::new(fmt::layer().json().with_writer(writer))
            } else {
                Box::new(fmt::layer().with_ansi(false).with_writer(writer))
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    registry
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = LogConfig::default();
        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.file_prefix, "fabric");
        assert!(cfg.console_output);
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let cfg: LogConfig = serde_json::from_str(r#"{"level":"debug"}"#).unwrap();
        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.rotation, "daily");
        assert!(!cfg.json_format);
    }

    #[test]
    fn test_rotation_mapping() {
        let mut cfg = LogConfig::default();
        cfg.rotation = "hourly".into();
        assert_eq!(cfg.rotation(), rolling::Rotation::HOURLY);
        cfg.rotation = "never".into();
        assert_eq!(cfg.rotation(), rolling::Rotation::NEVER);
        cfg.rotation = "bogus".into();
        assert_eq!(cfg.rotation(), rolling::Rotation::DAILY);
    }

    // The global subscriber can be installed only once per process, so this
    // is the single test that touches it.
    #[test]
    fn test_init_logging_once() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LogConfig {
            log_dir: Some(dir.path().to_path_buf()),
            console_output: false,
            rotation: "never".into(),
            ..LogConfig::default()
        };
        let guard = init_logging(&cfg).unwrap();
        assert!(guard.is_some());
        info!(target: AMHANDLER_TARGET, "logging initialized");

        assert!(matches!(
            init_logging(&LogConfig::default()),
            Err(LogError::AlreadyInitialized)
        ));
    }
}

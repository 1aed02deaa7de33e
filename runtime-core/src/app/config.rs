//! App configuration
//!
//! The property bag an app boots with. Path-table timings are in
//! microseconds to match the wire-level timer fields.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::graph::PredefinedGraph;
use crate::{Error, Result};

fn default_path_check_interval() -> u64 {
    // 10 seconds between timeout sweeps
    10_000_000
}

fn default_path_timeout() -> u64 {
    // 3 minutes before an unanswered command times out
    180_000_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bind address of this app, e.g. `msgpack://127.0.0.1:8001/`
    pub uri: String,

    /// Log emission threshold: 1=error .. 5=trace; absent defers to
    /// `RUST_LOG` / the default `info`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<u8>,

    /// Log destination; stderr when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Keep the app alive after its last graph ends
    #[serde(default)]
    pub long_running_mode: bool,

    /// Give each engine a dedicated event-loop thread instead of sharing
    /// the app runtime
    #[serde(default)]
    pub one_event_loop_per_engine: bool,

    /// Microseconds between path-table timeout sweeps
    #[serde(default = "default_path_check_interval")]
    pub path_check_interval: u64,

    /// Microseconds an out path may live without a final result
    #[serde(default = "default_path_timeout")]
    pub path_timeout: u64,

    #[serde(default)]
    pub predefined_graphs: Vec<PredefinedGraph>,
}

impl AppConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        AppConfig {
            uri: uri.into(),
            log_level: None,
            log_file: None,
            long_running_mode: false,
            one_event_loop_per_engine: false,
            path_check_interval: default_path_check_interval(),
            path_timeout: default_path_timeout(),
            predefined_graphs: Vec::new(),
        }
    }

    /// Parse from a JSON property bag.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(json)
            .map_err(|e| Error::InvalidArgument(format!("invalid app config: {e}")))?;
        if config.uri.is_empty() {
            return Err(Error::InvalidArgument("app config needs a uri".into()));
        }
        Ok(config)
    }

    pub(crate) fn check_interval(&self) -> Duration {
        Duration::from_micros(self.path_check_interval.max(1))
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_micros(self.path_timeout.max(1))
    }
}

/// Install the global tracing subscriber per the app's log settings.
/// A subscriber installed earlier (tests, embedding process) wins.
pub(crate) fn init_logging(config: &AppConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = match config.log_level {
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info")),
        Some(0) => EnvFilter::new("off"),
        Some(1) => EnvFilter::new("error"),
        Some(2) => EnvFilter::new("warn"),
        Some(3) => EnvFilter::new("info"),
        Some(4) => EnvFilter::new("debug"),
        Some(_) => EnvFilter::new("trace"),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match &config.log_file {
        Some(path) => {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => builder
                    .with_writer(std::sync::Arc::new(file))
                    .with_ansi(false)
                    .try_init(),
                Err(e) => {
                    eprintln!("weft: cannot open log file {}: {e}", path.display());
                    return;
                }
            }
        }
        None => builder.try_init(),
    };
    let _ = result;
}

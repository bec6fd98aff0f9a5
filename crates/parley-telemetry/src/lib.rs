//! Tracing setup for parley binaries.
//!
//! [`init_telemetry`] installs a global subscriber with a stderr fmt layer
//! (JSON or human-readable) filtered by `RUST_LOG` or the configured level,
//! plus an optional SQLite sink that keeps warn+ events for later
//! inspection through [`LogQuery`].

mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Base filter directive (e.g. `info`), used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Per-module overrides appended to the base directive.
    pub module_levels: Vec<(String, String)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Persist warn+ events to `log_db_path`.
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            module_levels: Vec::new(),
            json: false,
            log_to_sqlite: false,
            log_db_path: data_dir_fallback().join("logs.db"),
        }
    }
}

impl TelemetryConfig {
    /// The directive string handed to [`EnvFilter`] when `RUST_LOG` is unset.
    pub fn filter_directive(&self) -> String {
        let mut filter = self.log_level.to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{module}={}", level.to_lowercase()));
        }
        filter
    }
}

/// Keeps the log sink reachable after initialization.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    /// Access the log sink for querying persisted logs.
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

/// Initialize the telemetry subsystem. Call once at startup; later calls
/// leave the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let (json_layer, text_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter);
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter);
        (None, Some(layer))
    };

    let (sqlite_layer, log_sink) = if config.log_to_sqlite {
        match SqliteLogSink::new(&config.log_db_path) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                (Some(SqliteLogLayer::new(Arc::clone(&sink))), Some(sink))
            }
            Err(e) => {
                eprintln!("parley-telemetry: failed to open log DB: {e}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .with(sqlite_layer)
        .try_init()
    {
        eprintln!("parley-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard { log_sink }
}

fn data_dir_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".parley")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_includes_module_levels() {
        let config = TelemetryConfig {
            log_level: "WARN".into(),
            module_levels: vec![("parley_engine".into(), "DEBUG".into())],
            ..Default::default()
        };
        assert_eq!(config.filter_directive(), "warn,parley_engine=debug");
    }

    #[test]
    fn default_keeps_sqlite_off() {
        let config = TelemetryConfig::default();
        assert!(!config.log_to_sqlite);
        assert!(config.log_db_path.ends_with(".parley/logs.db"));
    }

    #[test]
    fn init_exposes_sink() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init_telemetry(TelemetryConfig {
            log_to_sqlite: true,
            log_db_path: dir.path().join("logs.db"),
            ..Default::default()
        });
        let sink = guard.logs().unwrap();
        assert!(sink.count().unwrap() >= 0);
    }
}

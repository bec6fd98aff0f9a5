use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// On-disk locations. Relative paths resolve against the data directory
/// (`~/.parley` unless `PARLEY_DATA_DIR` is set).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub database_path: String,
    pub titles_path: String,
    /// Maximum pooled SQLite connections.
    pub pool_size: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: "checkpoints.db".to_string(),
            titles_path: "chat_titles.json".to_string(),
            pool_size: 8,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Per-target levels layered over `level`, e.g. `{"parley_engine": "debug"}`.
    pub modules: BTreeMap<String, String>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Persist warn+ events to `logsDbPath`.
    pub sqlite_sink: bool,
    pub logs_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: BTreeMap::new(),
            json: false,
            sqlite_sink: false,
            logs_db_path: "logs.db".to_string(),
        }
    }
}

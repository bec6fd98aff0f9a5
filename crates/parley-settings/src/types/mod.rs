//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. `#[serde(default)]` on every struct
//! lets a settings file name only the fields it changes.

mod runtime;
mod storage;

pub use runtime::*;
pub use storage::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "graph": { "maxToolRounds": 5 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Settings schema version.
    pub version: String,
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub graph: GraphSettings,
    pub tools: ToolSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl Default for ParleySettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            model: ModelSettings::default(),
            graph: GraphSettings::default(),
            tools: ToolSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// HTTP server bind address.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Model selection and generation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    /// Provider backend. `gemini` is the only networked one.
    pub provider: String,
    /// Model used for conversation turns.
    pub model: String,
    /// Model used to title new threads.
    pub title_model: String,
    /// API base URL override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.5-flash".to_string(),
            title_model: "gemini-2.5-flash".to_string(),
            base_url: None,
            temperature: 0.0,
            max_output_tokens: None,
            system_prompt: None,
        }
    }
}

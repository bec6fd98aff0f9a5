use serde::{Deserialize, Serialize};

/// Router loop limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphSettings {
    /// Tool rounds allowed per turn. `None` removes the cap
    /// (`PARLEY_MAX_TOOL_ROUNDS=none`).
    pub max_tool_rounds: Option<u32>,
    /// Per-call tool deadline in milliseconds.
    pub tool_timeout_ms: u64,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: Some(10),
            tool_timeout_ms: 30_000,
        }
    }
}

/// External endpoints used by the built-in tools.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSettings {
    pub stock_base_url: String,
    pub search_base_url: String,
    pub max_search_results: usize,
    pub http_timeout_ms: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            stock_base_url: "https://www.alphavantage.co/query".to_string(),
            search_base_url: "https://api.duckduckgo.com/".to_string(),
            max_search_results: 5,
            http_timeout_ms: 15_000,
        }
    }
}

//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `PARLEY_*` environment overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ParleySettings;

/// Overrides the settings file location.
pub const SETTINGS_PATH_ENV: &str = "PARLEY_SETTINGS";
/// Overrides the data directory (`~/.parley`).
pub const DATA_DIR_ENV: &str = "PARLEY_DATA_DIR";

/// Root directory for settings, the checkpoint database and titles.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = read_env_string(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parley")
}

/// Resolve a configured path: absolute paths pass through, relative ones
/// land under [`data_dir`].
pub fn resolve_data_path(path: &str) -> PathBuf {
    resolve_under(&data_dir(), path)
}

/// [`resolve_data_path`] against an explicit base directory.
pub fn resolve_under(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

/// Resolve the path to the settings file (`~/.parley/settings.json`).
pub fn settings_path() -> PathBuf {
    read_env_string(SETTINGS_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir().join("settings.json"))
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or an invalid value, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject values that deserialize fine but cannot be used.
pub fn validate(settings: &ParleySettings) -> Result<()> {
    let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));
    if settings.graph.tool_timeout_ms == 0 {
        return invalid("graph.toolTimeoutMs must be positive");
    }
    if settings.graph.max_tool_rounds == Some(0) {
        return invalid("graph.maxToolRounds must be positive or null");
    }
    if settings.storage.pool_size == 0 {
        return invalid("storage.poolSize must be positive");
    }
    if settings.tools.http_timeout_ms == 0 {
        return invalid("tools.httpTimeoutMs must be positive");
    }
    if !(0.0..=2.0).contains(&settings.model.temperature) {
        return invalid("model.temperature must be within 0.0..=2.0");
    }
    if settings.model.model.trim().is_empty() {
        return invalid("model.model must not be empty");
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Each env var has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (fall back to file/default)
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("PARLEY_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Model ───────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_MODEL") {
        settings.model.model = v;
    }
    if let Some(v) = read_env_string("PARLEY_TITLE_MODEL") {
        settings.model.title_model = v;
    }
    if let Some(v) = read_env_string("PARLEY_MODEL_BASE_URL") {
        settings.model.base_url = Some(v);
    }

    // ── Graph ───────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_MAX_TOOL_ROUNDS") {
        if v.eq_ignore_ascii_case("none") {
            settings.graph.max_tool_rounds = None;
        } else if let Some(n) = parse_u64_range(&v, 1, 1_000) {
            settings.graph.max_tool_rounds = u32::try_from(n).ok();
        } else {
            tracing::warn!(key = "PARLEY_MAX_TOOL_ROUNDS", value = %v, "invalid tool round cap, ignoring");
        }
    }
    if let Some(v) = read_env_u64("PARLEY_TOOL_TIMEOUT_MS", 100, 600_000) {
        settings.graph.tool_timeout_ms = v;
    }

    // ── Tools ───────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_STOCK_URL") {
        settings.tools.stock_base_url = v;
    }
    if let Some(v) = read_env_string("PARLEY_SEARCH_URL") {
        settings.tools.search_base_url = v;
    }
    if let Some(v) = read_env_usize("PARLEY_MAX_SEARCH_RESULTS", 1, 50) {
        settings.tools.max_search_results = v;
    }

    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_DB_PATH") {
        settings.storage.database_path = v;
    }
    if let Some(v) = read_env_string("PARLEY_TITLES_PATH") {
        settings.storage.titles_path = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("PARLEY_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = read_env_bool("PARLEY_LOG_SQLITE") {
        settings.logging.sqlite_sink = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

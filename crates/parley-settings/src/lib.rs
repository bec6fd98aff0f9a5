//! # parley-settings
//!
//! Layered configuration for the parley chat engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ParleySettings::default()`]
//! 2. **User file**: `~/.parley/settings.json` (deep-merged over defaults,
//!    location overridable with `PARLEY_SETTINGS`)
//! 3. **Environment variables**: `PARLEY_*` overrides (highest priority)
//!
//! API keys are kept out of the file and read separately via [`ApiKeys`].
//!
//! # Usage
//!
//! ```no_run
//! use parley_settings::{get_settings, ParleySettings};
//!
//! let settings = get_settings();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod keys;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use keys::ApiKeys;
pub use loader::{
    data_dir, deep_merge, load_settings, load_settings_from_path, resolve_data_path, settings_path,
};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
///
/// Initialized on first access via [`get_settings`], or explicitly by the
/// binary through [`init_settings`] so that load errors can be reported.
static SETTINGS: OnceLock<ParleySettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings with env var overrides. If loading fails,
/// returns compiled defaults.
pub fn get_settings() -> &'static ParleySettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: ParleySettings) -> std::result::Result<(), ParleySettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = ParleySettings::default();
        let _path = settings_path();
        let _keys = ApiKeys::default();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = ParleySettings::default();
        assert_eq!(settings.version, "0.1.0");
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.model.provider, "gemini");
        assert_eq!(settings.tools.http_timeout_ms, 15_000);
        assert_eq!(settings.storage.titles_path, "chat_titles.json");
        assert_eq!(settings.storage.pool_size, 8);
        assert!(!settings.logging.sqlite_sink);
    }

    #[test]
    fn get_settings_is_stable() {
        let a = get_settings() as *const ParleySettings;
        let b = get_settings() as *const ParleySettings;
        assert_eq!(a, b);
    }
}

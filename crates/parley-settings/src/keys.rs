//! API credentials.
//!
//! Keys never live in `settings.json`; they are read from the environment
//! and wrapped in [`SecretString`] so they stay out of `Debug` output.

use secrecy::SecretString;

/// Primary Gemini key variable.
pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
/// Fallback accepted by Google's own tooling.
pub const GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";
pub const ALPHAVANTAGE_API_KEY: &str = "ALPHAVANTAGE_API_KEY";

#[derive(Clone, Debug, Default)]
pub struct ApiKeys {
    pub gemini: Option<SecretString>,
    pub alphavantage: Option<SecretString>,
}

impl ApiKeys {
    /// Read keys from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read keys through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            gemini: read(GEMINI_API_KEY)
                .or_else(|| read(GOOGLE_API_KEY))
                .map(SecretString::from),
            alphavantage: read(ALPHAVANTAGE_API_KEY).map(SecretString::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn gemini_key_preferred_over_google() {
        let keys = ApiKeys::from_lookup(lookup(&[(GEMINI_API_KEY, "g1"), (GOOGLE_API_KEY, "g2")]));
        assert_eq!(keys.gemini.unwrap().expose_secret(), "g1");
    }

    #[test]
    fn google_key_fallback() {
        let keys = ApiKeys::from_lookup(lookup(&[(GEMINI_API_KEY, "  "), (GOOGLE_API_KEY, "g2")]));
        assert_eq!(keys.gemini.unwrap().expose_secret(), "g2");
    }

    #[test]
    fn missing_keys() {
        let keys = ApiKeys::from_lookup(lookup(&[]));
        assert!(keys.gemini.is_none());
        assert!(keys.alphavantage.is_none());
    }

    #[test]
    fn alphavantage_key() {
        let keys = ApiKeys::from_lookup(lookup(&[(ALPHAVANTAGE_API_KEY, "demo")]));
        assert_eq!(keys.alphavantage.unwrap().expose_secret(), "demo");
    }

    #[test]
    fn debug_redacts() {
        let keys = ApiKeys::from_lookup(lookup(&[(GEMINI_API_KEY, "super-secret")]));
        assert!(!format!("{keys:?}").contains("super-secret"));
    }
}

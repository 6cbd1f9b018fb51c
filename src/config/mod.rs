//! Application configuration management

use std::env;

use anyhow::{Context, Result};
use url::Url;

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Data service base URL (e.g. https://xyz.supabase.co)
    pub supabase_url: String,

    /// API key sent as `apikey` and bearer token.
    /// Service role key when set, anonymous key otherwise.
    pub api_key: String,

    /// Optional schema profile (defaults to the service's `public`)
    pub schema: Option<String>,

    /// tracing filter directive used when RUST_LOG is unset
    pub log_filter: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let supabase_url = lookup("SUPABASE_URL").context("SUPABASE_URL is required")?;
        Url::parse(&supabase_url).context("Invalid SUPABASE_URL")?;

        let api_key = lookup("SUPABASE_SERVICE_KEY")
            .or_else(|| lookup("SUPABASE_ANON_KEY"))
            .context("SUPABASE_SERVICE_KEY or SUPABASE_ANON_KEY is required")?;

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            api_key,
            schema: lookup("SUPABASE_SCHEMA").filter(|s| !s.is_empty()),
            log_filter: lookup("LOG_FILTER").unwrap_or_else(|| "crm_data=info".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_service_key_preferred_over_anon() {
        let config = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://crm.example.com/"),
            ("SUPABASE_SERVICE_KEY", "service"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]))
        .unwrap();
        assert_eq!(config.api_key, "service");
        assert_eq!(config.supabase_url, "https://crm.example.com");
        assert_eq!(config.log_filter, "crm_data=info");
        assert!(config.schema.is_none());
    }

    #[test]
    fn test_anon_key_fallback() {
        let config = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://crm.example.com"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_SCHEMA", "erp"),
        ]))
        .unwrap();
        assert_eq!(config.api_key, "anon");
        assert_eq!(config.schema.as_deref(), Some("erp"));
    }

    #[test]
    fn test_missing_or_invalid_url() {
        assert!(Config::from_lookup(lookup(&[("SUPABASE_ANON_KEY", "anon")])).is_err());
        assert!(
            Config::from_lookup(lookup(&[
                ("SUPABASE_URL", "not a url"),
                ("SUPABASE_ANON_KEY", "anon"),
            ]))
            .is_err()
        );
    }
}

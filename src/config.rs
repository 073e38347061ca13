//! Runtime configuration read from the environment (after `.env`).

use crate::error::{AnalyticsError, Result};
use crate::llm::{DEFAULT_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_TIMEOUT_SECS};
use crate::sources::SourceRegistry;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Project root that source paths are relative to
    pub root: PathBuf,

    /// Optional JSON catalog replacing the builtin sources
    pub catalog_path: Option<PathBuf>,

    pub ollama_url: String,
    pub ollama_model: String,

    /// Upper bound on one text-generation round trip
    pub generation_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            catalog_path: None,
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            ollama_model: DEFAULT_MODEL.to_string(),
            generation_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl AppConfig {
    /// Read `NL_ANALYTICS_ROOT`, `NL_ANALYTICS_CATALOG`, `OLLAMA_URL`,
    /// `OLLAMA_MODEL` and `OLLAMA_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let generation_timeout = match lookup("OLLAMA_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    AnalyticsError::Config(format!(
                        "OLLAMA_TIMEOUT_SECS must be a whole number, got '{}'",
                        raw
                    ))
                })?;
                if secs == 0 {
                    return Err(AnalyticsError::Config(
                        "OLLAMA_TIMEOUT_SECS must be greater than zero".to_string(),
                    ));
                }
                Duration::from_secs(secs)
            }
            None => defaults.generation_timeout,
        };

        Ok(Self {
            root: lookup("NL_ANALYTICS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.root),
            catalog_path: lookup("NL_ANALYTICS_CATALOG").map(PathBuf::from),
            ollama_url: lookup("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            ollama_model: lookup("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            generation_timeout,
        })
    }

    /// Build the source catalog this configuration points at.
    pub fn load_registry(&self) -> Result<SourceRegistry> {
        match &self.catalog_path {
            Some(path) => SourceRegistry::from_json_file(path, &self.root),
            None => SourceRegistry::builtin(&self.root),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.generation_timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("NL_ANALYTICS_ROOT", "/srv/app"),
            ("OLLAMA_URL", "http://gpu-box:11434"),
            ("OLLAMA_MODEL", "llama3"),
            ("OLLAMA_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/app"));
        assert_eq!(config.ollama_url, "http://gpu-box:11434");
        assert_eq!(config.ollama_model, "llama3");
        assert_eq!(config.generation_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_bad_timeout_is_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("OLLAMA_TIMEOUT_SECS", "soon")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("OLLAMA_TIMEOUT_SECS", "0")])).is_err());
    }

    #[test]
    fn test_builtin_registry_without_catalog() {
        let config = AppConfig::from_lookup(lookup(&[("NL_ANALYTICS_ROOT", "/srv/app")])).unwrap();
        let registry = config.load_registry().unwrap();
        assert_eq!(registry.get_source_ids(), vec!["sales", "events"]);
    }
}

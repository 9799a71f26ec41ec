//! Runtime configuration.
//!
//! Settings come from `<config dir>/knowledge-sync/config.json` (missing or
//! unparseable files fall back to defaults), then environment variables,
//! then command-line flags.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::walker::{FilesystemWalker, DEFAULT_EXCLUDES, DEFAULT_MAX_FILE_BYTES};

const APP_NAME: &str = "knowledge-sync";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. Defaults to the platform data directory.
    pub database_path: Option<PathBuf>,
    /// Directory-name glob patterns skipped while walking a project.
    pub exclude: Vec<String>,
    /// Files larger than this are treated as unreadable.
    pub max_file_bytes: u64,
    /// Port for `ksync serve`.
    pub port: u16,
    /// Bearer token required by the HTTP API. Disabled when unset.
    pub api_key: Option<String>,
    /// Allowed CORS origins for the HTTP API. Permissive when unset.
    pub cors_origins: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            exclude: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            port: 3000,
            api_key: None,
            cors_origins: None,
        }
    }
}

impl Config {
    /// Load the config file and apply environment overrides.
    pub fn load() -> Self {
        let mut config = match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn try_load() -> Result<Self> {
        let config_path = get_config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config = serde_json::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Overlay `KSYNC_*` variables read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("KSYNC_DB_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(port) = var("KSYNC_PORT").and_then(|s| s.parse().ok()) {
            self.port = port;
        }
        if let Some(limit) = var("KSYNC_MAX_FILE_BYTES").and_then(|s| s.parse().ok()) {
            self.max_file_bytes = limit;
        }
        if let Some(exclude) = var("KSYNC_EXCLUDE") {
            self.exclude = split_list(&exclude);
        }
        if let Some(key) = var("KSYNC_API_KEY").filter(|k| !k.is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(origins) = var("KSYNC_CORS_ORIGINS") {
            self.cors_origins = Some(split_list(&origins));
        }
    }

    /// A walker using this config's exclusions plus `extra`.
    pub fn walker(&self, extra: &[String]) -> Result<FilesystemWalker> {
        let patterns = self.exclude.iter().chain(extra.iter());
        FilesystemWalker::new(patterns, self.max_file_bytes).context("Invalid exclude pattern")
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => crate::db::default_path(),
        }
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_exclude_dependency_directories() {
        let config = Config::default();
        assert!(config.exclude.iter().any(|p| p == "node_modules"));
        assert_eq!(config.port, 3000);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("KSYNC_PORT", "8080"),
            ("KSYNC_EXCLUDE", "vendor, .cache"),
            ("KSYNC_API_KEY", "secret"),
            ("KSYNC_DB_PATH", "/tmp/ks.db"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.port, 8080);
        assert_eq!(config.exclude, vec!["vendor", ".cache"]);
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/ks.db")));
    }

    #[test]
    fn unparseable_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env(|k| (k == "KSYNC_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn partial_config_files_fill_in_defaults() {
        let config: Config = serde_json::from_str(r#"{ "port": 4000 }"#).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.max_file_bytes, DEFAULT_MAX_FILE_BYTES);
    }

    #[test]
    fn walker_combines_config_and_extra_patterns() {
        let config = Config {
            exclude: vec!["vendor".into()],
            ..Config::default()
        };
        let walker = config.walker(&["generated".to_string()]).unwrap();
        assert_eq!(walker.patterns(), ["vendor", "generated"]);
    }
}

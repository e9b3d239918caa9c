//! Provider configuration.
//!
//! Precedence: CLI > env > config file > defaults. The binary applies CLI flags on top of
//! [`ProviderConfig::load`].

use crate::errors::ProviderError;
use crate::query::DEFAULT_PRIMARY_KEY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_LIST_PREFIX: &str = "search";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const CONFIG_FILE_NAME: &str = "search-provider.toml";

pub const ENV_PREFIX: &str = "SEARCH_PROVIDER_PREFIX";
pub const ENV_PRIMARY_KEY: &str = "SEARCH_PROVIDER_PRIMARY_KEY";
pub const ENV_LOG_LEVEL: &str = "SEARCH_PROVIDER_LOG_LEVEL";
pub const ENV_CONFIG: &str = "SEARCH_PROVIDER_CONFIG";

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Lists whose names start with this prefix followed by `?` are treated as searches.
    pub list_prefix: String,
    /// Field projected from matching records and published as list entries.
    pub primary_key: String,
    pub log_level: String,
    /// Rolling log files go here; `None` logs to the console.
    pub log_dir: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            list_prefix: DEFAULT_LIST_PREFIX.to_string(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_dir: None,
        }
    }
}

/// Partial config as read from a TOML file; absent keys keep the lower layer's value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    list_prefix: Option<String>,
    primary_key: Option<String>,
    log_level: Option<String>,
    log_dir: Option<PathBuf>,
}

impl ProviderConfig {
    /// Defaults, then the first config file found, then environment variables.
    ///
    /// The file is `explicit` if given, else `$SEARCH_PROVIDER_CONFIG`, else
    /// `./search-provider.toml` when it exists.
    ///
    /// # Errors
    /// Fails if an explicitly named file is missing, a file is not valid TOML, or the
    /// result does not validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ProviderError> {
        let mut cfg = Self::default();
        if let Some(path) = Self::config_path(explicit) {
            cfg.merge_file(&path)?;
        }
        cfg.apply_env(|k| std::env::var(k).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = explicit {
            return Some(p.to_path_buf());
        }
        if let Ok(p) = std::env::var(ENV_CONFIG) {
            return Some(PathBuf::from(p));
        }
        let local = std::env::current_dir().ok()?.join(CONFIG_FILE_NAME);
        local.exists().then_some(local)
    }

    /// Overlays the keys present in the TOML file at `path`.
    ///
    /// # Errors
    /// I/O and TOML errors are returned as-is.
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ProviderError> {
        let text = std::fs::read_to_string(path)?;
        self.merge_toml(&text)
    }

    /// # Errors
    /// Returns [`ProviderError::Toml`] on malformed input or unknown keys.
    pub fn merge_toml(&mut self, text: &str) -> Result<(), ProviderError> {
        let file: FileConfig = toml::from_str(text)?;
        if let Some(v) = file.list_prefix {
            self.list_prefix = v;
        }
        if let Some(v) = file.primary_key {
            self.primary_key = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
        if file.log_dir.is_some() {
            self.log_dir = file.log_dir;
        }
        Ok(())
    }

    /// Overlays environment values. `lookup` is `std::env::var` outside of tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_PREFIX) {
            self.list_prefix = v;
        }
        if let Some(v) = lookup(ENV_PRIMARY_KEY) {
            self.primary_key = v;
        }
        if let Some(v) = lookup(ENV_LOG_LEVEL) {
            self.log_level = v;
        }
    }

    /// # Errors
    /// [`ProviderError::Config`] for an empty prefix or primary key, or an unknown log level.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.list_prefix.is_empty() {
            return Err(ProviderError::Config("list_prefix must not be empty".into()));
        }
        if self.primary_key.is_empty() {
            return Err(ProviderError::Config("primary_key must not be empty".into()));
        }
        let level = self.log_level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ProviderError::Config(format!("unknown log level {}", self.log_level)));
        }
        Ok(())
    }

    /// Regular expression matching subscription names handled by this provider.
    pub fn listen_pattern(&self) -> String {
        listen_pattern(&self.list_prefix)
    }
}

/// `^<prefix>[?].*`, with the prefix escaped.
pub fn listen_pattern(prefix: &str) -> String {
    format!("^{}[\\?].*", regex::escape(prefix))
}

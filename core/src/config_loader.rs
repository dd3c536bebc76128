//! Layered configuration loader.
//!
//! Precedence, later layers overriding earlier ones:
//! 1. Defaults ([`VizConfig::default`])
//! 2. `config.toml` in `$VIZSTREAM_HOME` (default `~/.vizstream`)
//! 3. Environment overrides (`VIZSTREAM_*`)
//!
//! ```no_run
//! use vizstream_core::config_loader::ConfigLoader;
//!
//! let config = ConfigLoader::new().load().expect("config");
//! println!("{}", config.endpoint());
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::reducer::ReduceOptions;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_STREAM_PATH: &str = "/debug/stream";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("I/O error loading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid value for ${var}: '{value}' (expected: {expected})")]
    InvalidEnvValue {
        var: String,
        value: String,
        expected: String,
    },

    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VizConfig {
    /// Backend origin, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
    /// Path of the streaming debug endpoint.
    pub stream_path: String,
    pub connect_timeout_secs: Option<u64>,
    /// Capacity of the pump → reducer event channel.
    pub channel_capacity: usize,
    pub merge_unknown_stages: bool,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    /// Unrecognized keys from `config.toml`.
    pub extra: BTreeMap<String, toml::Value>,
}

impl Default for VizConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            connect_timeout_secs: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            merge_unknown_stages: false,
            log_filter: None,
            extra: BTreeMap::new(),
        }
    }
}

impl VizConfig {
    /// Full URL of the streaming endpoint.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.stream_path.trim_start_matches('/')
        )
    }

    pub fn reduce_options(&self) -> ReduceOptions {
        ReduceOptions {
            merge_unknown_stages: self.merge_unknown_stages,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigLoadError::Validation(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigLoadError::Validation(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// File layer: every field optional so it only overrides what it names.
#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    base_url: Option<String>,
    stream_path: Option<String>,
    connect_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
    merge_unknown_stages: Option<bool>,
    log_filter: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, toml::Value>,
}

/// Builder for layered configuration loading.
pub struct ConfigLoader {
    home: Option<PathBuf>,
    env_prefix: String,
    skip_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    /// Loader with both file and environment layers enabled and prefix
    /// `VIZSTREAM`.
    pub fn new() -> Self {
        Self {
            home: None,
            env_prefix: "VIZSTREAM".to_string(),
            skip_file: false,
            skip_env: false,
        }
    }

    /// Directory holding `config.toml`. Defaults to `$VIZSTREAM_HOME`, then
    /// `~/.vizstream`.
    pub fn with_home(mut self, path: PathBuf) -> Self {
        self.home = Some(path);
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn skip_file_layer(mut self) -> Self {
        self.skip_file = true;
        self
    }

    pub fn skip_env_layer(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Loads and validates the merged configuration.
    pub fn load(self) -> Result<VizConfig, ConfigLoadError> {
        let mut config = VizConfig::default();

        if !self.skip_file {
            let home = self.resolve_home()?;
            let file = Self::load_from_file(&home)?;
            Self::merge_file_layer(&mut config, file);
        }

        if !self.skip_env {
            Self::apply_env_overrides(&mut config, &self.env_prefix)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn resolve_home(&self) -> Result<PathBuf, ConfigLoadError> {
        if let Some(ref path) = self.home {
            return Ok(path.clone());
        }
        if let Ok(path) = env::var("VIZSTREAM_HOME")
            && !path.trim().is_empty()
        {
            return Ok(PathBuf::from(path));
        }
        dirs::home_dir()
            .map(|home| home.join(".vizstream"))
            .ok_or_else(|| {
                ConfigLoadError::Validation("Cannot determine home directory".to_string())
            })
    }

    /// Reads `config.toml` from `home`. A missing file is an empty layer.
    fn load_from_file(home: &Path) -> Result<ConfigToml, ConfigLoadError> {
        let config_path = home.join(CONFIG_FILE_NAME);
        let contents = match std::fs::read_to_string(&config_path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("{} not found, using defaults", config_path.display());
                return Ok(ConfigToml::default());
            }
            Err(e) => return Err(ConfigLoadError::Io(e)),
        };
        Ok(toml::from_str(&contents)?)
    }

    fn merge_file_layer(config: &mut VizConfig, file: ConfigToml) {
        if let Some(base_url) = file.base_url {
            config.base_url = base_url;
        }
        if let Some(stream_path) = file.stream_path {
            config.stream_path = stream_path;
        }
        if file.connect_timeout_secs.is_some() {
            config.connect_timeout_secs = file.connect_timeout_secs;
        }
        if let Some(capacity) = file.channel_capacity {
            config.channel_capacity = capacity;
        }
        if let Some(merge) = file.merge_unknown_stages {
            config.merge_unknown_stages = merge;
        }
        if file.log_filter.is_some() {
            config.log_filter = file.log_filter;
        }
        config.extra.extend(file.extra);
    }

    /// Applies `{PREFIX}_BASE_URL`, `{PREFIX}_STREAM_PATH`,
    /// `{PREFIX}_TIMEOUT_SECS` and `{PREFIX}_MERGE_UNKNOWN_STAGES`.
    pub fn apply_env_overrides(config: &mut VizConfig, prefix: &str) -> Result<(), ConfigLoadError> {
        if let Some(value) = non_empty_var(&format!("{prefix}_BASE_URL")) {
            config.base_url = value;
        }

        if let Some(value) = non_empty_var(&format!("{prefix}_STREAM_PATH")) {
            config.stream_path = value;
        }

        let timeout_var = format!("{prefix}_TIMEOUT_SECS");
        if let Some(value) = non_empty_var(&timeout_var) {
            let secs = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigLoadError::InvalidEnvValue {
                    var: timeout_var,
                    value: value.clone(),
                    expected: "a whole number of seconds".to_string(),
                })?;
            config.connect_timeout_secs = Some(secs);
        }

        let merge_var = format!("{prefix}_MERGE_UNKNOWN_STAGES");
        if let Some(value) = non_empty_var(&merge_var) {
            config.merge_unknown_stages = match value.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => {
                    return Err(ConfigLoadError::InvalidEnvValue {
                        var: merge_var,
                        value,
                        expected: "true/false, 1/0, yes/no, on/off".to_string(),
                    });
                }
            };
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            tracing::debug!("Applying env override: {name}={value}");
            Some(value)
        }
        _ => None,
    }
}

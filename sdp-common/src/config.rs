//! Pipeline configuration loading
//!
//! Every stage receives a [`PipelineConfig`] (or the section it needs) at
//! construction; nothing reads ambient global state after startup.
//!
//! Resolution priority:
//! 1. Command-line flags (applied by the binary after loading)
//! 2. Environment variables (`SDP_*`)
//! 3. TOML config file
//! 4. Compiled defaults (fallback)
//!
//! A missing TOML file is not an error: the loader logs a warning and
//! continues with defaults.

use crate::retry::RetryPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SDP_CONFIG";

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub events: EventsConfig,
    pub model: ModelConfig,
    pub notification: NotificationConfig,
    pub retry: RetryPolicy,
    pub results: ResultsConfig,
    pub logging: LoggingConfig,
}

/// Object store locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the filesystem object store
    pub root: PathBuf,
    /// Prefix under which raw batch files arrive
    pub input_prefix: String,
    /// Prefix for valid-record partitions
    pub valid_prefix: String,
    /// Prefix for rejected-record partitions
    pub invalid_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_data_folder().join("objects"),
            input_prefix: "input/".to_string(),
            valid_prefix: "processed/".to_string(),
            invalid_prefix: "rejected/".to_string(),
        }
    }
}

/// Result store database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// SQLite busy timeout
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_folder().join("sdp.db"),
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// `source` attribute stamped on published envelopes
    pub source: String,
    pub bus_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            source: crate::events::EVENT_SOURCE.to_string(),
            bus_capacity: 100,
        }
    }
}

/// External generative model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Invocation endpoint (POST)
    pub endpoint: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    /// Per-call timeout; expiry counts as a transient failure
    pub timeout_secs: u64,
    /// Upper bound on records serialized into one prompt
    pub max_prompt_records: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/model/invoke".to_string(),
            model_id: "amazon.nova-lite-v1:0".to_string(),
            api_key: None,
            max_tokens: 1000,
            temperature: 0.7,
            top_p: 0.9,
            timeout_secs: 60,
            max_prompt_records: 1000,
        }
    }
}

/// Notification delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Pre-verified sender identity
    pub from_address: String,
    /// Fixed recipient
    pub to_address: String,
    pub subject_prefix: String,
    /// Deliver through an HTTP webhook when set
    pub webhook_url: Option<String>,
    /// Otherwise write rendered messages into this directory
    pub outbox_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            from_address: "pipeline@localhost".to_string(),
            to_address: "analyst@localhost".to_string(),
            subject_prefix: "Data Analysis Report".to_string(),
            webhook_url: None,
            outbox_dir: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Analysis Results expire this many days after creation
    pub ttl_days: i64,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self { ttl_days: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration: TOML file (if any) then environment overrides.
    ///
    /// `explicit_path` comes from the command line; when given, the file
    /// must exist. Otherwise `SDP_CONFIG` and the platform config directory
    /// are tried and absence falls back to defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_file(explicit_path)? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_toml_file(&path)?
            }
            None => {
                warn!("No configuration file found, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse TOML text; sections and keys left out keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply `SDP_*` environment variables on top of the current values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(root) = env_string("SDP_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(path) = env_string("SDP_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(source) = env_string("SDP_EVENT_SOURCE") {
            self.events.source = source;
        }
        if let Some(endpoint) = env_string("SDP_MODEL_ENDPOINT") {
            self.model.endpoint = endpoint;
        }
        if let Some(model_id) = env_string("SDP_MODEL_ID") {
            self.model.model_id = model_id;
        }
        if let Some(api_key) = env_string("SDP_MODEL_API_KEY") {
            self.model.api_key = Some(api_key);
        }
        if let Some(max_tokens) = env_parsed::<u32>("SDP_MODEL_MAX_TOKENS")? {
            self.model.max_tokens = max_tokens;
        }
        if let Some(from) = env_string("SDP_FROM_EMAIL") {
            self.notification.from_address = from;
        }
        if let Some(to) = env_string("SDP_TO_EMAIL") {
            self.notification.to_address = to;
        }
        if let Some(url) = env_string("SDP_WEBHOOK_URL") {
            self.notification.webhook_url = Some(url);
        }
        if let Some(dir) = env_string("SDP_OUTBOX_DIR") {
            self.notification.outbox_dir = Some(PathBuf::from(dir));
        }
        if let Some(attempts) = env_parsed::<u32>("SDP_RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = attempts;
        }
        if let Some(ttl_days) = env_parsed::<i64>("SDP_RESULT_TTL_DAYS")? {
            self.results.ttl_days = ttl_days;
        }
        if let Some(level) = env_string("SDP_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Reject settings no stage can work with
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config("retry.base_delay_ms exceeds retry.max_delay_ms".into()));
        }
        for (name, prefix) in [
            ("storage.input_prefix", &self.storage.input_prefix),
            ("storage.valid_prefix", &self.storage.valid_prefix),
            ("storage.invalid_prefix", &self.storage.invalid_prefix),
        ] {
            if prefix.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", name)));
            }
        }
        if self.storage.valid_prefix == self.storage.invalid_prefix {
            return Err(Error::Config("valid and invalid prefixes must differ".into()));
        }
        if self.results.ttl_days <= 0 {
            return Err(Error::Config("results.ttl_days must be positive".into()));
        }
        if self.model.max_prompt_records == 0 {
            return Err(Error::Config("model.max_prompt_records must be positive".into()));
        }
        Ok(())
    }
}

/// Pick the config file to read, if any
fn resolve_config_file(explicit_path: Option<&Path>) -> Result<Option<PathBuf>> {
    // Priority 1: command-line argument
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(Error::Config(format!("Config file not found: {}", path.display())));
    }

    // Priority 2: environment variable
    if let Some(path) = env_string(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(Some(path));
        }
        warn!("{} points to missing file {}", CONFIG_ENV_VAR, path.display());
    }

    // Priority 3: platform config directory
    Ok(dirs::config_dir()
        .map(|d| d.join("sdp").join("pipeline.toml"))
        .filter(|p| p.exists()))
}

/// OS-dependent default data folder
fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("sdp"))
        .unwrap_or_else(|| PathBuf::from("./sdp_data"))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} is not a valid number: {}", name, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.storage.input_prefix, "input/");
        assert_eq!(config.results.ttl_days, 30);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [model]
            model_id = "test-model"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.model.model_id, "test-model");
        assert_eq!(config.model.max_tokens, 1000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = PipelineConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_shared_output_prefix() {
        let mut config = PipelineConfig::default();
        config.storage.invalid_prefix = config.storage.valid_prefix.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let result = PipelineConfig::from_toml_str("[retry\nmax_attempts = ");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

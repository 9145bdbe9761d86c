use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use appunture_core::{EngineSettings, RetryPolicy};

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// REST backend settings
#[derive(Debug, Clone, Serialize)]
pub struct ApiConfig {
    /// Base URL of the REST API, e.g. "http://localhost:3000/api"
    pub base_url: ConfigValue<String>,
    /// Bearer token sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<ConfigValue<String>>,
}

/// Sync queue tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run a pass after every write command (default: true)
    pub auto_sync: bool,
    pub max_attempts: u32,
    pub image_max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Number of entities synced in parallel, clamped to 1..=16
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    /// Periodic pass interval for `sync watch`; 0 disables the tick
    pub tick_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            image_max_attempts: RetryPolicy::DEFAULT_IMAGE_MAX_ATTEMPTS,
            initial_backoff_ms: duration_ms(RetryPolicy::DEFAULT_INITIAL_DELAY),
            max_backoff_ms: duration_ms(RetryPolicy::DEFAULT_MAX_DELAY),
            concurrency: EngineSettings::DEFAULT_CONCURRENCY,
            request_timeout_secs: EngineSettings::DEFAULT_ATTEMPT_TIMEOUT.as_secs(),
            tick_interval_secs: 60,
        }
    }
}

impl SyncConfig {
    /// Engine settings derived from this section.
    pub fn engine_settings(&self) -> EngineSettings {
        let initial = Duration::from_millis(self.initial_backoff_ms);
        let max = Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms));
        EngineSettings {
            operation_policy: RetryPolicy::operations()
                .with_max_attempts(self.max_attempts)
                .with_delays(initial, max),
            image_policy: RetryPolicy::images()
                .with_max_attempts(self.image_max_attempts)
                .with_delays(initial, max),
            attempt_timeout: self.request_timeout(),
            ..EngineSettings::default()
        }
        .with_concurrency(self.concurrency)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn tick_interval(&self) -> Option<Duration> {
        match self.tick_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    pub api: ApiConfig,
    pub sync: SyncConfig,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ApiFile {
    base_url: Option<String>,
    token: Option<String>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    api: Option<ApiFile>,
    sync: Option<SyncConfig>,
}

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let default_db_path = Self::default_data_dir().join("appunture.db");

        let mut database_path = ConfigValue::new(default_db_path, ConfigSource::Default);
        let mut base_url = ConfigValue::new(DEFAULT_API_URL.to_string(), ConfigSource::Default);
        let mut token = None;
        let mut sync = SyncConfig::default();
        let mut config_file = None;

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Relative paths are resolved against the config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(api) = file_config.api {
                if let Some(url) = api.base_url {
                    base_url = ConfigValue::new(url, ConfigSource::File);
                }
                token = api.token.map(|t| ConfigValue::new(t, ConfigSource::File));
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
        }

        if let Ok(db_path) = std::env::var("APPUNTURE_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("APPUNTURE_API_URL") {
            base_url = ConfigValue::new(url, ConfigSource::Environment);
        }
        if let Ok(value) = std::env::var("APPUNTURE_API_TOKEN") {
            token = Some(ConfigValue::new(value, ConfigSource::Environment));
        }

        Ok(Self {
            database_path,
            api: ApiConfig { base_url, token },
            sync,
            config_file,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/appunture/
    /// - macOS: ~/Library/Application Support/appunture/
    /// - Windows: %APPDATA%/appunture/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("appunture")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/appunture/
    /// - macOS: ~/Library/Application Support/appunture/
    /// - Windows: %APPDATA%/appunture/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("appunture")
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }

    pub fn token(&self) -> Option<&str> {
        self.api.token.as_ref().map(|t| t.value.as_str())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

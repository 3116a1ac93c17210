//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name under which credentials are stored.
const KEYRING_SERVICE: &str = "relaybot";

/// Environment variable overriding `database.path`.
const DB_PATH_ENV: &str = "RELAYBOT_DB_PATH";

/// Connection-pool settings for the `SQLite` store.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the database file; created on first start.
    pub path: PathBuf,
    /// Number of read-only pools.
    #[serde(default = "default_pool_count")]
    pub read_pools: usize,
    /// Number of read-write pools.
    #[serde(default = "default_pool_count")]
    pub write_pools: usize,
    /// Connections each pool keeps open.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Upper bound on connections per pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Timeout for establishing a new connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Bounded wait for leasing a connection from a pool.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl DatabaseConfig {
    /// Settings for a database file with every pool tunable at its default.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_pools: default_pool_count(),
            write_pools: default_pool_count(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            connect_timeout_seconds: default_connect_timeout(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Acquire timeout as a [`Duration`].
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

fn default_pool_count() -> usize {
    3
}

fn default_min_connections() -> u32 {
    3
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

/// Thresholds and sampling cadence for the overload gate.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Seconds between background samples.
    #[serde(default = "default_monitor_interval")]
    pub interval_seconds: u64,
    /// CPU usage percentage above which dispatch pauses.
    #[serde(default = "default_threshold")]
    pub cpu_threshold: f32,
    /// Memory usage percentage above which dispatch pauses.
    #[serde(default = "default_threshold")]
    pub memory_threshold: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_monitor_interval(),
            cpu_threshold: default_threshold(),
            memory_threshold: default_threshold(),
        }
    }
}

impl MonitorConfig {
    /// Background sampling interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

fn default_monitor_interval() -> u64 {
    10
}

fn default_threshold() -> f32 {
    80.0
}

/// Dispatcher batch and pacing settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DispatcherConfig {
    /// Maximum items pulled (and processed concurrently) per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause while the host is overloaded.
    #[serde(default = "default_overload_backoff_ms")]
    pub overload_backoff_ms: u64,
    /// Pause when the queue was empty.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
    /// Worker threads dedicated to answer generation.
    #[serde(default = "default_generation_threads")]
    pub generation_threads: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            overload_backoff_ms: default_overload_backoff_ms(),
            idle_backoff_ms: default_idle_backoff_ms(),
            generation_threads: default_generation_threads(),
        }
    }
}

impl DispatcherConfig {
    /// Overload backoff as a [`Duration`].
    #[must_use]
    pub fn overload_backoff(&self) -> Duration {
        Duration::from_millis(self.overload_backoff_ms)
    }

    /// Idle backoff as a [`Duration`].
    #[must_use]
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_overload_backoff_ms() -> u64 {
    1_000
}

fn default_idle_backoff_ms() -> u64 {
    100
}

fn default_generation_threads() -> usize {
    // One more than the vCPU count the service was sized for.
    9
}

/// `WhatsApp` Cloud API settings.
///
/// Tokens are loaded at runtime via OS keychain or environment variables,
/// not from the TOML config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WhatsAppConfig {
    /// Graph API base URL, including the trailing slash.
    #[serde(default = "default_meta_endpoint")]
    pub endpoint: String,
    /// Business phone number id messages are sent from.
    pub phone_number_id: String,
    /// Bearer token for the Graph API (populated at runtime).
    #[serde(skip)]
    pub access_token: String,
    /// Shared secret for the webhook verification handshake (populated at runtime).
    #[serde(skip)]
    pub verify_token: String,
}

fn default_meta_endpoint() -> String {
    "https://graph.facebook.com/v20.0/".into()
}

/// Chat-completion settings for the answer generator.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OpenAiConfig {
    /// API base URL (without the `/chat/completions` suffix).
    #[serde(default = "default_openai_endpoint")]
    pub endpoint: String,
    /// Chat model name.
    #[serde(default = "default_openai_model")]
    pub model: String,
    /// System prompt prepended to every conversation.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Request timeout for a single completion.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// API key (populated at runtime).
    #[serde(skip)]
    pub api_key: String,
}

fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1".into()
}

fn default_openai_model() -> String {
    "gpt-4o".into()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant answering questions sent over WhatsApp. \
     Keep answers short and use the earlier conversation for context."
        .into()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_http_port() -> u16 {
    8080
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// HTTP port for the webhook listener.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Connection-pool settings.
    pub database: DatabaseConfig,
    /// Overload gate settings.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Dispatcher settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Outbound messaging settings.
    pub whatsapp: WhatsAppConfig,
    /// Answer generator settings.
    #[serde(default = "default_openai_config")]
    pub openai: OpenAiConfig,
}

fn default_openai_config() -> OpenAiConfig {
    OpenAiConfig {
        endpoint: default_openai_endpoint(),
        model: default_openai_model(),
        system_prompt: default_system_prompt(),
        request_timeout_seconds: default_request_timeout(),
        api_key: String::new(),
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides for non-secret settings.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = env::var(DB_PATH_ENV) {
            if !path.is_empty() {
                self.database.path = PathBuf::from(path);
            }
        }
    }

    /// Load API credentials from OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env vars provide
    /// a required credential.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.whatsapp.access_token =
            load_credential("whatsapp_access_token", "WHATSAPP_ACCESS_TOKEN").await?;
        self.whatsapp.verify_token =
            load_credential("whatsapp_verify_token", "WHATSAPP_VERIFY_TOKEN").await?;
        self.openai.api_key = load_credential("openai_api_key", "OPENAI_API_KEY").await?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let db = &self.database;
        if db.read_pools == 0 || db.write_pools == 0 {
            return Err(AppError::Config(
                "database.read_pools and database.write_pools must be greater than zero".into(),
            ));
        }
        if db.max_connections == 0 {
            return Err(AppError::Config(
                "database.max_connections must be greater than zero".into(),
            ));
        }
        if db.min_connections > db.max_connections {
            return Err(AppError::Config(
                "database.min_connections must not exceed database.max_connections".into(),
            ));
        }
        if db.acquire_timeout_ms == 0 {
            return Err(AppError::Config(
                "database.acquire_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.dispatcher.batch_size == 0 {
            return Err(AppError::Config(
                "dispatcher.batch_size must be greater than zero".into(),
            ));
        }
        if self.dispatcher.generation_threads == 0 {
            return Err(AppError::Config(
                "dispatcher.generation_threads must be greater than zero".into(),
            ));
        }

        for (name, value) in [
            ("monitor.cpu_threshold", self.monitor.cpu_threshold),
            ("monitor.memory_threshold", self.monitor.memory_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(AppError::Config(format!(
                    "{name} must be between 0 and 100"
                )));
            }
        }

        if self.whatsapp.phone_number_id.is_empty() {
            return Err(AppError::Config(
                "whatsapp.phone_number_id must not be empty".into(),
            ));
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}

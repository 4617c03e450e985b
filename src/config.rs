use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_STORE_URL: &str = "https://api.airtable.com";
pub const DEFAULT_METRICS_COLLECTION: &str = "Metrics";
pub const DEFAULT_EXECUTION_LOG_COLLECTION: &str = "Test Results";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
/// Outbound record store timeout used across the system.
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_BACKUP_CAPACITY: usize = 1000;

/// Record store connection settings.
#[derive(Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub base_id: String,
    /// Bearer token. `None` means every write degrades to queue-only.
    pub token: Option<String>,
    pub metrics_collection: String,
    pub execution_log_collection: String,
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

// The token must never reach a log line.
impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url)
            .field("base_id", &self.base_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("metrics_collection", &self.metrics_collection)
            .field("execution_log_collection", &self.execution_log_collection)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Backoff policy for replaying backup entries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub interval: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub bind_addr: SocketAddr,
    pub backup_capacity: usize,
    /// Opt-in on-disk journal for the backup queue. In-memory only when unset.
    pub backup_journal_path: Option<PathBuf>,
    pub retry: RetryConfig,
}

/// Optional TOML overlay, every key mirrors an env var.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    record_store_url: Option<String>,
    record_store_base_id: Option<String>,
    record_store_token: Option<String>,
    metrics_collection: Option<String>,
    execution_log_collection: Option<String>,
    bind_addr: Option<String>,
    store_timeout_secs: Option<u64>,
    backup_capacity: Option<usize>,
    backup_journal_path: Option<PathBuf>,
    retry_interval_secs: Option<u64>,
    retry_base_delay_secs: Option<u64>,
    retry_max_delay_secs: Option<u64>,
    retry_max_attempts: Option<u32>,
}

impl AppConfig {
    /// Load `.env`, then the optional `TELEMETRY_CONFIG` TOML file, then env overrides.
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let file = match std::env::var("TELEMETRY_CONFIG") {
            Ok(path) if !path.trim().is_empty() => load_file(Path::new(&path))?,
            _ => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AppError> {
        let string = |key: &str, from_file: Option<String>, default: &str| {
            env(key)
                .filter(|v| !v.trim().is_empty())
                .or(from_file)
                .unwrap_or_else(|| default.to_string())
        };

        let token = env("RECORD_STORE_TOKEN")
            .or(file.record_store_token)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let timeout_secs = parsed(&env, "STORE_TIMEOUT_SECS", file.store_timeout_secs)?
            .unwrap_or(DEFAULT_STORE_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(AppError::Configuration("STORE_TIMEOUT_SECS must be at least 1".into()));
        }

        let bind_raw = string("BIND_ADDR", file.bind_addr, DEFAULT_BIND_ADDR);
        let bind_addr = bind_raw.parse().map_err(|e| {
            AppError::Configuration(format!("BIND_ADDR '{}' is not a socket address: {}", bind_raw, e))
        })?;

        let backup_capacity = parsed(&env, "BACKUP_CAPACITY", file.backup_capacity)?
            .unwrap_or(DEFAULT_BACKUP_CAPACITY);
        if backup_capacity == 0 {
            return Err(AppError::Configuration("BACKUP_CAPACITY must be at least 1".into()));
        }

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            interval: parsed(&env, "RETRY_INTERVAL_SECS", file.retry_interval_secs)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            base_delay: parsed(&env, "RETRY_BASE_DELAY_SECS", file.retry_base_delay_secs)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.base_delay),
            max_delay: parsed(&env, "RETRY_MAX_DELAY_SECS", file.retry_max_delay_secs)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_delay),
            max_attempts: parsed(&env, "RETRY_MAX_ATTEMPTS", file.retry_max_attempts)?
                .unwrap_or(defaults.max_attempts),
        };
        if retry.interval.is_zero() {
            return Err(AppError::Configuration("RETRY_INTERVAL_SECS must be at least 1".into()));
        }

        let backup_journal_path = env("BACKUP_JOURNAL_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or(file.backup_journal_path);

        Ok(Self {
            store: StoreConfig {
                base_url: string("RECORD_STORE_URL", file.record_store_url, DEFAULT_STORE_URL)
                    .trim_end_matches('/')
                    .to_string(),
                base_id: string("RECORD_STORE_BASE_ID", file.record_store_base_id, ""),
                token,
                metrics_collection: string(
                    "METRICS_COLLECTION",
                    file.metrics_collection,
                    DEFAULT_METRICS_COLLECTION,
                ),
                execution_log_collection: string(
                    "EXECUTION_LOG_COLLECTION",
                    file.execution_log_collection,
                    DEFAULT_EXECUTION_LOG_COLLECTION,
                ),
                timeout: Duration::from_secs(timeout_secs),
            },
            bind_addr,
            backup_capacity,
            backup_journal_path,
            retry,
        })
    }
}

fn load_file(path: &Path) -> Result<FileConfig, AppError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AppError::Configuration(format!("cannot read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&raw).map_err(|e| {
        AppError::Configuration(format!("invalid config file {}: {}", path.display(), e))
    })
}

fn parsed<T: FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    from_file: Option<T>,
) -> Result<Option<T>, AppError>
where
    T::Err: std::fmt::Display,
{
    match env(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AppError::Configuration(format!("{} '{}' is invalid: {}", key, raw, e))),
        None => Ok(from_file),
    }
}

//! Runtime configuration, resolved once at startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::dataset::DatasetKind;
use crate::retry::RetryConfig;

pub const DEFAULT_COMPANY_URL: &str = "https://open.lixinger.com/api/hk/company";
pub const DEFAULT_FUNDAMENTAL_URL: &str =
    "https://open.lixinger.com/api/hk/company/fundamental/non_financial";
pub const DEFAULT_FS_URL: &str = "https://open.lixinger.com/api/hk/company/fs/non_financial";

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_INITIAL_RETRY_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_CACHE_EXPIRE_DAYS: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const DIRECTORY_CACHE_FILE: &str = "hk_stocks_cache.json";
const FILTER_CONFIG_FILE: &str = "filter_config.json";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenerConfig {
    pub token: String,
    pub fundamental_url: String,
    pub fs_url: String,
    pub company_url: String,
    pub home_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub batch_size: usize,
    pub max_workers: usize,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub cache_expire_days: u32,
    pub request_timeout: Duration,
    pub requests_per_minute: Option<u32>,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self::with_home(PathBuf::from(".ferroscreen"))
    }
}

impl ScreenerConfig {
    /// Defaults rooted at `home_dir`, with the cache in `home_dir/cache`.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        let home_dir = home_dir.into();
        Self {
            token: String::new(),
            fundamental_url: DEFAULT_FUNDAMENTAL_URL.to_owned(),
            fs_url: DEFAULT_FS_URL.to_owned(),
            company_url: DEFAULT_COMPANY_URL.to_owned(),
            cache_dir: home_dir.join("cache"),
            home_dir,
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_retry_delay: DEFAULT_INITIAL_RETRY_DELAY,
            cache_expire_days: DEFAULT_CACHE_EXPIRE_DAYS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            requests_per_minute: None,
        }
    }

    /// Loads `.env` if present, then reads `FERROSCREEN_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let home_dir = var("FERROSCREEN_HOME")
            .map(PathBuf::from)
            .or_else(|| var("HOME").map(|home| PathBuf::from(home).join(".ferroscreen")))
            .unwrap_or_else(|| PathBuf::from(".ferroscreen"));

        let mut config = Self::with_home(home_dir);

        if let Some(token) = var("FERROSCREEN_TOKEN").or_else(|| var("LIXINGER_TOKEN")) {
            config.token = token;
        }
        if let Some(dir) = var("FERROSCREEN_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(url) = var("FERROSCREEN_FUNDAMENTAL_URL") {
            config.fundamental_url = url;
        }
        if let Some(url) = var("FERROSCREEN_FS_URL") {
            config.fs_url = url;
        }
        if let Some(url) = var("FERROSCREEN_COMPANY_URL") {
            config.company_url = url;
        }

        if let Some(value) = var("FERROSCREEN_BATCH_SIZE") {
            config.batch_size = parse_positive("FERROSCREEN_BATCH_SIZE", &value)?;
        }
        if let Some(value) = var("FERROSCREEN_MAX_WORKERS") {
            config.max_workers = parse_positive("FERROSCREEN_MAX_WORKERS", &value)?;
        }
        if let Some(value) = var("FERROSCREEN_MAX_RETRIES") {
            config.max_retries = parse_positive("FERROSCREEN_MAX_RETRIES", &value)?;
        }
        if let Some(value) = var("FERROSCREEN_INITIAL_RETRY_DELAY_SECS") {
            config.initial_retry_delay =
                Duration::from_secs(parse("FERROSCREEN_INITIAL_RETRY_DELAY_SECS", &value)?);
        }
        if let Some(value) = var("FERROSCREEN_CACHE_EXPIRE_DAYS") {
            config.cache_expire_days = parse("FERROSCREEN_CACHE_EXPIRE_DAYS", &value)?;
        }
        if let Some(value) = var("FERROSCREEN_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_positive::<u64>(
                "FERROSCREEN_REQUEST_TIMEOUT_SECS",
                &value,
            )?);
        }
        if let Some(value) = var("FERROSCREEN_REQUESTS_PER_MINUTE") {
            config.requests_per_minute =
                Some(parse_positive("FERROSCREEN_REQUESTS_PER_MINUTE", &value)?);
        }

        Ok(config)
    }

    /// Creates the home and cache directories. Safe to call repeatedly.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.home_dir)?;
        std::fs::create_dir_all(&self.cache_dir)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::doubling(self.max_retries, self.initial_retry_delay)
    }

    pub fn endpoint(&self, kind: DatasetKind) -> &str {
        match kind {
            DatasetKind::Fundamental => &self.fundamental_url,
            DatasetKind::FinancialStatement => &self.fs_url,
        }
    }

    pub fn directory_cache_file(&self) -> PathBuf {
        self.cache_dir.join(DIRECTORY_CACHE_FILE)
    }

    pub fn filter_config_file(&self) -> PathBuf {
        self.home_dir.join(FILTER_CONFIG_FILE)
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
    })
}

fn parse_positive<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
{
    let parsed: T = parse(key, value)?;
    if parsed == T::default() {
        return Err(ConfigError::Zero { key });
    }
    Ok(parsed)
}

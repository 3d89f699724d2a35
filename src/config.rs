//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/emx.sqlite"
//!
//! [query]
//! default_limit = 50000
//! district = "Schleswig-Flensburg"
//!
//! [cache]
//! database_ttl_secs = 604800
//! api_ttl_secs = 300
//!
//! [partner_api]
//! url = "https://ktw.example.org/api/"
//! timeout_secs = 30
//!
//! [holidays]
//! url = "https://get.api-feiertage.de/?states=sh"
//! timeout_secs = 10
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```
//!
//! The partner API key is never read from the file; it comes from
//! `EMX_PARTNER_API_KEY`. `EMX_PARTNER_API_URL` is used when the file has
//! no `[partner_api].url`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ems_metrics_core::normalize::DEFAULT_DISTRICT;

pub const PARTNER_API_URL_ENV: &str = "EMX_PARTNER_API_URL";
pub const PARTNER_API_KEY_ENV: &str = "EMX_PARTNER_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub partner_api: PartnerApiConfig,
    #[serde(default)]
    pub holidays: HolidayFeedConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// `EO_LANDKREIS` value the dispatch-centre category is restricted to.
    #[serde(default = "default_district")]
    pub district: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            district: default_district(),
        }
    }
}

fn default_limit() -> usize {
    50_000
}
fn default_district() -> String {
    DEFAULT_DISTRICT.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_database_ttl")]
    pub database_ttl_secs: u64,
    #[serde(default = "default_api_ttl")]
    pub api_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_ttl_secs: default_database_ttl(),
            api_ttl_secs: default_api_ttl(),
        }
    }
}

fn default_database_ttl() -> u64 {
    7 * 24 * 60 * 60
}
fn default_api_ttl() -> u64 {
    300
}

impl CacheConfig {
    pub fn database_ttl(&self) -> Duration {
        Duration::from_secs(self.database_ttl_secs)
    }

    pub fn api_ttl(&self) -> Duration {
        Duration::from_secs(self.api_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PartnerApiConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

impl Default for PartnerApiConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_api_timeout(),
        }
    }
}

fn default_api_timeout() -> u64 {
    30
}

impl PartnerApiConfig {
    /// Base URL from the file, else from the environment.
    pub fn resolved_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var(PARTNER_API_URL_ENV).ok())
            .filter(|u| !u.trim().is_empty())
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(PARTNER_API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HolidayFeedConfig {
    #[serde(default = "default_holiday_url")]
    pub url: String,
    #[serde(default = "default_holiday_timeout")]
    pub timeout_secs: u64,
}

impl Default for HolidayFeedConfig {
    fn default() -> Self {
        Self {
            url: default_holiday_url(),
            timeout_secs: default_holiday_timeout(),
        }
    }
}

fn default_holiday_url() -> String {
    "https://get.api-feiertage.de/?states=sh".to_string()
}
fn default_holiday_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.query.default_limit == 0 {
        anyhow::bail!("query.default_limit must be > 0");
    }
    if config.query.district.trim().is_empty() {
        anyhow::bail!("query.district must not be empty");
    }

    if config.cache.database_ttl_secs == 0 || config.cache.api_ttl_secs == 0 {
        anyhow::bail!("cache TTLs must be > 0");
    }

    if config.partner_api.timeout_secs == 0 {
        anyhow::bail!("partner_api.timeout_secs must be > 0");
    }
    if config.holidays.timeout_secs == 0 {
        anyhow::bail!("holidays.timeout_secs must be > 0");
    }
    if config.holidays.url.trim().is_empty() {
        anyhow::bail!("holidays.url must not be empty");
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(())
}

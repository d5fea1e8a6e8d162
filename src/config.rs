use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::cache::{CacheTtl, SWEEP_INTERVAL};
use crate::types::ProviderSource;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
    pub scraper: ScraperConfig,
    pub hot: HotConfig,
    pub sources: BTreeMap<String, ProviderSource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_version: String,
    pub static_dir: String,
    pub cache_control_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            api_version: "v1".to_string(),
            static_dir: "frontend/dist".to_string(),
            cache_control_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub search_ttl_secs: u64,
    pub id_ttl_secs: u64,
    pub hot_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttl = CacheTtl::default();
        Self {
            search_ttl_secs: ttl.search.as_secs(),
            id_ttl_secs: ttl.id.as_secs(),
            hot_ttl_secs: ttl.hot.as_secs(),
            sweep_interval_secs: SWEEP_INTERVAL.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> CacheTtl {
        CacheTtl {
            search: Duration::from_secs(self.search_ttl_secs),
            id: Duration::from_secs(self.id_ttl_secs),
            hot: Duration::from_secs(self.hot_ttl_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

/// Crawl bounds for the HTML-only provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub base_url: String,
    /// Hosts the crawler may fetch from. Empty means "the host of `base_url`".
    pub allowed_domains: Vec<String>,
    pub parallelism: usize,
    pub delay_ms: u64,
    pub request_timeout_secs: u64,
    pub crawl_timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.omofun.link".to_string(),
            allowed_domains: vec!["www.omofun.link".to_string(), "omofun.link".to_string()],
            parallelism: 2,
            delay_ms: 200,
            request_timeout_secs: 3,
            crawl_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotConfig {
    pub base_url: String,
}

impl Default for HotConfig {
    fn default() -> Self {
        Self {
            base_url: "https://movie.douban.com".to_string(),
        }
    }
}

impl AppConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(text).context("Failed to parse config")?;
        for (key, source) in config.sources.iter_mut() {
            source.key = key.clone();
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let mut config = Self::parse(&text)?;
        config.apply_env_overrides();
        let names: Vec<&str> = config.sources.values().map(|s| s.name.as_str()).collect();
        info!(path = %path.display(), sources = ?names, "configuration loaded");
        Ok(config)
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        warn!(path = %path.display(), "config file not found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Path from `VOD_CONFIG`, falling back to `config.toml`.
    pub fn path_from_env() -> String {
        env::var("VOD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
    }
}

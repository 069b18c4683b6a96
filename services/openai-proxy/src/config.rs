//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Session cookies are loaded from the SG_COOKIE env var or pool.cookie_file,
//! never stored in the TOML directly to avoid leaking secrets. The inbound
//! API secrets come from the API_SECRET env var.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Session cookies in rotation order, resolved from env or cookie_file.
    #[serde(skip)]
    pub cookies: Vec<Secret<String>>,
    /// Accepted inbound bearer secrets. Empty means auth is disabled.
    #[serde(skip)]
    pub api_secrets: Vec<Secret<String>>,
}

/// HTTP server settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Upstream connection settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Upper bound on one streaming call, covering the whole stream.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Optional egress proxy URL.
    #[serde(default)]
    pub proxy_url: Option<String>,
}

/// Cookie pool settings
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    /// How long a rate-limited cookie stays locked.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Path to a file with one session cookie per line (alternative to the
    /// SG_COOKIE env var)
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            proxy_url: None,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            cookie_file: None,
        }
    }
}

fn default_base_url() -> String {
    sourcegraph::constants::BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    600
}

fn default_max_connections() -> usize {
    1000
}

fn default_cooldown() -> u64 {
    600
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Cookie resolution order:
    /// 1. SG_COOKIE env var (comma-separated)
    /// 2. pool.cookie_file path from config (one per line)
    ///
    /// At least one cookie must resolve — an empty pool fails here, at
    /// startup, rather than on the first request.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.upstream.base_url.starts_with("http://")
            && !config.upstream.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream.base_url must start with http:// or https://, got: {}",
                config.upstream.base_url
            )));
        }

        if config.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "upstream.timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }

        if config.pool.cooldown_secs == 0 {
            return Err(common::Error::Config(
                "pool.cooldown_secs must be greater than 0".into(),
            ));
        }

        // Resolve cookies: env var takes precedence over file
        if let Ok(raw) = std::env::var("SG_COOKIE") {
            config.cookies = split_secrets(&raw, ',');
        } else if let Some(ref cookie_file) = config.pool.cookie_file {
            let raw = std::fs::read_to_string(cookie_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read cookie_file {}: {e}",
                    cookie_file.display()
                ))
            })?;
            config.cookies = split_secrets(&raw, '\n');
        }

        if config.cookies.is_empty() {
            return Err(common::Error::Config(
                "no session cookies configured (set SG_COOKIE or pool.cookie_file)".into(),
            ));
        }

        if let Ok(raw) = std::env::var("API_SECRET") {
            config.api_secrets = split_secrets(&raw, ',');
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("sourcegraph-openai-proxy.toml")
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.pool.cooldown_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }
}

/// Split a raw secret list on `separator`, trimming and dropping empties.
fn split_secrets(raw: &str, separator: char) -> Vec<Secret<String>> {
    raw.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Secret::new(s.to_string()))
        .collect()
}

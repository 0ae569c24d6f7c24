//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main federation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    pub instance: InstanceConfig,
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub followers: FollowersConfig,
    pub database: DatabaseConfig,
}

/// Local instance identity
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Public domain (e.g., "blog.example.com")
    pub domain: String,
    /// Instance base URL (includes protocol)
    pub base_url: String,
    /// Software name reported in the User-Agent
    #[serde(default = "default_software_name")]
    pub software_name: String,
    /// Software version reported in the User-Agent
    #[serde(default = "default_software_version")]
    pub software_version: String,
    /// Operator-controlled contact URL appended to the User-Agent
    pub home_url: String,
    /// Local actor id used to sign GET requests when no identity is given.
    ///
    /// This is a machine-to-machine application actor, not a human author.
    #[serde(default = "default_service_actor")]
    pub service_actor: String,
}

fn default_software_name() -> String {
    "pubwire".to_string()
}

fn default_software_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_service_actor() -> String {
    "application".to_string()
}

impl InstanceConfig {
    /// User-Agent for all outbound federation requests
    ///
    /// Identifies the software and the operator contact, e.g.
    /// `pubwire/0.1.0 (+https://blog.example.com)`.
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{} (+{})",
            self.software_name, self.software_version, self.home_url
        )
    }
}

/// Outbound HTTP limits
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds (default: 100)
    pub timeout_seconds: u64,
    /// Response body size cap in bytes (default: 1 MiB)
    pub max_response_bytes: usize,
    /// Maximum redirects followed (default: 3)
    pub max_redirects: usize,
    /// Allow requests to loopback/private hosts.
    ///
    /// Kept off outside of tests; federation peers live on public hosts.
    #[serde(default)]
    pub allow_private_destinations: bool,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Cache TTLs
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Remote actor document TTL in seconds (default: 604800 = 7 days)
    pub actor_ttl_seconds: u64,
    /// Signed GET response cache TTL in seconds (default: 3600)
    pub response_ttl_seconds: u64,
}

impl CacheConfig {
    pub fn actor_ttl(&self) -> Duration {
        Duration::from_secs(self.actor_ttl_seconds)
    }

    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_seconds)
    }
}

/// Follower maintenance policy
#[derive(Debug, Clone, Deserialize)]
pub struct FollowersConfig {
    /// Consecutive resolution errors before a follower is deleted (default: 5)
    pub error_threshold: i64,
    /// Batch size for the hourly refresh sweep (default: 5)
    pub refresh_batch: i64,
    /// Batch size for the daily cleanup sweep (default: 50)
    pub cleanup_batch: i64,
    /// Page size for the inbox-resolution hot path (default: 500)
    pub inbox_page_size: i64,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

impl FederationConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (PUBWIRE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::FederationError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("instance.software_name", "pubwire")?
            .set_default("instance.software_version", env!("CARGO_PKG_VERSION"))?
            .set_default("instance.service_actor", "application")?
            .set_default("http.timeout_seconds", 100)?
            .set_default("http.max_response_bytes", 1_048_576)?
            .set_default("http.max_redirects", 3)?
            .set_default("http.allow_private_destinations", false)?
            .set_default("cache.actor_ttl_seconds", 604_800)?
            .set_default("cache.response_ttl_seconds", 3600)?
            .set_default("followers.error_threshold", 5)?
            .set_default("followers.refresh_batch", 5)?
            .set_default("followers.cleanup_batch", 50)?
            .set_default("followers.inbox_page_size", 500)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("PUBWIRE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::FederationError::Config(e.to_string()))?;

        let federation_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::FederationError::Config(e.to_string()))?;
        federation_config.validate()?;
        Ok(federation_config)
    }

    pub fn validate(&self) -> Result<(), crate::error::FederationError> {
        if self.instance.domain.trim().is_empty() {
            return Err(crate::error::FederationError::Config(
                "instance.domain must not be empty".to_string(),
            ));
        }

        if self.followers.error_threshold < 1 {
            return Err(crate::error::FederationError::Config(
                "followers.error_threshold must be at least 1".to_string(),
            ));
        }

        if !is_local_instance_domain(&self.instance.domain)
            && !self.instance.base_url.starts_with("https://")
        {
            return Err(crate::error::FederationError::Config(
                "instance.base_url must be https for non-local domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_local_instance_domain(domain: &str) -> bool {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

//! Configuration file parser for the engine's TOML config.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields`
//! off), though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Struct
// ============================================================================

/// Engine configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// User-Agent header sent with every request.
    pub user_agent: String,

    /// Per-request timeout for feed fetches, in seconds.
    pub request_timeout_secs: u64,

    /// Freshness window of the parsed-feed cache, in seconds.
    pub cache_ttl_secs: u64,

    /// Maximum number of sites processed per crawl pass.
    pub crawl_batch_size: usize,

    /// Delay between site dispatches during a crawl, in milliseconds.
    pub crawl_delay_ms: u64,

    /// Concurrent site crawls. 1 = strictly sequential.
    pub crawl_concurrency: usize,

    /// Per-probe timeout during feed discovery, in seconds.
    pub probe_timeout_secs: u64,

    /// Concurrent path probes during feed discovery.
    pub probe_concurrency: usize,

    /// Wall-clock budget for the whole probe step, in seconds.
    pub discovery_budget_secs: u64,

    /// Permit fetches from loopback/private address space. Off by default;
    /// intranet deployments (and the HTTP-mocked test suite) turn it on.
    pub allow_private_networks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: format!("gander/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
            cache_ttl_secs: 300,
            crawl_batch_size: 50,
            crawl_delay_ms: 1000,
            crawl_concurrency: 1,
            probe_timeout_secs: 5,
            probe_concurrency: 4,
            discovery_budget_secs: 20,
            allow_private_networks: false,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn crawl_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn discovery_budget(&self) -> Duration {
        Duration::from_secs(self.discovery_budget_secs)
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {} // Size is within limits, proceed
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "user_agent",
                "request_timeout_secs",
                "cache_ttl_secs",
                "crawl_batch_size",
                "crawl_delay_ms",
                "crawl_concurrency",
                "probe_timeout_secs",
                "probe_concurrency",
                "discovery_budget_secs",
                "allow_private_networks",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            batch = config.crawl_batch_size,
            cache_ttl_secs = config.cache_ttl_secs,
            "Loaded configuration"
        );
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================

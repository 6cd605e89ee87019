//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.imagegate/config.toml` (user)
//! 3. `/etc/imagegate/config.toml` (system)
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.imagegate/secrets.toml` (user, must be 0600)
//! 2. `/etc/imagegate/secrets.toml` (system, must be 0600)
//! 3. `IMAGEGATE_API_KEY` environment variable

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dedup::DedupConfig;
use crate::limiter::RateLimitConfig;
use crate::orchestrator::GenerationConfig;
use crate::retry::RetryConfig;
use crate::{ImagegateError, Result};

/// Environment variable consulted when no secrets file holds an API key.
pub const API_KEY_ENV_VAR: &str = "IMAGEGATE_API_KEY";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub dedup: DedupSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
}

/// Per-client admission control.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Requests per window (default: 10).
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Window length in seconds (default: 60).
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Interval of the idle-bucket and cache sweeps in seconds (default: 60).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_secs: default_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl RateLimitSettings {
    pub fn to_config(&self) -> RateLimitConfig {
        RateLimitConfig::new()
            .capacity(self.capacity)
            .window(Duration::from_secs(self.window_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_capacity() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Whole-batch retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Attempts including the first (default: 2).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds (default: 1000).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Delay cap in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig::new()
            .max_attempts(self.max_attempts)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .jitter(self.jitter)
    }
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

/// Result cache.
#[derive(Debug, Clone, Deserialize)]
pub struct DedupSettings {
    /// Cached results kept (default: 100).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Result lifetime in seconds (default: 300).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl DedupSettings {
    pub fn to_config(&self) -> DedupConfig {
        DedupConfig::new()
            .max_entries(self.max_entries)
            .ttl(Duration::from_secs(self.ttl_secs))
    }
}

fn default_max_entries() -> usize {
    100
}

fn default_ttl_secs() -> u64 {
    300
}

/// Fan-out behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSettings {
    /// Images per request when unspecified (default: 4).
    #[serde(default = "default_num_images")]
    pub default_num_images: u32,
    /// Timeout of each upstream call in seconds (default: 60).
    #[serde(default = "default_per_call_timeout_secs")]
    pub per_call_timeout_secs: u64,
    /// Longest accepted prompt in characters (default: 1000).
    #[serde(default = "default_max_prompt_len")]
    pub max_prompt_len: usize,
    /// Reported in result metadata (default: "unknown").
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            default_num_images: default_num_images(),
            per_call_timeout_secs: default_per_call_timeout_secs(),
            max_prompt_len: default_max_prompt_len(),
            model_version: default_model_version(),
        }
    }
}

impl GenerationSettings {
    pub fn to_config(&self) -> GenerationConfig {
        GenerationConfig::new()
            .default_num_images(self.default_num_images)
            .per_call_timeout(Duration::from_secs(self.per_call_timeout_secs))
            .max_prompt_len(self.max_prompt_len)
            .model_version(self.model_version.clone())
    }
}

fn default_num_images() -> u32 {
    4
}

fn default_per_call_timeout_secs() -> u64 {
    60
}

fn default_max_prompt_len() -> usize {
    crate::types::DEFAULT_MAX_PROMPT_LEN
}

fn default_model_version() -> String {
    "unknown".to_string()
}

/// Upstream provider endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettings {
    /// URL the HTTP provider posts to.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// HTTP client timeout in seconds (default: 120).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Secrets configuration (API key).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub provider: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.imagegate/config.toml`
    /// 3. `/etc/imagegate/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Like [`load`](Self::load), but fall back to defaults when no file
    /// exists in the standard locations. An explicit path must still exist.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path) {
            Ok(path) => Self::load_from_file(&path),
            Err(_) if explicit_path.is_none() => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Parse a configuration file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ImagegateError::configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            ImagegateError::configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(ImagegateError::configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".imagegate").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/imagegate/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(ImagegateError::configuration(
            "No config file found. Create ~/.imagegate/config.toml or /etc/imagegate/config.toml",
        ))
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (the key may come from the
    /// environment).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".imagegate").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/imagegate/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Parse a secrets file after checking its permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            ImagegateError::configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            ImagegateError::configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            ImagegateError::configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(ImagegateError::configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// The provider API key, falling back to [`API_KEY_ENV_VAR`].
    pub fn api_key(&self) -> Option<String> {
        self.provider
            .as_ref()
            .map(|s| s.api_key.clone())
            .or_else(|| std::env::var(API_KEY_ENV_VAR).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

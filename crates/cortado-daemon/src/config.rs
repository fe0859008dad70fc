//! Configuration file management.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cortado_reconcile::PollPolicy;

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Chain gateway settings.
    #[serde(default)]
    pub chain: ChainConfig,
    /// Loyalty program settings.
    #[serde(default)]
    pub loyalty: LoyaltyConfig,
    /// Reconciliation poll settings.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Advanced settings.
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Chain gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// "gateway" for the HTTP gateway, "stub" for the in-memory dev chain.
    #[serde(default = "default_chain_mode")]
    pub mode: String,
    /// Base URL of the chain gateway service.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Per-request timeout, including the gateway's wait for mining.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Loyalty program configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltyConfig {
    /// Stamps required per free-drink reward.
    #[serde(default = "default_reward_threshold")]
    pub reward_threshold: u32,
    /// Stamps awarded per purchase.
    #[serde(default = "default_stamps_per_purchase")]
    pub stamps_per_purchase: u32,
}

/// Reconciliation poll configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Maximum convergence poll attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Attempt `n` waits `n * base_delay_ms` before the next attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Final wait when the counter never moved past the baseline.
    #[serde(default = "default_extended_delay_ms")]
    pub extended_delay_ms: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log file path. Empty = stderr.
    #[serde(default)]
    pub log_file: String,
}

// Default value functions

fn default_chain_mode() -> String {
    "gateway".to_string()
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:9955".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_reward_threshold() -> u32 {
    cortado_types::DEFAULT_REWARD_THRESHOLD
}

fn default_stamps_per_purchase() -> u32 {
    cortado_types::DEFAULT_STAMPS_PER_PURCHASE
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_extended_delay_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            mode: default_chain_mode(),
            gateway_url: default_gateway_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            reward_threshold: default_reward_threshold(),
            stamps_per_purchase: default_stamps_per_purchase(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            extended_delay_ms: default_extended_delay_ms(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: String::new(),
        }
    }
}

impl ReconcileConfig {
    /// The poll policy this configuration describes.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            extended_delay: Duration::from_millis(self.extended_delay_ms),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        // Check env var override first
        if let Ok(dir) = std::env::var("CORTADO_DATA_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("CORTADO_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Cortado")
        }
        #[cfg(target_os = "linux")]
        {
            dirs_fallback(".cortado")
        }
        #[cfg(target_os = "windows")]
        {
            dirs_fallback("Cortado")
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            dirs_fallback(".cortado")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/cortado"))
}

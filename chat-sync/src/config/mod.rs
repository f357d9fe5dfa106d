use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::types::error::{Result, SyncError};

/// Upper bound for `presence_threshold_secs`, one year
pub const MAX_PRESENCE_THRESHOLD_SECS: u64 = 365 * 24 * 60 * 60;

/// Sync engine configuration
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Additional attempts after the first failed send
    pub max_retries: u32,
    /// Delay before the first retry
    pub backoff_initial_ms: u64,
    /// Growth factor applied per retry
    pub backoff_multiplier: u32,
    /// Upper bound for a single backoff delay
    pub backoff_max_ms: u64,
    /// How long to wait for the transport to acknowledge a send
    pub ack_timeout_ms: u64,
    /// A peer seen within this many seconds counts as online
    pub presence_threshold_secs: u64,
    /// Unread badges above this value render as `"<cap>+"`
    pub unread_badge_cap: u32,
    /// Characters of content kept in a last-message preview
    pub preview_chars: usize,
    /// Shortest temporal segment accepted for prefix matching of echoed client ids
    pub prefix_match_min_len: usize,
    /// Stop automatic retries for a conversation's sends when it is left
    pub cancel_retries_on_leave: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_initial_ms: 1_000,
            backoff_multiplier: 2,
            backoff_max_ms: 30_000,
            ack_timeout_ms: 10_000,
            presence_threshold_secs: 300,
            unread_badge_cap: 99,
            preview_chars: 80,
            prefix_match_min_len: 10,
            cancel_retries_on_leave: true,
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading sync configuration from: {:?}", path);

        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(content)
            .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the first existing default path, or fall back to defaults
    pub fn load_or_default() -> Result<Self> {
        for path in default_config_paths() {
            if path.exists() {
                info!("Found sync config at: {:?}", path);
                return Self::load(&path);
            }
        }

        info!("No sync config file found, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier == 0 {
            return Err(SyncError::Config(
                "backoff_multiplier must be at least 1".to_string(),
            ));
        }
        if self.backoff_initial_ms > self.backoff_max_ms {
            return Err(SyncError::Config(format!(
                "backoff_initial_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_initial_ms, self.backoff_max_ms
            )));
        }
        if self.ack_timeout_ms == 0 {
            return Err(SyncError::Config("ack_timeout_ms must be positive".to_string()));
        }
        if self.presence_threshold_secs > MAX_PRESENCE_THRESHOLD_SECS {
            return Err(SyncError::Config(format!(
                "presence_threshold_secs ({}) exceeds {}",
                self.presence_threshold_secs, MAX_PRESENCE_THRESHOLD_SECS
            )));
        }
        if self.prefix_match_min_len == 0 {
            return Err(SyncError::Config(
                "prefix_match_min_len must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("chat-sync").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join("chat-sync").join("config.toml"));
    }

    paths
}

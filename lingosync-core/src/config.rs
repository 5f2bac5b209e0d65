//! Engine settings loaded from `~/.lingosync/config.yaml`.
//!
//! Every key is optional; a missing file yields [`EngineConfig::default`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::paths::{self, config_path};
use crate::types::Language;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Language of source documents when a link does not exist yet.
    pub source_language: Language,
    /// A `pending` snapshot older than this is treated as abandoned.
    pub liveness_window_secs: u64,
    pub translation_timeout_ms: u64,
    pub repository_timeout_ms: u64,
    /// Retries after the first attempt for transient collaborator failures.
    pub max_transport_retries: u32,
    /// Re-requests after an invalid translation payload.
    pub max_validation_retries: u32,
    /// First backoff delay; doubled on each retry.
    pub backoff_base_ms: u64,
    /// Restarts allowed when the source changes mid-attempt.
    pub max_supersede_restarts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_language: Language::from("fa"),
            liveness_window_secs: 15 * 60,
            translation_timeout_ms: 60_000,
            repository_timeout_ms: 15_000,
            max_transport_retries: 3,
            max_validation_retries: 2,
            backoff_base_ms: 250,
            max_supersede_restarts: 2,
        }
    }
}

impl EngineConfig {
    pub fn liveness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.liveness_window_secs.min(i64::MAX as u64) as i64)
    }

    pub fn translation_timeout(&self) -> Duration {
        Duration::from_millis(self.translation_timeout_ms)
    }

    pub fn repository_timeout(&self) -> Duration {
        Duration::from_millis(self.repository_timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Load `<home>/.lingosync/config.yaml`, falling back to defaults when absent.
pub fn load_at(home: &Path) -> Result<EngineConfig, CoreError> {
    let path = config_path(home);
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<EngineConfig, CoreError> {
    load_at(&paths::home()?)
}

/// Atomically save the config to `<home>/.lingosync/config.yaml`.
pub fn save_at(home: &Path, config: &EngineConfig) -> Result<(), CoreError> {
    let yaml = serde_yaml::to_string(config)?;
    paths::write_atomic(&config_path(home), yaml.as_bytes())
}

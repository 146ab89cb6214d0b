//! Typed, validated configuration for the sync engine.
//!
//! Loaded at startup from a TOML file and overridable by environment
//! variables prefixed `SCHEMA_SYNC_` (e.g. `SCHEMA_SYNC_MONITORING__DATABASE_POLL_INTERVAL_SECS=15`).
//! Validated exactly once, before any worker starts; a failed validation
//! aborts startup with `SyncError::Validation`.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub database_poll_interval_secs: u64,
    pub file_system_debounce_ms: u64,
    pub full_reconciliation_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub max_concurrent_comparisons: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            database_poll_interval_secs: 30,
            file_system_debounce_ms: 500,
            full_reconciliation_interval_secs: 300,
            health_check_interval_secs: 60,
            max_concurrent_comparisons: 2,
        }
    }
}

impl MonitoringConfig {
    pub fn database_poll_interval(&self) -> Duration {
        secs(self.database_poll_interval_secs)
    }
    pub fn file_system_debounce(&self) -> Duration {
        Duration::from_millis(self.file_system_debounce_ms)
    }
    pub fn full_reconciliation_interval(&self) -> Duration {
        secs(self.full_reconciliation_interval_secs)
    }
    pub fn health_check_interval(&self) -> Duration {
        secs(self.health_check_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub snapshot_retention_secs: u64,
    pub max_cached_snapshots_per_subscription: usize,
    pub comparison_history_retention_secs: u64,
    pub pending_change_retention_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            snapshot_retention_secs: 7 * 86_400,
            max_cached_snapshots_per_subscription: 10,
            comparison_history_retention_secs: 30 * 86_400,
            pending_change_retention_secs: 86_400,
        }
    }
}

impl CacheConfig {
    pub fn snapshot_retention(&self) -> Duration {
        secs(self.snapshot_retention_secs)
    }
    pub fn comparison_history_retention(&self) -> Duration {
        secs(self.comparison_history_retention_secs)
    }
    pub fn pending_change_retention(&self) -> Duration {
        secs(self.pending_change_retention_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerEnableFlags {
    pub database_polling: bool,
    pub file_watching: bool,
    pub reconciliation: bool,
    pub cache_cleanup: bool,
    pub health_check: bool,
}

impl Default for WorkerEnableFlags {
    fn default() -> Self {
        Self {
            database_polling: true,
            file_watching: true,
            reconciliation: true,
            cache_cleanup: true,
            health_check: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_port: u16,
    pub secure_transport: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: 7433,
            secure_transport: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub monitoring: MonitoringConfig,
    pub cache: CacheConfig,
    pub workers: WorkerEnableFlags,
    pub server: ServerConfig,
}

const ENV_PREFIX: &str = "SCHEMA_SYNC_";

impl Configuration {
    /// Loads from a TOML file if it exists, then applies environment
    /// overrides, then validates. A missing file is not an error - the
    /// built-in defaults apply (overridable purely via environment).
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<Configuration>(&contents)?
        } else {
            Configuration::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u64("MONITORING__DATABASE_POLL_INTERVAL_SECS") {
            self.monitoring.database_poll_interval_secs = v;
        }
        if let Some(v) = env_u64("MONITORING__FILE_SYSTEM_DEBOUNCE_MS") {
            self.monitoring.file_system_debounce_ms = v;
        }
        if let Some(v) = env_u64("MONITORING__FULL_RECONCILIATION_INTERVAL_SECS") {
            self.monitoring.full_reconciliation_interval_secs = v;
        }
        if let Some(v) = env_u64("MONITORING__HEALTH_CHECK_INTERVAL_SECS") {
            self.monitoring.health_check_interval_secs = v;
        }
        if let Some(v) = env_u64("MONITORING__MAX_CONCURRENT_COMPARISONS") {
            self.monitoring.max_concurrent_comparisons = v as usize;
        }
        if let Some(v) = env_bool("WORKERS__DATABASE_POLLING") {
            self.workers.database_polling = v;
        }
        if let Some(v) = env_bool("WORKERS__FILE_WATCHING") {
            self.workers.file_watching = v;
        }
        if let Some(v) = env_bool("WORKERS__RECONCILIATION") {
            self.workers.reconciliation = v;
        }
        if let Some(v) = env_bool("WORKERS__CACHE_CLEANUP") {
            self.workers.cache_cleanup = v;
        }
        if let Some(v) = env_bool("WORKERS__HEALTH_CHECK") {
            self.workers.health_check = v;
        }
        if let Some(v) = env_u64("SERVER__LISTEN_PORT") {
            self.server.listen_port = v as u16;
        }
    }

    /// Validates every recognized option. Interval values must be positive,
    /// concurrency caps must be >= 1, retention windows must be
    /// non-negative (zero is allowed - it just means "don't retain").
    pub fn validate(&self) -> Result<()> {
        let m = &self.monitoring;
        if m.database_poll_interval_secs == 0 {
            return Err(SyncError::Validation("monitoring.database_poll_interval_secs must be positive".into()));
        }
        if m.file_system_debounce_ms == 0 {
            return Err(SyncError::Validation("monitoring.file_system_debounce_ms must be positive".into()));
        }
        if m.full_reconciliation_interval_secs == 0 {
            return Err(SyncError::Validation("monitoring.full_reconciliation_interval_secs must be positive".into()));
        }
        if m.health_check_interval_secs == 0 {
            return Err(SyncError::Validation("monitoring.health_check_interval_secs must be positive".into()));
        }
        if m.max_concurrent_comparisons == 0 {
            return Err(SyncError::Validation("monitoring.max_concurrent_comparisons must be >= 1".into()));
        }
        if self.cache.max_cached_snapshots_per_subscription == 0 {
            return Err(SyncError::Validation("cache.max_cached_snapshots_per_subscription must be >= 1".into()));
        }
        Ok(())
    }
}

fn env_u64(suffix: &str) -> Option<u64> {
    std::env::var(format!("{ENV_PREFIX}{suffix}")).ok()?.parse().ok()
}

fn env_bool(suffix: &str) -> Option<bool> {
    std::env::var(format!("{ENV_PREFIX}{suffix}")).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Configuration::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let mut cfg = Configuration::default();
        cfg.monitoring.database_poll_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_override_applies() {
        std::env::set_var("SCHEMA_SYNC_MONITORING__MAX_CONCURRENT_COMPARISONS", "5");
        let mut cfg = Configuration::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.monitoring.max_concurrent_comparisons, 5);
        std::env::remove_var("SCHEMA_SYNC_MONITORING__MAX_CONCURRENT_COMPARISONS");
    }
}

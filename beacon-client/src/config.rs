//! Client configuration.

use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use beacon_core::Error;
use beacon_core::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Namespace every query and cache file is scoped to.
    #[serde(default = "default_namespace_id")]
    pub namespace_id: String,

    /// Root directory for cached service views and failover snapshots.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Size of the update-task pool in the original design; kept as a
    /// bound on concurrently spawned update tasks.
    #[serde(default = "default_polling_thread_count")]
    pub polling_thread_count: usize,

    /// Ignore pushed or pulled payloads with no plausible hosts instead
    /// of wiping the local view.
    #[serde(default)]
    pub push_empty_protection: bool,

    /// Seed the in-memory view from the disk cache on startup.
    #[serde(default)]
    pub load_cache_at_start: bool,

    /// How long a second caller waits on another thread's in-flight
    /// first fetch.
    #[serde(default = "default_update_hold_interval_ms")]
    pub update_hold_interval_ms: u64,

    /// Cadence of the failover switch-file poll.
    #[serde(default = "default_failover_switch_refresh_ms")]
    pub failover_switch_refresh_ms: u64,

    /// Cadence of failover snapshot dumps.
    #[serde(default = "default_failover_snapshot_period_ms")]
    pub failover_snapshot_period_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace_id: default_namespace_id(),
            cache_dir: default_cache_dir(),
            polling_thread_count: default_polling_thread_count(),
            push_empty_protection: false,
            load_cache_at_start: false,
            update_hold_interval_ms: default_update_hold_interval_ms(),
            failover_switch_refresh_ms: default_failover_switch_refresh_ms(),
            failover_snapshot_period_ms: default_failover_snapshot_period_ms(),
        }
    }
}

impl ClientConfig {
    /// # Errors
    /// Returns `Error::Config` when a setting cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.namespace_id.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "namespace_id must not be empty".into(),
            )));
        }
        if self.polling_thread_count == 0 {
            return Err(Error::Config(ConfigError::Message(
                "polling_thread_count must be greater than zero".into(),
            )));
        }
        if self.update_hold_interval_ms == 0 || self.failover_switch_refresh_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "client intervals must be greater than zero".into(),
            )));
        }
        Ok(())
    }

    /// Per-namespace cache directory the reactor reads and writes.
    pub fn namespace_cache_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.namespace_id)
    }

    /// Failover snapshots live next to the regular cache files.
    pub fn failover_dir(&self) -> PathBuf {
        self.namespace_cache_dir().join("failover")
    }
}

fn default_namespace_id() -> String {
    "public".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("beacon-cache")
}

fn default_polling_thread_count() -> usize {
    1
}

fn default_update_hold_interval_ms() -> u64 {
    5_000
}

fn default_failover_switch_refresh_ms() -> u64 {
    5_000
}

fn default_failover_snapshot_period_ms() -> u64 {
    86_400_000
}

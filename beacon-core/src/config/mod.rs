//! Server-side configuration.
//!
//! Defaults live in code; a configuration file named by `BEACON_CONFIG`
//! and environment variables prefixed `BEACON__` override them, in that
//! order. Validation is explicit and deferred so callers can layer
//! overrides first.

use std::env;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Tunables of the server core: distro scheduling, liveness sweeps and
/// warm-up behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// This node's peer identity (host:port as known to the cluster).
    #[serde(default = "default_site")]
    pub site: String,

    /// Initial cluster membership, including this node. May be refreshed
    /// at runtime through the mapper.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Base unit for sync scheduling; pending sync batches flush every
    /// half period.
    #[serde(default = "default_task_dispatch_period_ms")]
    pub task_dispatch_period_ms: u64,

    /// Cadence of checksum advertisements to peers.
    #[serde(default = "default_verify_interval_ms")]
    pub verify_interval_ms: u64,

    /// Cadence of the per-service liveness sweep.
    #[serde(default = "default_beat_check_period_ms")]
    pub beat_check_period_ms: u64,

    /// Master switch for the liveness sweep.
    #[serde(default = "default_true")]
    pub health_check_enabled: bool,

    /// Whether long-silent instances are deleted (as opposed to only
    /// flipped unhealthy).
    #[serde(default = "default_true")]
    pub expire_instance: bool,

    /// Whether services synthesized for unknown replicated keys default
    /// to ephemeral instances.
    #[serde(default = "default_true")]
    pub default_instance_ephemeral: bool,

    /// Refuse availability until the first full snapshot pull succeeded.
    #[serde(default = "default_true")]
    pub data_warmup: bool,

    /// Whether the ephemeral dataset is sharded across peers at all.
    #[serde(default = "default_true")]
    pub distro_enabled: bool,

    /// Delay between warm-up snapshot attempts.
    #[serde(default = "default_load_retry_delay_ms")]
    pub load_retry_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            site: default_site(),
            peers: Vec::new(),
            task_dispatch_period_ms: default_task_dispatch_period_ms(),
            verify_interval_ms: default_verify_interval_ms(),
            beat_check_period_ms: default_beat_check_period_ms(),
            health_check_enabled: true,
            expire_instance: true,
            default_instance_ephemeral: true,
            data_warmup: true,
            distro_enabled: true,
            load_retry_delay_ms: default_load_retry_delay_ms(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from defaults, then `BEACON_CONFIG` (when
    /// set), then `BEACON__`-prefixed environment variables.
    ///
    /// Does not validate; call [`ServerConfig::validate`] once all
    /// overrides are applied.
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(path) = env::var("BEACON_CONFIG") {
            builder = builder.add_source(File::with_name(&path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("BEACON")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build().map_err(Error::Config)?.try_deserialize().map_err(Error::Config)?;
        Ok(config)
    }

    /// # Errors
    /// Returns `Error::Config` when a setting cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.site.is_empty() {
            return Err(Error::Config(ConfigError::Message("site must not be empty".into())));
        }
        for (name, value) in [
            ("task_dispatch_period_ms", self.task_dispatch_period_ms),
            ("verify_interval_ms", self.verify_interval_ms),
            ("beat_check_period_ms", self.beat_check_period_ms),
            ("load_retry_delay_ms", self.load_retry_delay_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(ConfigError::Message(format!(
                    "{name} must be greater than zero"
                ))));
            }
        }
        if self.distro_enabled && !self.peers.is_empty() && !self.peers.contains(&self.site) {
            return Err(Error::Config(ConfigError::Message(format!(
                "site {} not present in configured peer list",
                self.site
            ))));
        }
        Ok(())
    }

    /// Delay applied to freshly scheduled sync batches.
    pub fn sync_delay_ms(&self) -> u64 {
        self.task_dispatch_period_ms / 2
    }
}

fn default_site() -> String {
    "127.0.0.1:8848".to_string()
}

fn default_task_dispatch_period_ms() -> u64 {
    2_000
}

fn default_verify_interval_ms() -> u64 {
    5_000
}

fn default_beat_check_period_ms() -> u64 {
    5_000
}

fn default_load_retry_delay_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

/// Externally visible server status; an operator override of `Up` makes
/// the node report available before warm-up finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Up,
    Down,
}

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::utils::now_millis;

pub const DEFAULT_CLUSTER_NAME: &str = "DEFAULT";

/// Client beat cadence handed out to registering instances.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Silence after which an instance is flipped unhealthy.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 15_000;

/// Silence after which an instance is deleted from the registry.
pub const DEFAULT_IP_DELETE_TIMEOUT_MS: u64 = 30_000;

/// A single service endpoint.
///
/// Ephemeral instances exist only as long as their owner keeps beating;
/// `marked` pins an instance administratively, exempting it from automatic
/// health flips and expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub healthy: bool,
    pub enabled: bool,
    pub ephemeral: bool,
    pub marked: bool,
    pub cluster_name: String,
    pub service_name: String,
    pub metadata: BTreeMap<String, String>,
    /// Epoch millis of the most recent client beat.
    pub last_beat: u64,
    pub heartbeat_timeout_ms: u64,
    pub delete_timeout_ms: u64,
}

impl Default for Instance {
    fn default() -> Self {
        Self {
            ip: String::new(),
            port: 0,
            weight: 1.0,
            healthy: true,
            enabled: true,
            ephemeral: true,
            marked: false,
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            service_name: String::new(),
            metadata: BTreeMap::new(),
            last_beat: now_millis(),
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            delete_timeout_ms: DEFAULT_IP_DELETE_TIMEOUT_MS,
        }
    }
}

impl Instance {
    pub fn new(
        ip: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            ip: ip.into(),
            port,
            ..Self::default()
        }
    }

    /// Identity used by the client diff: one entry per network endpoint.
    pub fn to_inet_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Identity used inside a replicated instance list, which may hold the
    /// same endpoint under different clusters.
    pub fn datum_key(&self) -> String {
        format!("{}:{}:{}", self.ip, self.port, self.cluster_name)
    }

    /// Deterministic rendering of identity plus every mutable field.
    ///
    /// Metadata is a sorted map, so two logically equal instances render
    /// identically regardless of construction order.
    pub fn canonical_string(&self) -> String {
        let metadata = self
            .metadata
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:{{{metadata}}}",
            self.ip,
            self.port,
            self.cluster_name,
            self.weight,
            self.healthy,
            self.enabled,
            self.marked,
            self.ephemeral,
        )
    }
}

/// The replicated value of an ephemeral instance-list key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instances {
    pub instance_list: Vec<Instance>,
}

impl Instances {
    pub fn new(instance_list: Vec<Instance>) -> Self {
        Self { instance_list }
    }

    /// Content checksum, stable under host reordering.
    pub fn checksum(&self) -> String {
        let mut rendered: Vec<String> = self
            .instance_list
            .iter()
            .map(Instance::canonical_string)
            .collect();
        rendered.sort();
        format!("{:08x}", crc32fast::hash(rendered.join("|").as_bytes()))
    }
}

/// One heartbeat from a client for a registered instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientBeat {
    pub service_name: String,
    pub ip: String,
    pub port: u16,
    pub cluster: String,
    pub weight: f64,
    pub metadata: BTreeMap<String, String>,
    pub period: u64,
}

impl Default for ClientBeat {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            ip: String::new(),
            port: 0,
            cluster: DEFAULT_CLUSTER_NAME.to_string(),
            weight: 1.0,
            metadata: BTreeMap::new(),
            period: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

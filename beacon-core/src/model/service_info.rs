use serde::Deserialize;
use serde::Serialize;

use super::Instance;

/// Default refresh interval handed to clients that queried a service.
pub const DEFAULT_CACHE_MILLIS: u64 = 1_000;

const SERVICE_INFO_KEY_CONNECTOR: &str = "@@";

/// The client-side view of one subscribed service: the host list the
/// server last answered with, plus the refresh bookkeeping the update task
/// needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInfo {
    /// Grouped service name (`group@@service`).
    pub name: String,
    pub group_name: String,
    /// Comma-joined cluster filter this view was queried with.
    pub clusters: String,
    pub cache_millis: u64,
    pub hosts: Vec<Instance>,
    /// Server-session ordering stamp; a regression means the answer is
    /// older than what a push already delivered.
    pub last_ref_time: u64,
    pub checksum: String,
    pub all_ips: bool,
    /// The raw payload this view was parsed from, kept for disk dumps.
    #[serde(skip)]
    pub json_from_server: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            group_name: String::new(),
            clusters: String::new(),
            cache_millis: DEFAULT_CACHE_MILLIS,
            hosts: Vec::new(),
            last_ref_time: 0,
            checksum: String::new(),
            all_ips: false,
            json_from_server: String::new(),
        }
    }
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        clusters: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            clusters: clusters.into(),
            ..Self::default()
        }
    }

    /// Cache key for a (service, cluster-filter) view.
    pub fn build_key(
        name: &str,
        clusters: &str,
    ) -> String {
        if clusters.is_empty() {
            name.to_string()
        } else {
            format!("{name}{SERVICE_INFO_KEY_CONNECTOR}{clusters}")
        }
    }

    pub fn key(&self) -> String {
        Self::build_key(&self.name, &self.clusters)
    }

    /// Splits a cache key back into `(name, clusters)`.
    pub fn parse_key(key: &str) -> (String, String) {
        // The name itself contains one `@@` (group separator); the cluster
        // suffix, when present, is the segment after the second one.
        let mut parts = key.split(SERVICE_INFO_KEY_CONNECTOR);
        let group = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        let clusters = parts.next().unwrap_or_default();
        if name.is_empty() {
            (group.to_string(), String::new())
        } else {
            (
                format!("{group}{SERVICE_INFO_KEY_CONNECTOR}{name}"),
                clusters.to_string(),
            )
        }
    }

    pub fn ip_count(&self) -> usize {
        self.hosts.len()
    }

    /// Plausibility check used by push-empty protection: a valid payload
    /// names the service and carries at least one sane host.
    pub fn validate(&self) -> bool {
        if self.all_ips {
            return true;
        }
        if self.hosts.is_empty() {
            return false;
        }
        self.hosts
            .iter()
            .all(|h| !h.ip.is_empty() && h.weight >= 0.0)
    }
}

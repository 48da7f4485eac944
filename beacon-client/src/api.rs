//! Server-facing API seam.
//!
//! The reactor, beat reactor and push receiver only need these naming
//! operations; the HTTP client behind them is supplied by the embedding
//! application.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use beacon_core::ClientBeat;
use beacon_core::Instance;
use beacon_core::Result;

/// Server answer to a beat; the interval replaces the client's local
/// schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeatResult {
    pub client_beat_interval: u64,
    /// The server no longer knows the instance; send one full register.
    pub resend_register: bool,
    /// Subsequent beats may omit the full payload.
    pub light_beat_enabled: bool,
}

impl Default for BeatResult {
    fn default() -> Self {
        Self {
            client_beat_interval: beacon_core::model::DEFAULT_HEARTBEAT_INTERVAL_MS,
            resend_register: false,
            light_beat_enabled: false,
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait NamingApi: Send + Sync + 'static {
    /// Queries the host list of a service; `udp_port` (when non-zero)
    /// registers this client for pushes.
    async fn query_list(
        &self,
        service_name: &str,
        clusters: &str,
        udp_port: u16,
        healthy_only: bool,
    ) -> Result<String>;

    async fn register_instance(
        &self,
        service_name: &str,
        instance: Instance,
    ) -> Result<()>;

    async fn deregister_instance(
        &self,
        service_name: &str,
        instance: Instance,
    ) -> Result<()>;

    /// Sends one heartbeat; `lightweight` omits the full beat payload
    /// once the server acknowledged it.
    async fn send_beat(
        &self,
        beat: ClientBeat,
        lightweight: bool,
    ) -> Result<BeatResult>;

    async fn server_healthy(&self) -> bool;
}

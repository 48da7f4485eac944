//! Error hierarchy for the beacon naming cluster.
//!
//! Errors are grouped by operational concern: infrastructure failures
//! (network, disk, serialization), configuration validation, distro
//! replication protocol violations, and naming-level lookups. Nothing in
//! the core treats an error as fatal; callers log and retry on the next
//! scheduled tick.

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Peer or server communication failures
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Disk cache and snapshot I/O failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Distro replication protocol violations
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    /// Service and instance level failures
    #[error(transparent)]
    Naming(#[from] NamingError),

    /// Unrecoverable failures requiring operator attention
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Endpoint reachable but refusing work
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Peer communication timeout
    #[error("Request to {peer} timed out after {duration:?}")]
    Timeout { peer: String, duration: Duration },

    /// Unreachable peer with source context
    #[error("Peer {peer} unreachable: {source}")]
    Unreachable {
        peer: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Datagram socket failures (push receiver)
    #[error("Socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// Remote replied with an application-level failure
    #[error("Remote call failed: {0}")]
    RemoteFailure(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O failure on {path}: {source}")]
    PathError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConsistencyError {
    /// A peer advertised a key this node owns; the cluster topology views
    /// disagree and the verify round must not mutate anything.
    #[error("Received checksum for self-owned key {key} from {source_peer}")]
    OwnershipConflict { key: String, source_peer: String },

    /// Bulk install requires a service-meta listener to create service
    /// containers for unknown keys.
    #[error("No service-meta listener registered; cannot install {key}")]
    MetaListenerMissing { key: String },

    /// Malformed replication payload; dropped without mutating state.
    #[error("Undecodable replication payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Key does not parse as an instance-list or service-meta key.
    #[error("Malformed datum key: {0}")]
    MalformedKey(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    #[error("Service {namespace_id}##{service_name} not found")]
    ServiceNotFound {
        namespace_id: String,
        service_name: String,
    },

    #[error("Instance {ip}:{port} not found in service {service_name}")]
    InstanceNotFound {
        service_name: String,
        ip: String,
        port: u16,
    },

    #[error("Empty service name")]
    EmptyServiceName,
}

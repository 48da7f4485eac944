//! The distro replication unit and its listener-facing payload.

use std::collections::HashMap;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::ConsistencyError;
use crate::Instances;
use crate::Result;
use crate::ServiceMeta;

/// What happened to a key. Sync bodies and notifier tasks both carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataOperation {
    Change,
    Delete,
}

impl std::fmt::Display for DataOperation {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            DataOperation::Change => write!(f, "CHANGE"),
            DataOperation::Delete => write!(f, "DELETE"),
        }
    }
}

/// A replicated value plus the bookkeeping the distro protocol needs: a
/// logical sequence number local to the owning peer and a content
/// checksum for verify rounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Datum {
    pub key: String,
    pub value: Instances,
    pub timestamp: u64,
    pub checksum: String,
}

impl Datum {
    pub fn new(
        key: impl Into<String>,
        value: Instances,
        timestamp: u64,
    ) -> Self {
        let checksum = value.checksum();
        Self {
            key: key.into(),
            value,
            timestamp,
            checksum,
        }
    }
}

/// Listener payload, selected by key prefix at parse time: instance-list
/// keys carry host lists, service-meta keys carry container metadata.
#[derive(Debug, Clone)]
pub enum Record {
    Instances(Instances),
    Metadata(ServiceMeta),
}

/// A subscriber to per-key change and delete events.
///
/// Implementations must be cheap and non-blocking; they run on the
/// notifier task (or, during bulk installs, on the caller).
pub trait RecordListener: Send + Sync {
    fn on_change(
        &self,
        key: &str,
        record: &Record,
    ) -> Result<()>;

    fn on_delete(
        &self,
        key: &str,
    ) -> Result<()>;
}

/// Serializes a sync or pull body (`key → Datum`).
pub fn serialize_datum_map(map: &HashMap<String, Datum>) -> Result<Bytes> {
    let body = serde_json::to_vec(map).map_err(ConsistencyError::Payload)?;
    Ok(Bytes::from(body))
}

/// Deserializes a sync or pull body. Malformed payloads are an error and
/// must not mutate any state at the caller.
pub fn deserialize_datum_map(body: &[u8]) -> Result<HashMap<String, Datum>> {
    if body.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_slice(body).map_err(ConsistencyError::Payload)?)
}

/// Serializes a verify body (`key → checksum`).
pub fn serialize_checksum_map(map: &HashMap<String, String>) -> Result<Bytes> {
    let body = serde_json::to_vec(map).map_err(ConsistencyError::Payload)?;
    Ok(Bytes::from(body))
}

pub fn deserialize_checksum_map(body: &[u8]) -> Result<HashMap<String, String>> {
    Ok(serde_json::from_slice(body).map_err(ConsistencyError::Payload)?)
}

//! Peer transport seam.
//!
//! The distro protocol only needs to move opaque byte blobs to a named
//! peer; the wire (HTTP, gRPC, anything) is the embedding application's
//! choice.

use bytes::Bytes;
#[cfg(test)]
use mockall::automock;

use async_trait::async_trait;
use beacon_core::DataOperation;
use beacon_core::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DistroTransport: Send + Sync + 'static {
    /// Ships a batch of authoritative mutations to a peer. CHANGE bodies
    /// are a serialized `key → Datum` map, DELETE bodies a key list.
    async fn sync_to(
        &self,
        peer: &str,
        op: DataOperation,
        body: Bytes,
    ) -> Result<()>;

    /// Advertises `key → checksum` for the keys this node owns. No
    /// response is expected.
    async fn verify(
        &self,
        peer: &str,
        body: Bytes,
    ) -> Result<()>;

    /// Pulls authoritative datums for the given keys from their owner.
    async fn query(
        &self,
        peer: &str,
        keys: Vec<String>,
    ) -> Result<Bytes>;

    /// Pulls the peer's full authoritative dataset (startup warm-up).
    async fn query_snapshot(
        &self,
        peer: &str,
    ) -> Result<Bytes>;
}

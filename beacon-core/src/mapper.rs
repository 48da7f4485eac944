//! Deterministic service-to-owner mapping.
//!
//! The ephemeral dataset is sharded by hashing the grouped service name
//! over the sorted peer list. Every peer computes the same mapping, so the
//! owner of a key is a pure function of (peer list, service name). The
//! peer list is swapped atomically: readers always observe one consistent
//! snapshot, never a torn membership view.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::info;

/// Maps grouped service names onto the peer responsible for them.
pub struct DistroMapper {
    /// This node's own peer identity.
    site: String,
    /// When sharding is disabled (single-node operation) every service is
    /// local.
    distro_enabled: bool,
    /// Sorted, deduplicated peer identities.
    peers: ArcSwap<Vec<String>>,
}

impl DistroMapper {
    pub fn new(
        site: impl Into<String>,
        distro_enabled: bool,
    ) -> Self {
        let site = site.into();
        let peers = ArcSwap::from_pointee(vec![site.clone()]);
        Self {
            site,
            distro_enabled,
            peers,
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    /// Installs a new membership snapshot. Sorting fixes the hash slots;
    /// the swap is atomic with respect to `responsible`/`map_srv` readers.
    pub fn update_peers(
        &self,
        mut peers: Vec<String>,
    ) {
        peers.sort();
        peers.dedup();
        info!(count = peers.len(), "distro peer list updated");
        self.peers.store(Arc::new(peers));
    }

    pub fn peers(&self) -> Arc<Vec<String>> {
        self.peers.load_full()
    }

    /// All peers except this node, the fan-out set for sync and verify.
    pub fn other_peers(&self) -> Vec<String> {
        self.peers
            .load()
            .iter()
            .filter(|p| **p != self.site)
            .cloned()
            .collect()
    }

    /// Whether this node is the authoritative writer for the service.
    pub fn responsible(
        &self,
        service_name: &str,
    ) -> bool {
        if !self.distro_enabled {
            return true;
        }
        let peers = self.peers.load();
        if peers.is_empty() || !peers.contains(&self.site) {
            // Membership has not stabilized; claim responsibility rather
            // than drop writes.
            return true;
        }
        peers[Self::slot(service_name, peers.len())] == self.site
    }

    /// The peer responsible for the service under the current snapshot.
    pub fn map_srv(
        &self,
        service_name: &str,
    ) -> String {
        let peers = self.peers.load();
        if peers.is_empty() || !peers.contains(&self.site) {
            return self.site.clone();
        }
        peers[Self::slot(service_name, peers.len())].clone()
    }

    fn slot(
        service_name: &str,
        peer_count: usize,
    ) -> usize {
        distro_hash(service_name) as usize % peer_count
    }
}

/// Stable 32-bit hash of a service name. Identical on every peer and
/// across releases, which `DefaultHasher` (per-process seeded) is not.
pub fn distro_hash(service_name: &str) -> u32 {
    service_name
        .bytes()
        .fold(0u32, |hash, byte| hash.wrapping_mul(31).wrapping_add(byte as u32))
}

//! Background tasks of the distro protocol: the sync batcher, the
//! periodic verify advertisement and the startup warm-up pull.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::sleep;
use tokio::time::Duration;
use tracing::error;
use tracing::info;
use tracing::warn;

use beacon_core::datum::serialize_checksum_map;
use beacon_core::datum::serialize_datum_map;
use beacon_core::key;
use beacon_core::ConsistencyError;
use beacon_core::DataOperation;
use beacon_core::DataStore;
use beacon_core::Datum;
use beacon_core::DistroMapper;
use beacon_core::Result;
use beacon_core::ServerConfig;

use super::DistroConsistencyService;
use crate::transport::DistroTransport;

/// Aggregates pending sync keys per destination and flushes them in one
/// call per (peer, op) every half dispatch period, so write bursts
/// coalesce into few transport round-trips.
pub struct SyncScheduler {
    pending: Arc<DashMap<String, HashSet<(String, DataOperation)>>>,
}

impl SyncScheduler {
    pub fn spawn(
        store: Arc<DataStore>,
        transport: Arc<dyn DistroTransport>,
        delay_ms: u64,
        mut shutdown: watch::Receiver<()>,
    ) -> Self {
        let pending: Arc<DashMap<String, HashSet<(String, DataOperation)>>> = Arc::new(DashMap::new());

        let queue = pending.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(delay_ms.max(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => flush(&queue, &store, &transport).await,
                }
            }
        });

        Self { pending }
    }

    /// Queues one key for replication to each target peer.
    pub fn schedule(
        &self,
        key: &str,
        op: DataOperation,
        targets: Vec<String>,
    ) {
        for peer in targets {
            self.pending
                .entry(peer)
                .or_default()
                .insert((key.to_string(), op));
        }
    }

    pub fn pending_for(
        &self,
        peer: &str,
    ) -> usize {
        self.pending.get(peer).map(|s| s.len()).unwrap_or(0)
    }
}

async fn flush(
    pending: &DashMap<String, HashSet<(String, DataOperation)>>,
    store: &DataStore,
    transport: &Arc<dyn DistroTransport>,
) {
    let peers: Vec<String> = pending.iter().map(|e| e.key().clone()).collect();
    for peer in peers {
        let Some((_, batch)) = pending.remove(&peer) else {
            continue;
        };
        if batch.is_empty() {
            continue;
        }

        let mut deletes: Vec<String> = Vec::new();
        let mut changes: Vec<String> = Vec::new();
        for (key, op) in batch {
            match op {
                DataOperation::Delete => deletes.push(key),
                DataOperation::Change => changes.push(key),
            }
        }

        // Deletes first: a delete-then-recreate burst must not end with
        // the recreate being clobbered on the receiver.
        if !deletes.is_empty() {
            if let Err(e) = send_deletes(&peer, &deletes, transport).await {
                warn!(%peer, error = %e, "delete sync failed, requeued");
                requeue(pending, &peer, &deletes, DataOperation::Delete);
            }
        }
        if !changes.is_empty() {
            if let Err(e) = send_changes(&peer, &changes, store, transport).await {
                warn!(%peer, error = %e, "change sync failed, requeued");
                requeue(pending, &peer, &changes, DataOperation::Change);
            }
        }
    }
}

async fn send_deletes(
    peer: &str,
    keys: &[String],
    transport: &Arc<dyn DistroTransport>,
) -> Result<()> {
    let body = serde_json::to_vec(keys).map_err(ConsistencyError::Payload)?;
    transport
        .sync_to(peer, DataOperation::Delete, body.into())
        .await
}

async fn send_changes(
    peer: &str,
    keys: &[String],
    store: &DataStore,
    transport: &Arc<dyn DistroTransport>,
) -> Result<()> {
    let mut datum_map: HashMap<String, Datum> = HashMap::new();
    for key in keys {
        // A key deleted since it was scheduled has a delete on the way;
        // skip it here.
        if let Some(datum) = store.get(key) {
            datum_map.insert(key.clone(), datum);
        }
    }
    if datum_map.is_empty() {
        return Ok(());
    }
    let body = serialize_datum_map(&datum_map)?;
    transport.sync_to(peer, DataOperation::Change, body).await
}

fn requeue(
    pending: &DashMap<String, HashSet<(String, DataOperation)>>,
    peer: &str,
    keys: &[String],
    op: DataOperation,
) {
    let mut entry = pending.entry(peer.to_string()).or_default();
    for key in keys {
        entry.insert((key.clone(), op));
    }
}

/// Advertises `key → checksum` for every key this node owns, to every
/// other peer, once per verify interval.
pub(crate) fn spawn_verify_task(
    config: Arc<ServerConfig>,
    mapper: Arc<DistroMapper>,
    store: Arc<DataStore>,
    transport: Arc<dyn DistroTransport>,
    mut shutdown: watch::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(config.verify_interval_ms));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => advertise(&mapper, &store, &transport).await,
            }
        }
    });
}

async fn advertise(
    mapper: &DistroMapper,
    store: &DataStore,
    transport: &Arc<dyn DistroTransport>,
) {
    let mut checksums: HashMap<String, String> = HashMap::new();
    for key in store.keys() {
        let Ok(service_name) = key::service_name(&key) else {
            continue;
        };
        if !mapper.responsible(service_name) {
            continue;
        }
        if let Some(datum) = store.get(&key) {
            checksums.insert(key, datum.checksum);
        }
    }
    if checksums.is_empty() {
        return;
    }

    let body = match serialize_checksum_map(&checksums) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "failed to encode verify body");
            return;
        }
    };

    let sends = mapper.other_peers().into_iter().map(|peer| {
        let transport = transport.clone();
        let body = body.clone();
        async move {
            let outcome = transport.verify(&peer, body).await;
            (peer, outcome)
        }
    });
    for (peer, outcome) in join_all(sends).await {
        if let Err(e) = outcome {
            warn!(%peer, error = %e, "verify send failed, retry next tick");
        }
    }
}

/// Startup warm-up: pull a full snapshot from the first reachable peer,
/// then report the node initialized. Retries forever; a lone node is
/// initialized immediately.
pub(crate) fn spawn_load_task(
    service: Arc<DistroConsistencyService>,
    mut shutdown: watch::Receiver<()>,
) {
    tokio::spawn(async move {
        if service.is_initialized() {
            return;
        }
        loop {
            let peers = service.mapper.other_peers();
            if peers.is_empty() {
                info!("no peers configured, warm-up complete");
                service.mark_initialized();
                return;
            }
            for peer in peers {
                match service.transport.query_snapshot(&peer).await {
                    Ok(bytes) => {
                        if service.process_snapshot(&bytes) {
                            info!(%peer, "warm-up snapshot applied");
                            service.mark_initialized();
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(%peer, error = %e, "warm-up snapshot pull failed");
                    }
                }
            }
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = sleep(Duration::from_millis(service.config.load_retry_delay_ms)) => {}
            }
        }
    });
}

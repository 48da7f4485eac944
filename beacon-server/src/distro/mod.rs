//! The distro replication protocol.
//!
//! The ephemeral dataset is sharded across peers by the mapper; each peer
//! authoritatively mutates its shard and best-effort replicates to the
//! others. Peers advertise per-key checksums on a fixed cadence and pull
//! authoritative data for whatever mismatches.

mod task;

pub use task::SyncScheduler;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;

use beacon_core::datum::deserialize_checksum_map;
use beacon_core::datum::deserialize_datum_map;
use beacon_core::key;
use beacon_core::key::DEFAULT_GROUP;
use beacon_core::key::SERVICE_META_KEY_PREFIX;
use beacon_core::ConsistencyError;
use beacon_core::DataOperation;
use beacon_core::DataStore;
use beacon_core::Datum;
use beacon_core::DistroMapper;
use beacon_core::Instances;
use beacon_core::Listeners;
use beacon_core::Notifier;
use beacon_core::Record;
use beacon_core::RecordListener;
use beacon_core::Result;
use beacon_core::ServerConfig;
use beacon_core::ServerStatus;
use beacon_core::ServiceMeta;

use crate::transport::DistroTransport;

pub struct DistroConsistencyService {
    config: Arc<ServerConfig>,
    mapper: Arc<DistroMapper>,
    store: Arc<DataStore>,
    listeners: Arc<Listeners>,
    notifier: Notifier,
    transport: Arc<dyn DistroTransport>,
    sync: SyncScheduler,
    /// Per-source guard serializing verify processing.
    sync_checksum_tasks: DashMap<String, ()>,
    /// Set once the warm-up snapshot has been applied.
    initialized: AtomicBool,
    /// Operator override reported through `is_available`.
    overridden_status: RwLock<Option<ServerStatus>>,
    shutdown: watch::Receiver<()>,
}

impl DistroConsistencyService {
    pub fn new(
        config: Arc<ServerConfig>,
        mapper: Arc<DistroMapper>,
        store: Arc<DataStore>,
        listeners: Arc<Listeners>,
        transport: Arc<dyn DistroTransport>,
        shutdown: watch::Receiver<()>,
    ) -> Arc<Self> {
        let notifier = Notifier::spawn(store.clone(), listeners.clone(), shutdown.clone());
        let sync = SyncScheduler::spawn(
            store.clone(),
            transport.clone(),
            config.sync_delay_ms(),
            shutdown.clone(),
        );
        Arc::new(Self {
            config,
            mapper,
            store,
            listeners,
            notifier,
            transport,
            sync,
            sync_checksum_tasks: DashMap::new(),
            initialized: AtomicBool::new(false),
            overridden_status: RwLock::new(None),
            shutdown,
        })
    }

    /// Spawns the periodic verify advertisement and the warm-up load
    /// task.
    pub fn start(self: &Arc<Self>) {
        task::spawn_verify_task(
            self.config.clone(),
            self.mapper.clone(),
            self.store.clone(),
            self.transport.clone(),
            self.shutdown.clone(),
        );
        task::spawn_load_task(self.clone(), self.shutdown.clone());
    }

    /// Owner-side write: install locally, notify, and schedule
    /// replication to every other peer.
    pub fn put(
        &self,
        key: &str,
        value: Instances,
    ) -> Result<()> {
        self.on_put(key, value);
        self.sync
            .schedule(key, DataOperation::Change, self.mapper.other_peers());
        Ok(())
    }

    /// Owner-side delete; the key's listeners are dropped with it.
    pub fn remove(
        &self,
        key: &str,
    ) -> Result<()> {
        self.on_remove(key);
        self.listeners.remove_key(key);
        self.sync
            .schedule(key, DataOperation::Delete, self.mapper.other_peers());
        Ok(())
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<Datum> {
        self.store.get(key)
    }

    /// Local mutation without replication: used by the owner path and by
    /// incoming sync bodies.
    pub fn on_put(
        &self,
        key: &str,
        value: Instances,
    ) {
        if key::match_ephemeral_instance_list_key(key) {
            self.store.put(key, value);
        }
        if !self.listeners.contains_key(key) {
            return;
        }
        self.notifier.add_task(key, DataOperation::Change);
    }

    pub fn on_remove(
        &self,
        key: &str,
    ) {
        self.store.remove(key);
        if !self.listeners.contains_key(key) {
            return;
        }
        self.notifier.add_task(key, DataOperation::Delete);
    }

    /// Handles a peer's checksum advertisement.
    ///
    /// At most one verify per source is processed at a time; a concurrent
    /// arrival returns immediately. The guard is released on every path.
    pub async fn on_receive_checksums(
        &self,
        checksum_map: HashMap<String, String>,
        source: &str,
    ) {
        if self
            .sync_checksum_tasks
            .insert(source.to_string(), ())
            .is_some()
        {
            warn!(%source, "verify already in process with this source, skipped");
            return;
        }

        if let Err(e) = self.reconcile(checksum_map, source).await {
            error!(%source, error = %e, "verify round aborted");
        }

        self.sync_checksum_tasks.remove(source);
    }

    async fn reconcile(
        &self,
        checksum_map: HashMap<String, String>,
        source: &str,
    ) -> Result<()> {
        let mut to_update: Vec<String> = Vec::new();
        for (key, checksum) in &checksum_map {
            let service_name = key::service_name(key)?;
            if self.mapper.responsible(service_name) {
                // The source believes it owns a key this node owns; the
                // topology views disagree and nothing may be mutated.
                return Err(ConsistencyError::OwnershipConflict {
                    key: key.clone(),
                    source_peer: source.to_string(),
                }
                .into());
            }
            let matches = self
                .store
                .get(key)
                .is_some_and(|datum| datum.checksum == *checksum);
            if !matches {
                to_update.push(key.clone());
            }
        }

        let mut to_remove: Vec<String> = Vec::new();
        for key in self.store.keys() {
            let Ok(service_name) = key::service_name(&key) else {
                continue;
            };
            if self.mapper.map_srv(service_name) != source {
                continue;
            }
            if !checksum_map.contains_key(&key) {
                // The owner stopped advertising it; it is gone.
                to_remove.push(key);
            }
        }

        info!(
            %source,
            to_remove = ?to_remove,
            to_update = ?to_update,
            "verify round computed"
        );

        for key in &to_remove {
            self.on_remove(key);
        }

        if to_update.is_empty() {
            return Ok(());
        }

        let body = self.transport.query(source, to_update).await?;
        self.process_data(&body)?;
        Ok(())
    }

    /// Installs a serialized `key → Datum` map received from a peer
    /// (sync body, pull response or warm-up snapshot).
    pub fn process_data(
        &self,
        bytes: &[u8],
    ) -> Result<()> {
        let datum_map = deserialize_datum_map(bytes)?;
        if datum_map.is_empty() {
            return Ok(());
        }

        let mut installed: Vec<(&String, &Datum)> = Vec::new();
        for (key, datum) in &datum_map {
            if !self.store.install(datum.clone()) {
                continue;
            }
            installed.push((key, datum));

            if !self.listeners.contains_key(key) && self.config.default_instance_ephemeral {
                // Pretty sure the service does not exist yet; have the
                // meta listener create the container before hosts are
                // delivered.
                info!(%key, "creating service container for replicated key");
                self.create_service_container(key)?;
            }
        }

        for (key, datum) in installed {
            let snapshot = self.listeners.snapshot(key);
            if snapshot.is_empty() {
                warn!(%key, "listener not found, skipping delivery");
                continue;
            }

            let record = Record::Instances(datum.value.clone());
            let mut delivered = true;
            for listener in snapshot {
                if let Err(e) = listener.on_change(key, &record) {
                    // First fault aborts delivery for this key; the next
                    // key still gets processed.
                    error!(%key, error = %e, "error while executing listener");
                    delivered = false;
                    break;
                }
            }
            if delivered {
                // The store already holds this datum; writing it again
                // restores it in case a listener raced a local mutation
                // of the same key.
                self.store.reinstall(datum.clone());
            }
        }
        Ok(())
    }

    fn create_service_container(
        &self,
        key: &str,
    ) -> Result<()> {
        let namespace_id = key::namespace(key)?.to_string();
        let service_name = key::service_name(key)?.to_string();

        let meta = ServiceMeta::new(namespace_id.clone(), DEFAULT_GROUP, service_name.clone());

        let Some(meta_listener) = self.listeners.first(SERVICE_META_KEY_PREFIX) else {
            return Err(ConsistencyError::MetaListenerMissing {
                key: key.to_string(),
            }
            .into());
        };
        let meta_key = key::build_service_meta_key(&namespace_id, &service_name);
        meta_listener.on_change(&meta_key, &Record::Metadata(meta))
    }

    /// Incoming sync body from an owner peer.
    pub fn process_sync(
        &self,
        op: DataOperation,
        bytes: &[u8],
    ) -> Result<()> {
        match op {
            DataOperation::Change => self.process_data(bytes),
            DataOperation::Delete => {
                let keys: Vec<String> =
                    serde_json::from_slice(bytes).map_err(ConsistencyError::Payload)?;
                for key in keys {
                    self.on_remove(&key);
                }
                Ok(())
            }
        }
    }

    /// Incoming verify body; `source` is the advertising peer.
    pub async fn process_verify(
        &self,
        bytes: &[u8],
        source: &str,
    ) -> bool {
        match deserialize_checksum_map(bytes) {
            Ok(map) => {
                self.on_receive_checksums(map, source).await;
                true
            }
            Err(e) => {
                error!(%source, error = %e, "undecodable verify body");
                false
            }
        }
    }

    /// Full snapshot install; `false` means the payload was rejected and
    /// the warm-up must retry.
    pub fn process_snapshot(
        &self,
        bytes: &[u8],
    ) -> bool {
        match self.process_data(bytes) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "snapshot rejected");
                false
            }
        }
    }

    pub fn listen(
        &self,
        key: &str,
        listener: Arc<dyn RecordListener>,
    ) {
        self.listeners.listen(key, listener);
    }

    pub fn unlisten(
        &self,
        key: &str,
        listener: &Arc<dyn RecordListener>,
    ) {
        self.listeners.unlisten(key, listener);
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) || !self.config.data_warmup
    }

    pub fn is_available(&self) -> bool {
        self.is_initialized() || *self.overridden_status.read() == Some(ServerStatus::Up)
    }

    pub fn error_msg(&self) -> Option<String> {
        if self.is_available() {
            None
        } else {
            Some("distro protocol is not initialized".to_string())
        }
    }

    pub fn set_overridden_status(
        &self,
        status: Option<ServerStatus>,
    ) {
        *self.overridden_status.write() = status;
    }

    pub fn notify_task_size(&self) -> usize {
        self.notifier.task_size()
    }
}

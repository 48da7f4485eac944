//! The host reactor: the client's local view of every subscribed
//! service.
//!
//! `ReactorCore` holds the shared cache plus the diff/publish logic; the
//! push receiver and the failover reactor hold non-owning handles to it.
//! `HostReactor` owns the children and tears them down last.

mod update_task;

pub(crate) use update_task::next_delay;
pub(crate) use update_task::spawn_update_task;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio::time::Duration;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use beacon_core::ConsistencyError;
use beacon_core::Instance;
use beacon_core::Result;
use beacon_core::ServiceInfo;

use crate::api::NamingApi;
use crate::beat::BeatReactor;
use crate::cache;
use crate::config::ClientConfig;
use crate::event::EventListener;
use crate::event::InstancesChangeEvent;
use crate::event::InstancesChangeNotifier;
use crate::failover::FailoverReactor;
use crate::push_receiver::PushReceiver;

/// Shared state and logic of one reactor; children reference it without
/// owning it.
pub struct ReactorCore {
    pub(crate) config: ClientConfig,
    pub(crate) api: Arc<dyn NamingApi>,
    pub(crate) service_info_map: Arc<DashMap<String, ServiceInfo>>,
    /// One-shot rendezvous per service for in-flight first fetches.
    pub(crate) updating: DashMap<String, Arc<Notify>>,
    pub(crate) beats: Arc<BeatReactor>,
    /// Distinguishes this reactor's events from other reactors in the
    /// same process.
    pub(crate) event_scope: String,
    pub(crate) event_tx: broadcast::Sender<InstancesChangeEvent>,
    pub(crate) push_port: AtomicU16,
    pub(crate) cache_dir: PathBuf,
}

impl ReactorCore {
    pub(crate) fn push_port(&self) -> u16 {
        self.push_port.load(Ordering::SeqCst)
    }

    pub(crate) fn set_push_port(
        &self,
        port: u16,
    ) {
        self.push_port.store(port, Ordering::SeqCst);
    }

    /// Parses a server payload, diffs it against the cached view and
    /// publishes/persists on any change. The received payload always
    /// wins the cache slot, even when its `lastRefTime` regresses.
    pub(crate) fn process_service_json(
        &self,
        json: &str,
    ) -> Result<ServiceInfo> {
        let mut new_info: ServiceInfo =
            serde_json::from_str(json).map_err(ConsistencyError::Payload)?;
        if new_info.name.is_empty() {
            return Err(ConsistencyError::MalformedKey("service info without a name".into()).into());
        }

        let key = new_info.key();
        let old = self.service_info_map.get(&key).map(|e| e.clone());

        if self.config.push_empty_protection && !new_info.validate() {
            // Empty or broken payload; keep the cached view untouched.
            return Ok(old.unwrap_or(new_info));
        }

        new_info.json_from_server = json.to_string();

        let mut changed = false;
        match &old {
            Some(old_info) => {
                if old_info.last_ref_time > new_info.last_ref_time {
                    warn!(
                        %key,
                        old = old_info.last_ref_time,
                        new = new_info.last_ref_time,
                        "out of date data received"
                    );
                }
                self.service_info_map.insert(key.clone(), new_info.clone());

                let old_hosts: HashMap<String, &Instance> =
                    old_info.hosts.iter().map(|h| (h.to_inet_addr(), h)).collect();
                let new_hosts: HashMap<String, &Instance> =
                    new_info.hosts.iter().map(|h| (h.to_inet_addr(), h)).collect();

                let mut added: Vec<Instance> = Vec::new();
                let mut modified: Vec<Instance> = Vec::new();
                let mut removed: Vec<Instance> = Vec::new();

                for (addr, host) in &new_hosts {
                    match old_hosts.get(addr) {
                        Some(old_host) => {
                            if old_host.canonical_string() != host.canonical_string() {
                                modified.push((*host).clone());
                            }
                        }
                        None => added.push((*host).clone()),
                    }
                }
                for (addr, host) in &old_hosts {
                    if !new_hosts.contains_key(addr) {
                        removed.push((*host).clone());
                    }
                }

                if !added.is_empty() {
                    changed = true;
                    info!(%key, count = added.len(), "new ips");
                }
                if !removed.is_empty() {
                    changed = true;
                    info!(%key, count = removed.len(), "removed ips");
                }
                if !modified.is_empty() {
                    changed = true;
                    info!(%key, count = modified.len(), "modified ips");
                    self.refresh_beats(&new_info.name, &modified);
                }
            }
            None => {
                changed = true;
                info!(%key, count = new_info.ip_count(), "init new ips");
                self.service_info_map.insert(key.clone(), new_info.clone());
            }
        }

        if changed {
            self.publish_change(&new_info);
            if let Err(e) = cache::write(&new_info, &self.cache_dir) {
                error!(%key, error = %e, "failed to persist service view");
            }
        }
        Ok(new_info)
    }

    /// Modified ephemeral hosts with an active beat record get their
    /// beat info rebuilt so server-driven timing changes propagate.
    fn refresh_beats(
        &self,
        grouped_service_name: &str,
        modified: &[Instance],
    ) {
        for instance in modified {
            if !instance.ephemeral {
                continue;
            }
            if self
                .beats
                .has_beat(grouped_service_name, &instance.ip, instance.port)
            {
                self.beats
                    .add_beat_info(BeatReactor::build_beat_info(grouped_service_name, instance));
            }
        }
    }

    fn publish_change(
        &self,
        info: &ServiceInfo,
    ) {
        let event = InstancesChangeEvent {
            scope: self.event_scope.clone(),
            service_name: info.name.clone(),
            group_name: info.group_name.clone(),
            clusters: info.clusters.clone(),
            hosts: info.hosts.clone(),
        };
        // No live receiver is fine.
        let _ = self.event_tx.send(event);
    }

    /// One authoritative pull from the server; non-empty answers go
    /// through the diff path.
    pub(crate) async fn update_service(
        &self,
        service_name: &str,
        clusters: &str,
    ) -> Result<()> {
        let json = self
            .api
            .query_list(service_name, clusters, self.push_port(), false)
            .await?;
        if !json.is_empty() {
            self.process_service_json(&json)?;
        }
        Ok(())
    }

    /// Keeps the server's push session alive without touching the local
    /// cache; a push may already have delivered something newer than
    /// what this query returns.
    pub(crate) async fn refresh_only(
        &self,
        service_name: &str,
        clusters: &str,
    ) {
        if let Err(e) = self
            .api
            .query_list(service_name, clusters, self.push_port(), false)
            .await
        {
            warn!(service = %service_name, error = %e, "refresh-only query failed");
        }
    }
}

pub struct HostReactor {
    core: Arc<ReactorCore>,
    notifier: Arc<InstancesChangeNotifier>,
    failover: Arc<FailoverReactor>,
    push_receiver: PushReceiver,
    future_map: Arc<DashMap<String, JoinHandle<()>>>,
    /// Guards the check-then-insert on `future_map`.
    future_guard: Mutex<()>,
    shutdown_tx: watch::Sender<()>,
}

impl HostReactor {
    pub async fn new(
        api: Arc<dyn NamingApi>,
        config: ClientConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let cache_dir = config.namespace_cache_dir();

        let service_info_map: Arc<DashMap<String, ServiceInfo>> = Arc::new(DashMap::new());
        if config.load_cache_at_start {
            for (key, info) in cache::read(&cache_dir) {
                service_info_map.insert(key, info);
            }
            info!(loaded = service_info_map.len(), "service views loaded from disk");
        }

        let beats = Arc::new(BeatReactor::new(api.clone(), shutdown_rx.clone()));
        let (event_tx, event_rx) = broadcast::channel(16_384);
        let event_scope = Uuid::new_v4().to_string();

        let failover_dir = config.failover_dir();
        let switch_refresh_ms = config.failover_switch_refresh_ms;
        let snapshot_period_ms = config.failover_snapshot_period_ms;

        let core = Arc::new(ReactorCore {
            config,
            api,
            service_info_map: service_info_map.clone(),
            updating: DashMap::new(),
            beats,
            event_scope: event_scope.clone(),
            event_tx,
            push_port: AtomicU16::new(0),
            cache_dir,
        });

        let notifier = InstancesChangeNotifier::new(event_scope);
        notifier.spawn_dispatcher(event_rx, shutdown_rx.clone());

        let push_receiver = PushReceiver::spawn(core.clone(), shutdown_rx.clone()).await?;

        let failover = FailoverReactor::new(failover_dir);
        failover.start(
            service_info_map,
            switch_refresh_ms,
            snapshot_period_ms,
            shutdown_rx,
        );

        Ok(Self {
            core,
            notifier,
            failover,
            push_receiver,
            future_map: Arc::new(DashMap::new()),
            future_guard: Mutex::new(()),
            shutdown_tx,
        })
    }

    /// The cached view of a service, fetched synchronously on first use.
    ///
    /// Concurrent first fetches rendezvous on the entry: one caller
    /// queries, the rest wait (bounded) for its answer. With the
    /// failover switch on, reads come from the snapshot instead.
    pub async fn get_service_info(
        &self,
        service_name: &str,
        clusters: &str,
    ) -> Result<ServiceInfo> {
        debug!(failover = self.failover.is_failover_switch(), "get service info");
        let key = ServiceInfo::build_key(service_name, clusters);
        if self.failover.is_failover_switch() {
            return Ok(self.failover.get_service(&key));
        }

        let cached = self.core.service_info_map.get(&key).map(|e| e.clone());
        match cached {
            None => {
                self.core
                    .service_info_map
                    .insert(key.clone(), ServiceInfo::new(service_name, clusters));

                let notify = Arc::new(Notify::new());
                self.core
                    .updating
                    .insert(service_name.to_string(), notify.clone());

                if let Err(e) = self.core.update_service(service_name, clusters).await {
                    warn!(service = %service_name, error = %e, "first fetch failed");
                }

                self.core.updating.remove(service_name);
                notify.notify_waiters();
            }
            Some(_) => {
                if let Some(notify) = self.core.updating.get(service_name).map(|e| e.clone()) {
                    // Hold a moment waiting for the in-flight update.
                    let hold = Duration::from_millis(self.core.config.update_hold_interval_ms);
                    if timeout(hold, notify.notified()).await.is_err() {
                        debug!(service = %service_name, "first-fetch rendezvous timed out");
                    }
                }
            }
        }

        self.schedule_update_if_absent(service_name, clusters);

        Ok(self
            .core
            .service_info_map
            .get(&key)
            .map(|e| e.clone())
            .unwrap_or_else(|| ServiceInfo::new(service_name, clusters)))
    }

    /// Bypasses the cache entirely.
    pub async fn get_service_info_directly_from_server(
        &self,
        service_name: &str,
        clusters: &str,
    ) -> Result<ServiceInfo> {
        let json = self.core.api.query_list(service_name, clusters, 0, false).await?;
        serde_json::from_str(&json)
            .map_err(|e| ConsistencyError::Payload(e).into())
    }

    /// Registers a change listener and primes the cache.
    pub async fn subscribe(
        &self,
        service_name: &str,
        clusters: &str,
        listener: Arc<dyn EventListener>,
    ) -> Result<ServiceInfo> {
        self.notifier.register_listener(service_name, clusters, listener);
        self.get_service_info(service_name, clusters).await
    }

    /// Drops a change listener; the last one also stops the update task,
    /// which evicts the cache entry on its next tick.
    pub fn unsubscribe(
        &self,
        service_name: &str,
        clusters: &str,
        listener: &Arc<dyn EventListener>,
    ) {
        self.notifier.deregister_listener(service_name, clusters, listener);
        if !self.notifier.is_subscribed(service_name, clusters) {
            self.future_map
                .remove(&ServiceInfo::build_key(service_name, clusters));
        }
    }

    pub fn subscribed_keys(&self) -> Vec<String> {
        self.notifier.subscribed_keys()
    }

    /// Starts the recurring update task for a view unless one runs
    /// already (double-checked under the future-map guard).
    pub fn schedule_update_if_absent(
        &self,
        service_name: &str,
        clusters: &str,
    ) {
        let key = ServiceInfo::build_key(service_name, clusters);
        if self.future_map.contains_key(&key) {
            return;
        }

        let _guard = self.future_guard.lock();
        if self.future_map.contains_key(&key) {
            return;
        }

        let handle = spawn_update_task(
            self.core.clone(),
            self.notifier.clone(),
            self.future_map.clone(),
            service_name.to_string(),
            clusters.to_string(),
            self.shutdown_tx.subscribe(),
        );
        self.future_map.insert(key, handle);
    }

    /// Feeds a raw server payload through the diff path (push receiver
    /// and tests).
    pub fn process_service_json(
        &self,
        json: &str,
    ) -> Result<ServiceInfo> {
        self.core.process_service_json(json)
    }

    pub fn beat_reactor(&self) -> &Arc<BeatReactor> {
        &self.core.beats
    }

    pub fn push_port(&self) -> u16 {
        self.push_receiver.port()
    }

    pub fn cached_view(
        &self,
        service_name: &str,
        clusters: &str,
    ) -> Option<ServiceInfo> {
        self.core
            .service_info_map
            .get(&ServiceInfo::build_key(service_name, clusters))
            .map(|e| e.clone())
    }

    /// Stops children first (push receiver, failover writer, beat and
    /// update tasks), then drops the shared core.
    pub fn shutdown(&self) {
        info!("host reactor shutting down");
        let _ = self.shutdown_tx.send(());
        self.core.beats.stop_all();
        for entry in self.future_map.iter() {
            entry.value().abort();
        }
        self.future_map.clear();
    }
}

#[cfg(test)]
mod reactor_test;

//! Server-side service container.
//!
//! A `Service` holds the live instance state for one (namespace, group,
//! service) and is itself the listener of the service's instance-list
//! key: every replicated or local mutation flows through `on_change`,
//! which swaps the cluster map in one write-lock section.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use beacon_core::key::grouped_service_name;
use beacon_core::key::DEFAULT_GROUP;
use beacon_core::key::SERVICE_NAME_GROUP_CONNECTOR;
use beacon_core::utils::now_millis;
use beacon_core::ClientBeat;
use beacon_core::Instance;
use beacon_core::Instances;
use beacon_core::NamingError;
use beacon_core::Record;
use beacon_core::RecordListener;
use beacon_core::Result;
use beacon_core::ServiceMeta;

pub struct Service {
    namespace_id: String,
    group_name: String,
    /// Grouped service name (`group@@service`).
    name: String,
    last_modified_millis: AtomicU64,
    checksum: Mutex<String>,
    clusters: RwLock<HashMap<String, Vec<Instance>>>,
}

impl Service {
    pub fn new(
        namespace_id: impl Into<String>,
        service_name: &str,
    ) -> Self {
        let name = grouped_service_name(service_name);
        let group_name = name
            .split(SERVICE_NAME_GROUP_CONNECTOR)
            .next()
            .unwrap_or(DEFAULT_GROUP)
            .to_string();
        let service = Self {
            namespace_id: namespace_id.into(),
            group_name,
            name,
            last_modified_millis: AtomicU64::new(now_millis()),
            checksum: Mutex::new(String::new()),
            clusters: RwLock::new(HashMap::new()),
        };
        service.recalculate_checksum();
        service
    }

    pub fn from_meta(meta: &ServiceMeta) -> Self {
        let service = Self::new(meta.namespace_id.clone(), &meta.name);
        service
            .last_modified_millis
            .store(meta.last_modified_millis, Ordering::Relaxed);
        service
    }

    pub fn namespace_id(&self) -> &str {
        &self.namespace_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn last_modified_millis(&self) -> u64 {
        self.last_modified_millis.load(Ordering::Relaxed)
    }

    pub fn checksum(&self) -> String {
        self.checksum.lock().clone()
    }

    pub fn meta(&self) -> ServiceMeta {
        let mut meta = ServiceMeta::new(self.namespace_id.clone(), self.group_name.clone(), self.name.clone());
        meta.last_modified_millis = self.last_modified_millis();
        meta
    }

    /// Snapshot of the service's instances across clusters.
    pub fn all_instances(
        &self,
        ephemeral_only: bool,
    ) -> Vec<Instance> {
        self.clusters
            .read()
            .values()
            .flatten()
            .filter(|i| !ephemeral_only || i.ephemeral)
            .cloned()
            .collect()
    }

    pub fn ip_count(&self) -> usize {
        self.clusters.read().values().map(Vec::len).sum()
    }

    /// Replaces the instance state from a replicated instance list.
    pub fn update_instances(
        &self,
        instances: &Instances,
    ) {
        let mut grouped: HashMap<String, Vec<Instance>> = HashMap::new();
        for instance in &instances.instance_list {
            grouped
                .entry(instance.cluster_name.clone())
                .or_default()
                .push(instance.clone());
        }

        let count = instances.instance_list.len();
        *self.clusters.write() = grouped;
        self.last_modified_millis.store(now_millis(), Ordering::Relaxed);
        self.recalculate_checksum();
        debug!(service = %self.name, count, "instance list updated");
    }

    /// Applies one client beat: refresh `last_beat`, resurrect the
    /// instance when it was unhealthy. Returns whether health flipped.
    pub fn process_client_beat(
        &self,
        beat: &ClientBeat,
    ) -> Result<bool> {
        let mut clusters = self.clusters.write();
        let instance = clusters
            .get_mut(&beat.cluster)
            .and_then(|list| list.iter_mut().find(|i| i.ip == beat.ip && i.port == beat.port))
            .ok_or_else(|| NamingError::InstanceNotFound {
                service_name: self.name.clone(),
                ip: beat.ip.clone(),
                port: beat.port,
            })?;

        instance.last_beat = now_millis();
        if instance.marked {
            return Ok(false);
        }
        if !instance.healthy {
            instance.healthy = true;
            info!(
                service = %self.name,
                instance = %instance.to_inet_addr(),
                "instance recovered by client beat"
            );
            drop(clusters);
            self.recalculate_checksum();
            return Ok(true);
        }
        Ok(false)
    }

    /// Health pass of the liveness sweep: flips unmarked, healthy
    /// instances whose last beat is older than their heartbeat timeout.
    /// Returns the instances flipped by this call, so running the sweep
    /// twice without new beats flips nothing the second time.
    pub fn sweep_unhealthy(
        &self,
        now: u64,
    ) -> Vec<Instance> {
        let mut flipped = Vec::new();
        {
            let mut clusters = self.clusters.write();
            for instance in clusters.values_mut().flatten() {
                if !instance.ephemeral || instance.marked || !instance.healthy {
                    continue;
                }
                if now.saturating_sub(instance.last_beat) > instance.heartbeat_timeout_ms {
                    instance.healthy = false;
                    warn!(
                        service = %self.name,
                        instance = %instance.to_inet_addr(),
                        cluster = %instance.cluster_name,
                        timeout_ms = instance.heartbeat_timeout_ms,
                        last_beat = instance.last_beat,
                        "instance disabled, client timeout"
                    );
                    flipped.push(instance.clone());
                }
            }
        }
        if !flipped.is_empty() {
            self.recalculate_checksum();
        }
        flipped
    }

    /// Expiry pass of the liveness sweep: unmarked instances silent past
    /// their delete timeout. The caller deletes them through the registry
    /// mutation path; nothing is removed here.
    pub fn expired_instances(
        &self,
        now: u64,
    ) -> Vec<Instance> {
        self.clusters
            .read()
            .values()
            .flatten()
            .filter(|i| i.ephemeral && !i.marked)
            .filter(|i| now.saturating_sub(i.last_beat) > i.delete_timeout_ms)
            .cloned()
            .collect()
    }

    fn recalculate_checksum(&self) {
        let mut rendered: Vec<String> = self
            .clusters
            .read()
            .values()
            .flatten()
            .map(Instance::canonical_string)
            .collect();
        rendered.sort();
        let content = format!("{}|{}", self.name, rendered.join("|"));
        *self.checksum.lock() = format!("{:08x}", crc32fast::hash(content.as_bytes()));
    }
}

impl RecordListener for Service {
    fn on_change(
        &self,
        key: &str,
        record: &Record,
    ) -> Result<()> {
        match record {
            Record::Instances(instances) => {
                self.update_instances(instances);
                Ok(())
            }
            Record::Metadata(_) => {
                debug!(%key, "service container ignores meta records");
                Ok(())
            }
        }
    }

    fn on_delete(
        &self,
        _key: &str,
    ) -> Result<()> {
        *self.clusters.write() = HashMap::new();
        self.last_modified_millis.store(now_millis(), Ordering::Relaxed);
        self.recalculate_checksum();
        Ok(())
    }
}

//! Service registry: the container map plus the mutation operations
//! every write path funnels through.
//!
//! The registry is the service-meta listener of the consistency service;
//! replicated keys with no local container get one created here. Each
//! container is in turn the listener of its own instance-list key, so
//! local and replicated mutations converge on the same `Service` state.

use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use beacon_core::key;
use beacon_core::key::grouped_service_name;
use beacon_core::utils::now_millis;
use beacon_core::ClientBeat;
use beacon_core::DistroMapper;
use beacon_core::EventPublisher;
use beacon_core::Instance;
use beacon_core::Instances;
use beacon_core::NamingError;
use beacon_core::Record;
use beacon_core::RecordListener;
use beacon_core::Result;
use beacon_core::ServerConfig;
use beacon_core::ServiceInfo;
use beacon_core::ServiceMeta;

use crate::beat::ClientBeatCheckTask;
use crate::beat::InstanceDeleteRequest;
use crate::beat::InstanceOperator;
use crate::distro::DistroConsistencyService;
use crate::push::ServicePush;
use crate::service::Service;

/// Answer to a client beat.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatResponse {
    pub client_beat_interval_ms: u64,
    pub healthy: bool,
}

pub struct ServiceRegistry {
    consistency: Arc<DistroConsistencyService>,
    config: Arc<ServerConfig>,
    mapper: Arc<DistroMapper>,
    events: EventPublisher,
    push: Arc<dyn ServicePush>,
    services: DashMap<String, Arc<Service>>,
    beat_tasks: DashMap<String, JoinHandle<()>>,
    shutdown: watch::Receiver<()>,
    /// Handed to sweep operators so deletes can call back in without an
    /// ownership cycle.
    self_ref: Weak<ServiceRegistry>,
}

impl ServiceRegistry {
    pub fn new(
        consistency: Arc<DistroConsistencyService>,
        config: Arc<ServerConfig>,
        mapper: Arc<DistroMapper>,
        events: EventPublisher,
        push: Arc<dyn ServicePush>,
        shutdown: watch::Receiver<()>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            consistency,
            config,
            mapper,
            events,
            push,
            services: DashMap::new(),
            beat_tasks: DashMap::new(),
            shutdown,
            self_ref: self_ref.clone(),
        })
    }

    /// Registers this registry as the cluster's service-meta listener.
    /// Must run before any replicated data arrives.
    pub fn start(self: &Arc<Self>) {
        let listener: Arc<dyn RecordListener> = self.clone();
        self.consistency.listen(key::SERVICE_META_KEY_PREFIX, listener);
    }

    fn service_key(
        namespace_id: &str,
        grouped_name: &str,
    ) -> String {
        format!("{namespace_id}{}{grouped_name}", key::NAMESPACE_KEY_CONNECTOR)
    }

    pub fn get_service(
        &self,
        namespace_id: &str,
        service_name: &str,
    ) -> Option<Arc<Service>> {
        let grouped = grouped_service_name(service_name);
        self.services
            .get(&Self::service_key(namespace_id, &grouped))
            .map(|s| s.clone())
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Creates the container for a service if absent, wires it as the
    /// listener of its instance-list key and schedules its liveness
    /// sweep.
    pub fn create_service_if_absent(
        &self,
        meta: &ServiceMeta,
    ) -> Arc<Service> {
        let service_key = Self::service_key(&meta.namespace_id, &meta.name);
        if let Some(existing) = self.services.get(&service_key) {
            return existing.clone();
        }

        let service = Arc::new(Service::from_meta(meta));
        let previous = self.services.insert(service_key.clone(), service.clone());
        if previous.is_some() {
            // Lost a creation race; the maps hold the newer container and
            // both wire the same listeners idempotently.
            warn!(service = %meta.name, "service container replaced concurrently");
        }
        info!(namespace = %meta.namespace_id, service = %meta.name, "service container created");

        let instance_key = key::build_ephemeral_instance_list_key(&meta.namespace_id, &meta.name);
        let listener: Arc<dyn RecordListener> = service.clone();
        self.consistency.listen(&instance_key, listener);

        let operator: Arc<dyn InstanceOperator> = Arc::new(RegistryInstanceOperator {
            registry: self.self_ref.clone(),
        });
        let task = ClientBeatCheckTask::new(
            service.clone(),
            self.config.clone(),
            self.mapper.clone(),
            self.events.clone(),
            self.push.clone(),
            operator,
        );
        let handle = task.spawn(self.shutdown.clone());
        if let Some(old) = self.beat_tasks.insert(service_key, handle) {
            old.abort();
        }

        service
    }

    /// Registers one instance: merge into the current authoritative list
    /// and publish through the consistency service.
    pub fn register_instance(
        &self,
        namespace_id: &str,
        service_name: &str,
        mut instance: Instance,
    ) -> Result<()> {
        if service_name.is_empty() {
            return Err(NamingError::EmptyServiceName.into());
        }
        let grouped = grouped_service_name(service_name);
        let meta = ServiceMeta::new(namespace_id, group_of(&grouped), grouped.clone());
        self.create_service_if_absent(&meta);

        instance.service_name = grouped.clone();
        instance.last_beat = now_millis();

        let instance_key = key::build_instance_list_key(namespace_id, &grouped, instance.ephemeral);
        let mut list = self.current_instances(&instance_key);
        list.retain(|i| i.datum_key() != instance.datum_key());
        list.push(instance);

        self.consistency.put(&instance_key, Instances::new(list))
    }

    /// Removes one instance from the authoritative list.
    pub fn deregister_instance(
        &self,
        namespace_id: &str,
        service_name: &str,
        cluster_name: &str,
        ip: &str,
        port: u16,
        ephemeral: bool,
    ) -> Result<()> {
        let grouped = grouped_service_name(service_name);
        let instance_key = key::build_instance_list_key(namespace_id, &grouped, ephemeral);

        let mut list = self.current_instances(&instance_key);
        let before = list.len();
        list.retain(|i| !(i.ip == ip && i.port == port && i.cluster_name == cluster_name));
        if list.len() == before {
            // Nothing to remove; stay idempotent for sweep retries.
            return Ok(());
        }
        self.consistency.put(&instance_key, Instances::new(list))
    }

    /// Applies one client beat; unknown instances are re-registered from
    /// the beat payload so a restarted server converges on its clients.
    pub fn process_client_beat(
        &self,
        namespace_id: &str,
        service_name: &str,
        beat: &ClientBeat,
    ) -> Result<BeatResponse> {
        let grouped = grouped_service_name(service_name);
        let service = self.get_service(namespace_id, &grouped);

        let flipped = match service.as_ref().map(|s| s.process_client_beat(beat)) {
            Some(Ok(flipped)) => flipped,
            Some(Err(_)) | None => {
                info!(
                    service = %grouped,
                    instance = %format!("{}:{}", beat.ip, beat.port),
                    "beat for unknown instance, re-registering"
                );
                let mut instance = Instance::new(beat.ip.clone(), beat.port);
                instance.cluster_name = beat.cluster.clone();
                instance.weight = beat.weight;
                instance.metadata = beat.metadata.clone();
                self.register_instance(namespace_id, &grouped, instance)?;
                false
            }
        };

        if flipped {
            self.push.service_changed(namespace_id, &grouped);
        }

        Ok(BeatResponse {
            client_beat_interval_ms: beat.period,
            healthy: true,
        })
    }

    /// Builds the client view of a service, optionally filtered by
    /// cluster list and health.
    pub fn service_info(
        &self,
        namespace_id: &str,
        service_name: &str,
        clusters: &str,
        healthy_only: bool,
    ) -> ServiceInfo {
        let grouped = grouped_service_name(service_name);
        let mut info = ServiceInfo::new(grouped.clone(), clusters);
        info.group_name = group_of(&grouped).to_string();
        info.last_ref_time = now_millis();

        let Some(service) = self.get_service(namespace_id, &grouped) else {
            return info;
        };

        let wanted: Vec<&str> = clusters.split(',').filter(|c| !c.is_empty()).collect();
        info.checksum = service.checksum();
        info.hosts = service
            .all_instances(false)
            .into_iter()
            .filter(|i| wanted.is_empty() || wanted.contains(&i.cluster_name.as_str()))
            .filter(|i| !healthy_only || i.healthy)
            .filter(|i| i.enabled)
            .collect();
        info
    }

    fn current_instances(
        &self,
        instance_key: &str,
    ) -> Vec<Instance> {
        self.consistency
            .get(instance_key)
            .map(|datum| datum.value.instance_list)
            .unwrap_or_default()
    }

    fn remove_service(
        &self,
        namespace_id: &str,
        grouped_name: &str,
    ) {
        let service_key = Self::service_key(namespace_id, grouped_name);
        if self.services.remove(&service_key).is_some() {
            info!(namespace = %namespace_id, service = %grouped_name, "service container removed");
        }
        if let Some((_, handle)) = self.beat_tasks.remove(&service_key) {
            handle.abort();
        }
    }
}

/// Meta listener: replicated keys without a container get one created
/// before their host lists are delivered.
impl RecordListener for ServiceRegistry {
    fn on_change(
        &self,
        key: &str,
        record: &Record,
    ) -> Result<()> {
        match record {
            Record::Metadata(meta) => {
                self.create_service_if_absent(meta);
                Ok(())
            }
            Record::Instances(_) => {
                warn!(%key, "registry ignores instance records");
                Ok(())
            }
        }
    }

    fn on_delete(
        &self,
        key: &str,
    ) -> Result<()> {
        let namespace_id = key::namespace(key)?.to_string();
        let grouped_name = key::service_name(key)?.to_string();
        self.remove_service(&namespace_id, &grouped_name);
        Ok(())
    }
}

/// Deletion path of the liveness sweep: goes back through the registry so
/// the removal replicates like any other write.
struct RegistryInstanceOperator {
    registry: Weak<ServiceRegistry>,
}

#[async_trait]
impl InstanceOperator for RegistryInstanceOperator {
    async fn remove_instance(
        &self,
        request: InstanceDeleteRequest,
    ) -> Result<()> {
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };
        registry.deregister_instance(
            &request.namespace_id,
            &request.service_name,
            &request.cluster_name,
            &request.ip,
            request.port,
            request.ephemeral,
        )
    }
}

fn group_of(grouped_name: &str) -> &str {
    grouped_name
        .split(key::SERVICE_NAME_GROUP_CONNECTOR)
        .next()
        .unwrap_or(key::DEFAULT_GROUP)
}

//! Liveness sweep for ephemeral instances.
//!
//! One task per service, scheduled periodically. Health flips happen in
//! place; expiry goes back through the registry mutation interface so the
//! deletion takes the same distro path as any other write, keeping owners
//! and listeners consistent.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::Duration;
use tracing::error;
use tracing::info;

use beacon_core::key::build_service_meta_key;
use beacon_core::utils::now_millis;
use beacon_core::DistroMapper;
use beacon_core::EventPublisher;
use beacon_core::NamingEvent;
use beacon_core::Result;
use beacon_core::ServerConfig;

use crate::push::ServicePush;
use crate::service::Service;

/// The six coordinates of an automatic delete.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDeleteRequest {
    pub namespace_id: String,
    pub service_name: String,
    pub cluster_name: String,
    pub ip: String,
    pub port: u16,
    pub ephemeral: bool,
}

/// Mutation interface the sweep deletes through. The registry provides
/// the real implementation; the seam keeps the sweep testable and mirrors
/// the fact that deletion is a full registry operation, not a store poke.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstanceOperator: Send + Sync + 'static {
    async fn remove_instance(
        &self,
        request: InstanceDeleteRequest,
    ) -> Result<()>;
}

pub struct ClientBeatCheckTask {
    pub(crate) service: Arc<Service>,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) mapper: Arc<DistroMapper>,
    pub(crate) events: EventPublisher,
    pub(crate) push: Arc<dyn ServicePush>,
    pub(crate) operator: Arc<dyn InstanceOperator>,
}

impl ClientBeatCheckTask {
    pub fn new(
        service: Arc<Service>,
        config: Arc<ServerConfig>,
        mapper: Arc<DistroMapper>,
        events: EventPublisher,
        push: Arc<dyn ServicePush>,
        operator: Arc<dyn InstanceOperator>,
    ) -> Self {
        Self {
            service,
            config,
            mapper,
            events,
            push,
            operator,
        }
    }

    pub fn task_key(&self) -> String {
        build_service_meta_key(self.service.namespace_id(), self.service.name())
    }

    /// One sweep tick.
    pub async fn run(&self) {
        if !self.mapper.responsible(self.service.name()) {
            return;
        }
        if !self.config.health_check_enabled {
            return;
        }

        let now = now_millis();

        for instance in self.service.sweep_unhealthy(now) {
            self.push
                .service_changed(self.service.namespace_id(), self.service.name());
            self.events.publish(NamingEvent::InstanceHeartbeatTimeout {
                namespace_id: self.service.namespace_id().to_string(),
                service_name: self.service.name().to_string(),
                instance,
            });
        }

        if !self.config.expire_instance {
            return;
        }

        for instance in self.service.expired_instances(now) {
            info!(
                service = %self.service.name(),
                instance = %instance.to_inet_addr(),
                "auto deleting expired instance"
            );
            let request = InstanceDeleteRequest {
                namespace_id: self.service.namespace_id().to_string(),
                service_name: self.service.name().to_string(),
                cluster_name: instance.cluster_name.clone(),
                ip: instance.ip.clone(),
                port: instance.port,
                ephemeral: true,
            };
            let operator = self.operator.clone();
            // Fire and forget; failures are logged and the next sweep
            // retries.
            tokio::spawn(async move {
                if let Err(e) = operator.remove_instance(request.clone()).await {
                    error!(
                        instance = %format!("{}:{}", request.ip, request.port),
                        error = %e,
                        "failed to auto delete instance"
                    );
                }
            });
        }
    }

    /// Runs the sweep on its period until shutdown.
    pub fn spawn(
        self,
        mut shutdown: watch::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_millis(self.config.beat_check_period_ms);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => self.run().await,
                }
            }
        })
    }
}

//! Snapshot-backed read path for upstream outages.
//!
//! A switch file inside the failover directory routes reads to an
//! on-disk snapshot of the service views. The snapshot is written
//! periodically from the live cache and loaded lazily when the switch
//! flips on.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::sleep;
use tokio::time::Duration;
use tracing::error;
use tracing::info;
use tracing::warn;

use beacon_core::ServiceInfo;

use crate::cache;

/// Flipping this file's content to `1` routes reads to the snapshot.
pub const FAILOVER_SWITCH_FILE: &str = "failover-switch";

pub struct FailoverReactor {
    failover_dir: PathBuf,
    switch_on: AtomicBool,
    pub(crate) service_map: DashMap<String, ServiceInfo>,
}

impl FailoverReactor {
    pub fn new(failover_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            failover_dir,
            switch_on: AtomicBool::new(false),
            service_map: DashMap::new(),
        })
    }

    /// Spawns the switch-file poller and the periodic snapshot writer.
    pub fn start(
        self: &Arc<Self>,
        service_info_map: Arc<DashMap<String, ServiceInfo>>,
        switch_refresh_ms: u64,
        snapshot_period_ms: u64,
        shutdown: watch::Receiver<()>,
    ) {
        let reactor = self.clone();
        let mut switch_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(switch_refresh_ms.max(1)));
            loop {
                tokio::select! {
                    _ = switch_shutdown.changed() => break,
                    _ = ticker.tick() => reactor.refresh_switch(),
                }
            }
        });

        let reactor = self.clone();
        let mut writer_shutdown = shutdown;
        tokio::spawn(async move {
            // Early dump when this client has never snapshotted before.
            tokio::select! {
                _ = writer_shutdown.changed() => return,
                _ = sleep(Duration::from_millis(10_000)) => {
                    if !reactor.has_snapshot() {
                        reactor.dump(&service_info_map);
                    }
                }
            }
            let mut ticker = interval(Duration::from_millis(snapshot_period_ms.max(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = writer_shutdown.changed() => break,
                    _ = ticker.tick() => reactor.dump(&service_info_map),
                }
            }
        });
    }

    pub fn is_failover_switch(&self) -> bool {
        self.switch_on.load(Ordering::SeqCst)
    }

    /// Snapshot view for a cache key; an empty view when the snapshot
    /// has nothing for it.
    pub fn get_service(
        &self,
        key: &str,
    ) -> ServiceInfo {
        if let Some(info) = self.service_map.get(key) {
            return info.clone();
        }
        let (name, clusters) = ServiceInfo::parse_key(key);
        ServiceInfo::new(name, clusters)
    }

    pub(crate) fn refresh_switch(&self) {
        let switch_path = self.failover_dir.join(FAILOVER_SWITCH_FILE);
        let on = match std::fs::read_to_string(&switch_path) {
            Ok(content) => content.trim() == "1",
            Err(_) => false,
        };

        let was_on = self.switch_on.swap(on, Ordering::SeqCst);
        if on && !was_on {
            info!("failover switch turned on, serving from snapshot");
            self.load_snapshot();
        } else if !on && was_on {
            info!("failover switch turned off");
        }
    }

    fn load_snapshot(&self) {
        let views = cache::read(&self.failover_dir);
        if views.is_empty() {
            warn!(dir = %self.failover_dir.display(), "failover snapshot is empty");
        }
        self.service_map.clear();
        for (key, info) in views {
            self.service_map.insert(key, info);
        }
    }

    fn has_snapshot(&self) -> bool {
        std::fs::read_dir(&self.failover_dir)
            .map(|mut entries| {
                entries.any(|e| {
                    e.as_ref()
                        .map(|e| e.file_name() != FAILOVER_SWITCH_FILE)
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    pub(crate) fn dump(
        &self,
        service_info_map: &DashMap<String, ServiceInfo>,
    ) {
        let mut written = 0usize;
        for entry in service_info_map.iter() {
            let info = entry.value();
            if info.hosts.is_empty() {
                continue;
            }
            if let Err(e) = cache::write(info, &self.failover_dir) {
                error!(key = %entry.key(), error = %e, "failover dump failed");
                continue;
            }
            written += 1;
        }
        info!(written, "failover snapshot dumped");
    }
}

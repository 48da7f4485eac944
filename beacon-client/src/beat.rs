//! Client-side heartbeats.
//!
//! One task per registered (service, ip, port) sends beats forever while
//! the instance stays registered. The server's answer can retune the
//! cadence; network failures keep the previous cadence and try again —
//! there is no giving up.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio::time::Duration;
use tracing::info;
use tracing::warn;

use beacon_core::ClientBeat;
use beacon_core::Instance;

use crate::api::NamingApi;

pub struct BeatReactor {
    api: Arc<dyn NamingApi>,
    dom2_beat: DashMap<String, BeatEntry>,
    shutdown: watch::Receiver<()>,
}

struct BeatEntry {
    beat: ClientBeat,
    stopped: Arc<AtomicBool>,
}

impl BeatReactor {
    pub fn new(
        api: Arc<dyn NamingApi>,
        shutdown: watch::Receiver<()>,
    ) -> Self {
        Self {
            api,
            dom2_beat: DashMap::new(),
            shutdown,
        }
    }

    pub fn build_key(
        service_name: &str,
        ip: &str,
        port: u16,
    ) -> String {
        format!("{service_name}#{ip}#{port}")
    }

    pub fn build_beat_info(
        grouped_service_name: &str,
        instance: &Instance,
    ) -> ClientBeat {
        ClientBeat {
            service_name: grouped_service_name.to_string(),
            ip: instance.ip.clone(),
            port: instance.port,
            cluster: instance.cluster_name.clone(),
            weight: instance.weight,
            metadata: instance.metadata.clone(),
            ..ClientBeat::default()
        }
    }

    /// Starts (or retunes) the beat task for an instance. An existing
    /// task for the same coordinates is stopped first.
    pub fn add_beat_info(
        &self,
        beat: ClientBeat,
    ) {
        let key = Self::build_key(&beat.service_name, &beat.ip, beat.port);
        info!(%key, "adding beat, duration {}ms", beat.period);

        let stopped = Arc::new(AtomicBool::new(false));
        let entry = BeatEntry {
            beat: beat.clone(),
            stopped: stopped.clone(),
        };
        if let Some(old) = self.dom2_beat.insert(key, entry) {
            old.stopped.store(true, Ordering::SeqCst);
        }

        let api = self.api.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(run_beat_task(api, beat, stopped, shutdown));
    }

    /// Stops and forgets the beat for an instance.
    pub fn remove_beat_info(
        &self,
        service_name: &str,
        ip: &str,
        port: u16,
    ) {
        let key = Self::build_key(service_name, ip, port);
        info!(%key, "removing beat");
        if let Some((_, entry)) = self.dom2_beat.remove(&key) {
            entry.stopped.store(true, Ordering::SeqCst);
        }
    }

    pub fn has_beat(
        &self,
        service_name: &str,
        ip: &str,
        port: u16,
    ) -> bool {
        self.dom2_beat
            .contains_key(&Self::build_key(service_name, ip, port))
    }

    pub fn beat_count(&self) -> usize {
        self.dom2_beat.len()
    }

    /// Stops every beat task (reactor shutdown).
    pub fn stop_all(&self) {
        for entry in self.dom2_beat.iter() {
            entry.stopped.store(true, Ordering::SeqCst);
        }
        self.dom2_beat.clear();
    }

    pub(crate) fn current_period(
        &self,
        service_name: &str,
        ip: &str,
        port: u16,
    ) -> Option<u64> {
        self.dom2_beat
            .get(&Self::build_key(service_name, ip, port))
            .map(|e| e.beat.period)
    }
}

async fn run_beat_task(
    api: Arc<dyn NamingApi>,
    beat: ClientBeat,
    stopped: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<()>,
) {
    let mut period = beat.period;
    let mut lightweight = false;

    loop {
        if stopped.load(Ordering::SeqCst) {
            return;
        }

        match api.send_beat(beat.clone(), lightweight).await {
            Ok(result) => {
                if result.client_beat_interval > 0 {
                    period = result.client_beat_interval;
                }
                lightweight = result.light_beat_enabled;
                if result.resend_register {
                    resend_register(&api, &beat).await;
                }
            }
            Err(e) => {
                // Keep the previous cadence; beats are best-effort
                // forever while the instance stays registered.
                warn!(
                    service = %beat.service_name,
                    instance = %format!("{}:{}", beat.ip, beat.port),
                    error = %e,
                    "beat failed, keeping schedule"
                );
            }
        }

        tokio::select! {
            _ = shutdown.changed() => return,
            _ = sleep(Duration::from_millis(period.max(1))) => {}
        }
    }
}

async fn resend_register(
    api: &Arc<dyn NamingApi>,
    beat: &ClientBeat,
) {
    info!(service = %beat.service_name, "server lost the instance, re-registering");
    let mut instance = Instance::new(beat.ip.clone(), beat.port);
    instance.cluster_name = beat.cluster.clone();
    instance.weight = beat.weight;
    instance.metadata = beat.metadata.clone();
    instance.service_name = beat.service_name.clone();
    if let Err(e) = api.register_instance(&beat.service_name, instance).await {
        warn!(service = %beat.service_name, error = %e, "re-register failed");
    }
}

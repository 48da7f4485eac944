//! Per-view polling loop.
//!
//! Pulls authoritatively while the server session is fresh, downgrades
//! to refresh-only once pushes deliver newer data, and backs off
//! exponentially (bounded) while the view stays empty or the server
//! stays unreachable.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::Duration;
use tracing::info;
use tracing::warn;

use beacon_core::ServiceInfo;

use super::ReactorCore;
use crate::event::InstancesChangeNotifier;

const DEFAULT_DELAY_MS: u64 = 1_000;

const MAX_DELAY_MS: u64 = 60 * DEFAULT_DELAY_MS;

const FAIL_COUNT_LIMIT: u32 = 6;

/// Bounded exponential backoff: the base delay shifted by the failure
/// count, capped at one minute.
pub(crate) fn next_delay(
    base_ms: u64,
    fail_count: u32,
) -> u64 {
    (base_ms << fail_count).min(MAX_DELAY_MS)
}

pub(crate) fn spawn_update_task(
    core: Arc<ReactorCore>,
    notifier: Arc<InstancesChangeNotifier>,
    future_map: Arc<DashMap<String, JoinHandle<()>>>,
    service_name: String,
    clusters: String,
    mut shutdown: watch::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let key = ServiceInfo::build_key(&service_name, &clusters);
        let mut last_ref_time = u64::MAX;
        let mut fail_count: u32 = 0;

        // First tick after the default delay, like any reschedule.
        let mut delay_ms = DEFAULT_DELAY_MS;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = sleep(Duration::from_millis(next_delay(delay_ms, fail_count))) => {}
            }

            delay_ms = DEFAULT_DELAY_MS;
            let cached = core.service_info_map.get(&key).map(|e| e.clone());
            let Some(view) = cached else {
                // Nothing cached yet; pull and reschedule at the default
                // delay.
                if let Err(e) = core.update_service(&service_name, &clusters).await {
                    warn!(service = %service_name, error = %e, "update failed");
                    fail_count = (fail_count + 1).min(FAIL_COUNT_LIMIT);
                }
                continue;
            };

            let current = if view.last_ref_time <= last_ref_time {
                match core.update_service(&service_name, &clusters).await {
                    Ok(()) => core.service_info_map.get(&key).map(|e| e.clone()).unwrap_or(view),
                    Err(e) => {
                        warn!(service = %service_name, error = %e, "update failed");
                        fail_count = (fail_count + 1).min(FAIL_COUNT_LIMIT);
                        continue;
                    }
                }
            } else {
                // A push already delivered something newer; just keep
                // the server's push session alive.
                core.refresh_only(&service_name, &clusters).await;
                view
            };

            last_ref_time = current.last_ref_time;

            if !notifier.is_subscribed(&service_name, &clusters) && !future_map.contains_key(&key) {
                info!(service = %service_name, clusters = %clusters, "update task stopped");
                core.service_info_map.remove(&key);
                return;
            }

            if current.hosts.is_empty() {
                fail_count = (fail_count + 1).min(FAIL_COUNT_LIMIT);
                continue;
            }
            delay_ms = current.cache_millis;
            fail_count = 0;
        }
    })
}

//! Per-key change fan-out.
//!
//! A single cooperative worker drains a bounded task queue of
//! `(key, CHANGE|DELETE)` pairs and dispatches to the key's listeners.
//! Consecutive CHANGE tasks for a key still sitting in the queue are
//! coalesced; DELETE is never coalesced and clears the key's dedup mark,
//! so a CHANGE enqueued behind a DELETE is delivered rather than folded
//! into the pre-delete CHANGE.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::DashSet;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::DataOperation;
use crate::DataStore;
use crate::Record;
use crate::RecordListener;

/// Bound on queued notify tasks; overflow drops the new task.
pub const NOTIFY_QUEUE_CAPACITY: usize = 1024 * 1024;

/// Registration-ordered listener sets keyed by datum key.
///
/// The service-meta listener is registered under the bare meta key prefix
/// and consulted by bulk installs to create service containers.
#[derive(Default)]
pub struct Listeners {
    map: DashMap<String, Vec<Arc<dyn RecordListener>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for a key. The same listener instance is not
    /// registered twice for one key.
    pub fn listen(
        &self,
        key: &str,
        listener: Arc<dyn RecordListener>,
    ) {
        let mut entry = self.map.entry(key.to_string()).or_default();
        if !entry.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            entry.push(listener);
        }
    }

    /// Removes one registration of the listener, preserving the order of
    /// the rest.
    pub fn unlisten(
        &self,
        key: &str,
        listener: &Arc<dyn RecordListener>,
    ) {
        if let Some(mut entry) = self.map.get_mut(key) {
            if let Some(pos) = entry.iter().position(|l| Arc::ptr_eq(l, listener)) {
                entry.remove(pos);
            }
        }
    }

    pub fn contains_key(
        &self,
        key: &str,
    ) -> bool {
        self.map.get(key).is_some_and(|l| !l.is_empty())
    }

    /// Drops every listener for the key.
    pub fn remove_key(
        &self,
        key: &str,
    ) {
        self.map.remove(key);
    }

    pub fn snapshot(
        &self,
        key: &str,
    ) -> Vec<Arc<dyn RecordListener>> {
        self.map.get(key).map(|l| l.clone()).unwrap_or_default()
    }

    pub fn first(
        &self,
        key: &str,
    ) -> Option<Arc<dyn RecordListener>> {
        self.map.get(key).and_then(|l| l.first().cloned())
    }
}

struct NotifyTask {
    key: String,
    action: DataOperation,
}

/// Handle for enqueueing notify tasks; the consuming worker is spawned by
/// [`Notifier::spawn`] and runs until the shutdown channel closes.
pub struct Notifier {
    tx: mpsc::Sender<NotifyTask>,
    in_queue: Arc<DashSet<String>>,
}

impl Notifier {
    pub fn spawn(
        store: Arc<DataStore>,
        listeners: Arc<Listeners>,
        mut shutdown: watch::Receiver<()>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<NotifyTask>(NOTIFY_QUEUE_CAPACITY);
        let in_queue: Arc<DashSet<String>> = Arc::new(DashSet::new());

        let worker_marks = in_queue.clone();
        tokio::spawn(async move {
            info!("distro notifier started");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    task = rx.recv() => {
                        let Some(task) = task else { break };
                        handle(task, &store, &listeners, &worker_marks);
                    }
                }
            }
            info!("distro notifier stopped");
        });

        Self { tx, in_queue }
    }

    /// Enqueues a notify task for the key.
    ///
    /// CHANGE for a key already queued as CHANGE is dropped; DELETE always
    /// enqueues and unmarks the key so later CHANGEs are not coalesced
    /// across it.
    pub fn add_task(
        &self,
        key: &str,
        action: DataOperation,
    ) {
        match action {
            DataOperation::Change => {
                if !self.in_queue.insert(key.to_string()) {
                    return;
                }
            }
            DataOperation::Delete => {
                self.in_queue.remove(key);
            }
        }

        let task = NotifyTask {
            key: key.to_string(),
            action,
        };
        if let Err(TrySendError::Full(task) | TrySendError::Closed(task)) = self.tx.try_send(task) {
            warn!(key = %task.key, action = %task.action, "notify queue full, dropping task");
            if task.action == DataOperation::Change {
                self.in_queue.remove(&task.key);
            }
        }
    }

    /// Current queue depth.
    pub fn task_size(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

fn handle(
    task: NotifyTask,
    store: &DataStore,
    listeners: &Listeners,
    in_queue: &DashSet<String>,
) {
    let NotifyTask { key, action } = task;
    in_queue.remove(&key);

    let snapshot = listeners.snapshot(&key);
    if snapshot.is_empty() {
        info!(%key, "no listener registered, notify skipped");
        return;
    }

    let record = match action {
        DataOperation::Change => match store.get(&key) {
            Some(datum) => Some(Record::Instances(datum.value)),
            None => {
                info!(%key, "data not found, notify skipped");
                return;
            }
        },
        DataOperation::Delete => None,
    };

    let mut count = 0;
    for listener in snapshot {
        count += 1;
        let outcome = match &record {
            Some(record) => listener.on_change(&key, record),
            None => listener.on_delete(&key),
        };
        if let Err(e) = outcome {
            error!(%key, %action, error = %e, "listener failed, continuing with the rest");
        }
    }

    debug!(%key, %action, listener_count = count, "datum change notified");
}

//! Connectivity monitor.
//!
//! Follows the remote store's reserved `.info/connected` leaf and turns it
//! into a process-wide status plus an edge-triggered "reconnected"
//! notification. Repeated pushes of the same boolean are ignored.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::remote::{RemoteEvent, RemoteStore, CONNECTED_PATH};

/// Whether the authoritative store can currently be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Reachable,
    Unreachable,
}

impl Connectivity {
    pub fn from_bool(connected: bool) -> Self {
        if connected {
            Connectivity::Reachable
        } else {
            Connectivity::Unreachable
        }
    }
}

struct Shared {
    status: watch::Sender<Connectivity>,
    reconnected: broadcast::Sender<()>,
}

impl Shared {
    /// Record a pushed value. Returns `true` when the status changed.
    fn apply(&self, connected: bool) -> bool {
        let next = Connectivity::from_bool(connected);
        let mut previous = next;

        let changed = self.status.send_if_modified(|current| {
            previous = *current;
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            info!("Connectivity changed: {:?} -> {:?}", previous, next);
            if previous == Connectivity::Unreachable && next == Connectivity::Reachable {
                // No listeners is fine.
                let _ = self.reconnected.send(());
            }
        }
        changed
    }
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Tracks remote reachability.
pub struct ConnectivityMonitor {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    /// A monitor in the `Unreachable` state that follows nothing yet.
    pub fn new() -> Self {
        let (status, _) = watch::channel(Connectivity::Unreachable);
        let (reconnected, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                status,
                reconnected,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Follow `remote`'s connectivity path. Replaces any previous source.
    pub fn start(&self, remote: Arc<dyn RemoteStore>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = self.shared.clone();

        let handle = tokio::spawn(async move {
            run_monitor_loop(remote, shared, shutdown_rx).await;
        });

        let previous = self
            .lock_worker()
            .replace(Worker {
                handle,
                shutdown_tx,
            });
        if let Some(old) = previous {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        debug!("Connectivity monitor started");
    }

    /// Stop following the remote store. The last status is kept.
    pub fn stop(&self) {
        if let Some(worker) = self.lock_worker().take() {
            let _ = worker.shutdown_tx.send(true);
            worker.handle.abort();
            debug!("Connectivity monitor stopped");
        }
    }

    /// Feed one connectivity value. Returns `true` when the status changed.
    pub fn apply(&self, connected: bool) -> bool {
        self.shared.apply(connected)
    }

    pub fn status(&self) -> Connectivity {
        *self.shared.status.borrow()
    }

    pub fn is_reachable(&self) -> bool {
        self.status() == Connectivity::Reachable
    }

    /// Receiver that observes every status change.
    pub fn watch(&self) -> watch::Receiver<Connectivity> {
        self.shared.status.subscribe()
    }

    /// Receiver notified once per `Unreachable -> Reachable` transition.
    pub fn on_reconnected(&self) -> broadcast::Receiver<()> {
        self.shared.reconnected.subscribe()
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_monitor_loop(
    remote: Arc<dyn RemoteStore>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut subscription = remote.subscribe(CONNECTED_PATH);

    loop {
        tokio::select! {
            event = subscription.next() => match event {
                Some(RemoteEvent::Value(value)) => {
                    let connected = matches!(value, Some(Value::Bool(true)));
                    if !matches!(value, Some(Value::Bool(_))) {
                        warn!("Non-boolean connectivity value {:?}, treating as offline", value);
                    }
                    shared.apply(connected);
                }
                Some(RemoteEvent::Error(message)) => {
                    warn!("Connectivity subscription error: {}", message);
                }
                None => {
                    debug!("Connectivity subscription closed");
                    break;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}

//! In-process remote store.
//!
//! Behaves like the networked store from a client's point of view,
//! including offline periods: while disconnected, reads and writes fail
//! and data subscriptions stay silent until the transport comes back, at
//! which point they receive the current value. Fault injection and call
//! counters make it the backbone of the sync tests.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::tree::{get_at, is_connected_path, normalize, overlaps, set_at, validate_write_path};
use super::{RemoteEvent, RemoteStore, RemoteSubscription};
use crate::errors::SyncError;

struct Subscriber {
    id: u64,
    path: String,
    /// Whether the subscriber has received its first value.
    primed: bool,
    last: Option<Value>,
    tx: mpsc::UnboundedSender<RemoteEvent>,
}

struct Inner {
    tree: Value,
    connected: bool,
    fail_reads: bool,
    fail_writes: bool,
    reads: usize,
    writes: usize,
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    fn connected_value(&self) -> Option<Value> {
        Some(Value::Bool(self.connected))
    }

    /// Push the current value to every live data subscriber overlapping
    /// `changed`, skipping those whose value did not change.
    fn notify(&mut self, changed: &str) {
        if !self.connected {
            return;
        }
        let tree = &self.tree;
        self.subscribers.retain_mut(|sub| {
            if is_connected_path(&sub.path) || !overlaps(&sub.path, changed) {
                return !sub.tx.is_closed();
            }
            let current = get_at(tree, &sub.path);
            if sub.primed && sub.last == current {
                return true;
            }
            sub.primed = true;
            sub.last = current.clone();
            sub.tx.send(RemoteEvent::Value(current)).is_ok()
        });
    }

    fn notify_connectivity(&mut self) {
        let value = self.connected_value();
        self.subscribers.retain(|sub| {
            if !is_connected_path(&sub.path) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(RemoteEvent::Value(value.clone())).is_ok()
        });
    }
}

/// A remote store held entirely in memory.
#[derive(Clone)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    /// A connected, empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                tree: Value::Null,
                connected: true,
                fail_reads: false,
                fail_writes: false,
                reads: 0,
                writes: 0,
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Change transport connectivity. Every call is pushed to `.info`
    /// subscribers, even when the value is unchanged, as a real transport
    /// may repeat itself. Reconnecting re-delivers data that changed while
    /// offline.
    pub fn set_connected(&self, connected: bool) {
        let mut inner = self.lock();
        inner.connected = connected;
        inner.notify_connectivity();
        if connected {
            inner.notify("");
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Apply a write made by some other client. Not counted as a write
    /// through this adapter and unaffected by injected faults.
    pub fn push_remote(&self, path: &str, value: Value) {
        let mut inner = self.lock();
        let path = normalize(path);
        set_at(&mut inner.tree, &path, value);
        inner.notify(&path);
    }

    /// Current value at `path` without counting a read.
    pub fn peek(&self, path: &str) -> Option<Value> {
        get_at(&self.lock().tree, path)
    }

    /// Number of `get` calls on data paths, including failed ones.
    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// Number of `set` calls, including failed ones.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, SyncError> {
        let mut inner = self.lock();
        if is_connected_path(path) {
            return Ok(inner.connected_value());
        }

        inner.reads += 1;
        if !inner.connected {
            return Err(SyncError::remote_read(path, "not connected"));
        }
        if inner.fail_reads {
            return Err(SyncError::remote_read(path, "permission denied"));
        }
        Ok(get_at(&inner.tree, path))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), SyncError> {
        let mut inner = self.lock();
        inner.writes += 1;

        validate_write_path(path).map_err(|msg| SyncError::remote_write(path, msg))?;
        if !inner.connected {
            return Err(SyncError::remote_write(path, "not connected"));
        }
        if inner.fail_writes {
            return Err(SyncError::remote_write(path, "permission denied"));
        }

        let path = normalize(path);
        set_at(&mut inner.tree, &path, value);
        inner.notify(&path);
        Ok(())
    }

    fn subscribe(&self, path: &str) -> RemoteSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let path = normalize(path);

        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let mut subscriber = Subscriber {
            id,
            path: path.clone(),
            primed: false,
            last: None,
            tx,
        };

        if is_connected_path(&path) {
            let _ = subscriber.tx.send(RemoteEvent::Value(inner.connected_value()));
            subscriber.primed = true;
        } else if inner.connected {
            let current = get_at(&inner.tree, &path);
            let _ = subscriber.tx.send(RemoteEvent::Value(current.clone()));
            subscriber.primed = true;
            subscriber.last = current;
        }
        inner.subscribers.push(subscriber);
        drop(inner);

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        RemoteSubscription::new(&path, rx, move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                inner.subscribers.retain(|s| s.id != id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let store = MemoryRemoteStore::new();
        store.set("board/settings/theme", json!("light")).await.unwrap();

        assert_eq!(store.get("board/settings").await.unwrap(), Some(json!({ "theme": "light" })));
        assert_eq!(store.get("board/missing").await.unwrap(), None);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_then_changes() {
        let store = MemoryRemoteStore::new();
        store.push_remote("board/settings/theme", json!("dark"));

        let mut sub = store.subscribe("board/settings");
        assert_eq!(sub.next().await, Some(RemoteEvent::Value(Some(json!({ "theme": "dark" })))));

        store.set("board/settings/theme", json!("light")).await.unwrap();
        assert_eq!(sub.next().await, Some(RemoteEvent::Value(Some(json!({ "theme": "light" })))));
    }

    #[tokio::test]
    async fn test_unrelated_and_unchanged_writes_are_not_delivered() {
        let store = MemoryRemoteStore::new();
        let mut sub = store.subscribe("board/personsByDay/monday");
        assert_eq!(sub.next().await, Some(RemoteEvent::Value(None)));

        store.push_remote("board/personsByDay/tuesday", json!({ "A": { "name": "A" } }));
        store.push_remote("board/personsByDay/monday", json!({ "B": { "name": "B" } }));
        store.push_remote("board/personsByDay/monday", json!({ "B": { "name": "B" } }));

        assert_eq!(
            sub.next().await,
            Some(RemoteEvent::Value(Some(json!({ "B": { "name": "B" } }))))
        );
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_detaches_listener() {
        let store = MemoryRemoteStore::new();
        let mut sub = store.subscribe("board");
        assert_eq!(store.subscriber_count(), 1);

        sub.cancel();
        sub.cancel();
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_fails_and_defers_subscriptions() {
        let store = MemoryRemoteStore::new();
        store.set_connected(false);

        assert!(matches!(
            store.get("board/x").await,
            Err(SyncError::RemoteRead { .. })
        ));
        assert!(matches!(
            store.set("board/x", json!(1)).await,
            Err(SyncError::RemoteWrite { .. })
        ));

        let mut sub = store.subscribe("board/x");
        assert!(sub.events.try_recv().is_err());

        store.push_remote("board/x", json!(2));
        store.set_connected(true);
        assert_eq!(sub.next().await, Some(RemoteEvent::Value(Some(json!(2)))));
    }

    #[tokio::test]
    async fn test_connectivity_pushes_repeat() {
        let store = MemoryRemoteStore::new();
        let mut sub = store.subscribe(".info/connected");
        assert_eq!(sub.next().await, Some(RemoteEvent::Value(Some(json!(true)))));

        store.set_connected(true);
        assert_eq!(sub.next().await, Some(RemoteEvent::Value(Some(json!(true)))));
        store.set_connected(false);
        assert_eq!(sub.next().await, Some(RemoteEvent::Value(Some(json!(false)))));
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = MemoryRemoteStore::new();
        store.fail_writes(true);
        assert!(store.set("board/a", json!(1)).await.is_err());
        assert_eq!(store.peek("board/a"), None);

        store.fail_writes(false);
        store.set("board/a", json!(1)).await.unwrap();
        assert_eq!(store.peek("board/a"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_reserved_path_is_read_only() {
        let store = MemoryRemoteStore::new();
        assert!(store.set(".info/connected", json!(false)).await.is_err());
        assert_eq!(store.get(".info/connected").await.unwrap(), Some(json!(true)));
    }
}

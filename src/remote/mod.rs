//! Remote authoritative store.
//!
//! The remote store is a subscribable key/value tree addressed by
//! `/`-separated paths. Board data lives under a namespace root; the
//! reserved [`CONNECTED_PATH`] sits outside it and reports whether the
//! transport can currently reach the server.

mod convert;
mod http;
mod memory;
pub mod tree;

pub use convert::*;
pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::SyncError;
use crate::models::Day;

/// Reserved leaf exposing transport connectivity as a boolean.
pub const CONNECTED_PATH: &str = ".info/connected";

/// A value (or failure) delivered to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// The full current value at the subscribed path; `None` when empty.
    Value(Option<Value>),
    /// A transport or permission failure. The subscription stays alive.
    Error(String),
}

/// Network adapter for the authoritative store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read the subtree at `path`.
    async fn get(&self, path: &str) -> Result<Option<Value>, SyncError>;

    /// Replace the subtree at `path`. `Value::Null` removes it.
    async fn set(&self, path: &str, value: Value) -> Result<(), SyncError>;

    /// Listen to `path`. The current value is delivered first, then every
    /// change in the order the store applied it. Must be called from within
    /// a Tokio runtime.
    fn subscribe(&self, path: &str) -> RemoteSubscription;
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// A live listener on one remote path.
///
/// Dropping the subscription detaches the listener. [`cancel`] may be
/// called any number of times.
///
/// [`cancel`]: RemoteSubscription::cancel
pub struct RemoteSubscription {
    path: String,
    events: mpsc::UnboundedReceiver<RemoteEvent>,
    cancel: Option<CancelFn>,
}

impl RemoteSubscription {
    pub fn new<F>(path: &str, events: mpsc::UnboundedReceiver<RemoteEvent>, cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            path: path.to_string(),
            events,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next delivered event; `None` once the subscription is cancelled and
    /// drained.
    pub async fn next(&mut self) -> Option<RemoteEvent> {
        self.events.recv().await
    }

    /// Detach the remote listener. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
            self.events.close();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_none()
    }
}

impl Drop for RemoteSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for RemoteSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSubscription")
            .field("path", &self.path)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Builds the remote paths of the board schema under a namespace.
#[derive(Debug, Clone)]
pub struct RemotePaths {
    namespace: String,
}

impl RemotePaths {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `{namespace}/{root}/{day}`, e.g. `board/resourcesByDay/monday`.
    pub fn day(&self, root: &str, day: Day) -> String {
        format!("{}/{}/{}", self.namespace, root, day.as_str())
    }

    /// `{namespace}/settings`
    pub fn settings(&self) -> String {
        format!("{}/settings", self.namespace)
    }

    /// `{namespace}/settings/{key}`
    pub fn setting(&self, key: &str) -> String {
        format!("{}/settings/{}", self.namespace, key)
    }
}

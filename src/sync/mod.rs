//! Sync facade.
//!
//! `SyncService` is the only thing collaborators talk to. While the
//! facade is in remote mode and the remote store is reachable, reads go to
//! the remote store and are mirrored into the local cache, and writes go to
//! the remote store first and reach the cache only once confirmed. Otherwise
//! the local cache serves everything and writes never fail.
//!
//! Subscriptions always attach to the remote store, whatever the current
//! connectivity, so they resume on their own once the transport connects.
//! Every delivered value is mirrored before the callback sees it.

mod collections;
mod mirror;
mod synced;
mod transfer;

pub use collections::*;
pub use synced::{PersistOutcome, SyncedResource};
pub use transfer::ImportSummary;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::errors::SyncError;
use crate::migrate::SchemaMigrator;
use crate::models::{is_valid_setting_key, Clock, Day, GlobalSettings, SystemClock};
use crate::remote::{HttpRemoteStore, RemoteEvent, RemotePaths, RemoteStore};

use mirror::{decode_settings, CacheMirror};

/// Where the facade currently sends reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Remote,
    Local,
}

/// Lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    ModeChanged(SyncMode),
    /// The cache was refreshed from the remote store after a reconnect.
    Refreshed,
}

/// Keeps a subscription alive. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    fn new(active: Arc<AtomicBool>, task: JoinHandle<()>) -> Self {
        Self {
            active,
            task: Some(task),
        }
    }

    /// Stop deliveries and detach the remote listener. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// The sync facade. Construct with [`SyncService::init`], share the
/// returned `Arc`, and call [`SyncService::dispose`] on shutdown.
pub struct SyncService {
    config: SyncConfig,
    remote: Option<Arc<dyn RemoteStore>>,
    paths: RemotePaths,
    mirror: Arc<CacheMirror>,
    clock: Arc<dyn Clock>,
    monitor: ConnectivityMonitor,
    mode: watch::Sender<SyncMode>,
    events: broadcast::Sender<SyncEvent>,
    /// Serializes writes and refreshes so they complete in issue order.
    write_lock: Mutex<()>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SyncService {
    /// Build the facade: upgrade the cache schema, start following
    /// connectivity and start the mode reconciliation timer.
    ///
    /// `remote` is ignored when `config.remote_enabled` is false; the
    /// facade then stays in local mode for its whole life.
    pub async fn init(
        config: SyncConfig,
        cache: LocalCache,
        remote: Option<Arc<dyn RemoteStore>>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let migrator = SchemaMigrator::new(cache.clone(), config.week, clock.clone());
        match migrator.run().await {
            Ok(outcome) => debug!("Cache schema check: {:?}", outcome),
            Err(e) => error!("Cache migration failed, retrying on next start: {}", e),
        }

        let remote = if config.remote_enabled {
            remote
        } else {
            info!("Remote sync disabled, running from the local cache");
            None
        };

        let initial = if remote.is_some() {
            SyncMode::Remote
        } else {
            SyncMode::Local
        };
        let (mode, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(64);

        let service = Arc::new(Self {
            paths: RemotePaths::new(config.namespace.clone()),
            config,
            remote,
            mirror: Arc::new(CacheMirror::new(cache)),
            clock,
            monitor: ConnectivityMonitor::new(),
            mode,
            events,
            write_lock: Mutex::new(()),
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        if let Some(remote) = &service.remote {
            // Subscribe before starting so the first connect is not missed.
            let reconnected = service.monitor.on_reconnected();
            service.monitor.start(remote.clone());

            let weak = Arc::downgrade(&service);
            let listener = tokio::spawn(run_reconnect_listener(weak.clone(), reconnected));
            let reconciler =
                tokio::spawn(run_mode_reconciler(weak, service.config.mode_check_interval));
            service.lock_tasks().extend([listener, reconciler]);
        }

        info!(
            "Sync service started (mode: {:?}, namespace: {})",
            initial,
            service.paths.namespace()
        );
        service
    }

    /// Build the facade from configuration alone: cache file, HTTP remote
    /// adapter and the system clock.
    pub async fn connect(config: SyncConfig) -> Result<Arc<Self>, SyncError> {
        let cache = LocalCache::open(&config.cache_path).await?;
        let remote: Option<Arc<dyn RemoteStore>> = if config.remote_enabled {
            Some(Arc::new(HttpRemoteStore::new(&config)?))
        } else {
            None
        };
        Ok(Self::init(config, cache, remote, Arc::new(SystemClock)).await)
    }

    /// Stop background work. Live subscription handles keep working until
    /// they are dropped.
    pub fn dispose(&self) {
        self.monitor.stop();
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        info!("Sync service disposed");
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn paths(&self) -> &RemotePaths {
        &self.paths
    }

    pub fn cache(&self) -> &LocalCache {
        self.mirror.cache()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn today(&self) -> Day {
        self.clock.today()
    }

    pub fn mode(&self) -> SyncMode {
        *self.mode.borrow()
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Align the mode with connectivity: remote mode falls back to local
    /// when the store is unreachable, and local mode returns to remote once
    /// it is reachable again (only when remote sync is enabled).
    pub fn reconcile_mode(&self) -> SyncMode {
        if self.remote.is_none() {
            return SyncMode::Local;
        }

        let reachable = self.monitor.is_reachable();
        let mut next = SyncMode::Local;
        let changed = self.mode.send_if_modified(|mode| {
            next = match (*mode, reachable) {
                (SyncMode::Remote, false) => SyncMode::Local,
                (SyncMode::Local, true) => SyncMode::Remote,
                (current, _) => current,
            };
            let changed = *mode != next;
            *mode = next;
            changed
        });

        if changed {
            info!("Sync mode changed to {:?}", next);
            let _ = self.events.send(SyncEvent::ModeChanged(next));
        }
        next
    }

    /// The remote store, when reads and writes should go to it.
    fn remote_target(&self) -> Option<&Arc<dyn RemoteStore>> {
        if self.mode() == SyncMode::Remote && self.monitor.is_reachable() {
            self.remote.as_ref()
        } else {
            None
        }
    }

    // ==================== DAY COLLECTIONS ====================

    /// Read one day of a collection. Remote read failures are returned as
    /// `RemoteRead`; the cache is not consulted in that case.
    pub async fn get_for_day<C: DayCollection>(&self, day: Day) -> Result<C::Value, SyncError> {
        match self.remote_target() {
            Some(remote) => self.fetch_day::<C>(remote, day).await,
            None => Ok(self.mirror.get::<C>(day).await),
        }
    }

    async fn fetch_day<C: DayCollection>(
        &self,
        remote: &Arc<dyn RemoteStore>,
        day: Day,
    ) -> Result<C::Value, SyncError> {
        let path = self.paths.day(C::REMOTE_ROOT, day);
        let value = C::from_remote(remote.get(&path).await?);
        self.mirror.put::<C>(day, &value).await;
        Ok(value)
    }

    /// Replace one day of a collection. When reachable the remote store is
    /// written first and the cache only on success.
    pub async fn set_for_day<C: DayCollection>(&self, day: Day, value: &C::Value) -> Result<(), SyncError> {
        C::validate(value).map_err(SyncError::InvalidRecord)?;

        let _guard = self.write_lock.lock().await;
        if let Some(remote) = self.remote_target() {
            let path = self.paths.day(C::REMOTE_ROOT, day);
            let payload = C::to_remote(value, self.clock.now_millis())
                .map_err(|e| SyncError::InvalidRecord(e.to_string()))?;

            if let Err(e) = remote.set(&path, payload).await {
                error!("Saving {} for {} failed: {}", C::NAME, day, e);
                return Err(e);
            }
        } else {
            debug!("Offline: {} for {} saved locally only", C::NAME, day);
        }

        self.mirror.put::<C>(day, value).await;
        Ok(())
    }

    /// Follow one day of a collection. `callback` receives the current
    /// value and then every change, each already mirrored into the cache.
    /// Without a remote store the cached value is delivered once.
    pub fn subscribe_for_day<C, F>(&self, day: Day, callback: F) -> SubscriptionHandle
    where
        C: DayCollection,
        F: Fn(C::Value) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();
        let mirror = self.mirror.clone();

        let task = match &self.remote {
            Some(remote) => {
                let mut subscription = remote.subscribe(&self.paths.day(C::REMOTE_ROOT, day));
                tokio::spawn(async move {
                    while let Some(event) = subscription.next().await {
                        match event {
                            RemoteEvent::Value(raw) => {
                                if !flag.load(Ordering::SeqCst) {
                                    break;
                                }
                                let value = C::from_remote(raw);
                                mirror.put::<C>(day, &value).await;
                                if !flag.load(Ordering::SeqCst) {
                                    break;
                                }
                                callback(value);
                            }
                            RemoteEvent::Error(message) => {
                                warn!("Subscription to {} for {} reported: {}", C::NAME, day, message);
                            }
                        }
                    }
                })
            }
            None => tokio::spawn(async move {
                let value = mirror.get::<C>(day).await;
                if flag.load(Ordering::SeqCst) {
                    callback(value);
                }
            }),
        };

        SubscriptionHandle::new(active, task)
    }

    // ==================== SETTINGS ====================

    /// Read one settings leaf.
    pub async fn get_setting(&self, key: &str) -> Result<Option<Value>, SyncError> {
        check_setting_key(key)?;
        match self.remote_target() {
            Some(remote) => {
                let value = remote.get(&self.paths.setting(key)).await?;
                self.mirror.put_setting(key, value.as_ref()).await;
                Ok(value)
            }
            None => Ok(self.mirror.setting(key).await),
        }
    }

    /// Write one settings leaf. `Value::Null` removes it.
    pub async fn set_setting(&self, key: &str, value: Value) -> Result<(), SyncError> {
        check_setting_key(key)?;

        let _guard = self.write_lock.lock().await;
        if let Some(remote) = self.remote_target() {
            if let Err(e) = remote.set(&self.paths.setting(key), value.clone()).await {
                error!("Saving setting '{}' failed: {}", key, e);
                return Err(e);
            }
        }

        let stored = if value.is_null() { None } else { Some(&value) };
        self.mirror.put_setting(key, stored).await;
        Ok(())
    }

    pub async fn get_settings(&self) -> Result<GlobalSettings, SyncError> {
        match self.remote_target() {
            Some(remote) => self.fetch_settings(remote).await,
            None => Ok(self.mirror.settings().await),
        }
    }

    async fn fetch_settings(&self, remote: &Arc<dyn RemoteStore>) -> Result<GlobalSettings, SyncError> {
        let raw = remote.get(&self.paths.settings()).await?;
        let settings = decode_settings(raw.clone());
        self.mirror
            .put_settings(&raw.unwrap_or_else(|| Value::Object(Map::new())))
            .await;
        Ok(settings)
    }

    /// Replace the whole settings subtree.
    pub async fn set_settings(&self, settings: &GlobalSettings) -> Result<(), SyncError> {
        let value = serde_json::to_value(settings).map_err(|e| SyncError::InvalidRecord(e.to_string()))?;

        let _guard = self.write_lock.lock().await;
        if let Some(remote) = self.remote_target() {
            if let Err(e) = remote.set(&self.paths.settings(), value.clone()).await {
                error!("Saving settings failed: {}", e);
                return Err(e);
            }
        }

        self.mirror.put_settings(&value).await;
        Ok(())
    }

    /// Follow the settings. Same delivery rules as [`subscribe_for_day`].
    ///
    /// [`subscribe_for_day`]: SyncService::subscribe_for_day
    pub fn subscribe_settings<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(GlobalSettings) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();
        let mirror = self.mirror.clone();

        let task = match &self.remote {
            Some(remote) => {
                let mut subscription = remote.subscribe(&self.paths.settings());
                tokio::spawn(async move {
                    while let Some(event) = subscription.next().await {
                        match event {
                            RemoteEvent::Value(raw) => {
                                if !flag.load(Ordering::SeqCst) {
                                    break;
                                }
                                let settings = decode_settings(raw.clone());
                                mirror
                                    .put_settings(&raw.unwrap_or_else(|| Value::Object(Map::new())))
                                    .await;
                                if !flag.load(Ordering::SeqCst) {
                                    break;
                                }
                                callback(settings);
                            }
                            RemoteEvent::Error(message) => {
                                warn!("Settings subscription reported: {}", message);
                            }
                        }
                    }
                })
            }
            None => tokio::spawn(async move {
                let settings = mirror.settings().await;
                if flag.load(Ordering::SeqCst) {
                    callback(settings);
                }
            }),
        };

        SubscriptionHandle::new(active, task)
    }

    // ==================== REFRESH ====================

    /// Re-fetch every collection of every active day, and the settings,
    /// from the remote store into the cache. A no-op while unreachable.
    pub async fn refresh_all(&self) -> Result<(), SyncError> {
        let Some(remote) = self.remote_target() else {
            debug!("Refresh skipped, remote store not reachable");
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        for &day in self.config.week.days() {
            self.fetch_day::<Resources>(remote, day).await?;
            self.fetch_day::<Persons>(remote, day).await?;
            self.fetch_day::<RosterDates>(remote, day).await?;
        }
        self.fetch_settings(remote).await?;

        info!("Local cache refreshed from remote store");
        let _ = self.events.send(SyncEvent::Refreshed);
        Ok(())
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }
}

fn check_setting_key(key: &str) -> Result<(), SyncError> {
    if is_valid_setting_key(key) {
        Ok(())
    } else {
        Err(SyncError::InvalidRecord(format!("Invalid setting key '{}'", key)))
    }
}

async fn run_mode_reconciler(service: Weak<SyncService>, every: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(service) = service.upgrade() else {
            break;
        };
        service.reconcile_mode();
    }
}

async fn run_reconnect_listener(service: Weak<SyncService>, mut reconnected: broadcast::Receiver<()>) {
    loop {
        match reconnected.recv().await {
            Ok(()) | Err(RecvError::Lagged(_)) => {
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.reconcile_mode();
                if let Err(e) = service.refresh_all().await {
                    warn!("Refresh after reconnect failed: {}", e);
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

//! Cache side of the facade: day maps and the settings object.
//!
//! Every partitioned entry is one JSON object `{day: value}`; updating a
//! day is a read-modify-write of that object, serialized by `lock`.

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::DayCollection;
use crate::cache::{keys, LocalCache};
use crate::models::{Day, GlobalSettings};

pub(crate) struct CacheMirror {
    cache: LocalCache,
    lock: Mutex<()>,
}

impl CacheMirror {
    pub(crate) fn new(cache: LocalCache) -> Self {
        Self {
            cache,
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Cached value of `day`, or the empty collection.
    pub(crate) async fn get<C: DayCollection>(&self, day: Day) -> C::Value {
        let Some(entry) = self.load_object(C::CACHE_KEY).await.remove(day.as_str()) else {
            return C::Value::default();
        };

        match serde_json::from_value(entry) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    "Cached {} for {} is malformed, using empty: {}",
                    C::NAME,
                    day,
                    e
                );
                C::Value::default()
            }
        }
    }

    /// Store `value` as the cached value of `day`.
    pub(crate) async fn put<C: DayCollection>(&self, day: Day, value: &C::Value) {
        let entry = match serde_json::to_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Cannot mirror {} for {}: {}", C::NAME, day, e);
                return;
            }
        };

        let _guard = self.lock.lock().await;
        let mut map = self.load_object(C::CACHE_KEY).await;
        map.insert(day.as_str().to_string(), entry);
        self.cache.save(C::CACHE_KEY, &Value::Object(map)).await;
        tracing::debug!("Mirrored {} for {}", C::NAME, day);
    }

    pub(crate) async fn settings(&self) -> GlobalSettings {
        decode_settings(Some(Value::Object(self.load_object(keys::SETTINGS).await)))
    }

    pub(crate) async fn setting(&self, key: &str) -> Option<Value> {
        self.load_object(keys::SETTINGS).await.remove(key)
    }

    pub(crate) async fn put_settings(&self, settings: &Value) {
        let _guard = self.lock.lock().await;
        self.cache.save(keys::SETTINGS, settings).await;
    }

    /// `None` removes the key.
    pub(crate) async fn put_setting(&self, key: &str, value: Option<&Value>) {
        let _guard = self.lock.lock().await;
        let mut map = self.load_object(keys::SETTINGS).await;
        match value {
            Some(value) => map.insert(key.to_string(), value.clone()),
            None => map.remove(key),
        };
        self.cache.save(keys::SETTINGS, &Value::Object(map)).await;
    }

    async fn load_object(&self, key: &str) -> Map<String, Value> {
        match self.cache.load_raw(key).await {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                tracing::warn!("Cache entry '{}' is not an object, replacing: {}", key, other);
                Map::new()
            }
        }
    }
}

/// Settings from a stored object; missing fields take their defaults and
/// a malformed object yields the defaults.
pub(crate) fn decode_settings(value: Option<Value>) -> GlobalSettings {
    match value {
        Some(value @ Value::Object(_)) => serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!("Settings are malformed, using defaults: {}", e);
            GlobalSettings::default()
        }),
        _ => GlobalSettings::default(),
    }
}

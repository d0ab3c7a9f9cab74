//! Conversion between ordered record lists and remote keyed maps.
//!
//! Remotely a collection is an object keyed by the record's natural key so
//! that concurrent partial writes touch distinct members. Every entry is
//! stamped with two metadata fields:
//!
//! * `updatedAt`: epoch millis of the write that produced it,
//! * `position`: index in the list that was written.
//!
//! [`from_remote_map`] strips both, so callers never see them, and uses
//! `position` to restore the list order.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};

use crate::models::{PersonRecord, ResourceRecord};

pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const POSITION_FIELD: &str = "position";

/// A record stored remotely under its own key.
pub trait KeyedRecord: Serialize + DeserializeOwned {
    /// Map key of this record.
    fn remote_key(&self) -> &str;

    /// Restore the key field from the map key when the entry lacks it.
    fn restore_key(&mut self, key: &str);
}

impl KeyedRecord for ResourceRecord {
    fn remote_key(&self) -> &str {
        &self.id
    }

    fn restore_key(&mut self, key: &str) {
        if self.id.is_empty() {
            self.id = key.to_string();
        }
    }
}

impl KeyedRecord for PersonRecord {
    fn remote_key(&self) -> &str {
        &self.name
    }

    fn restore_key(&mut self, key: &str) {
        if self.name.is_empty() {
            self.name = key.to_string();
        }
    }
}

/// Convert an ordered list into a keyed map, stamping each entry.
pub fn to_remote_map<R: KeyedRecord>(records: &[R], stamp: i64) -> Result<Value, serde_json::Error> {
    let mut map = Map::new();
    for (position, record) in records.iter().enumerate() {
        let mut entry = serde_json::to_value(record)?;
        if let Value::Object(fields) = &mut entry {
            fields.insert(UPDATED_AT_FIELD.to_string(), json!(stamp));
            fields.insert(POSITION_FIELD.to_string(), json!(position));
        }
        map.insert(record.remote_key().to_string(), entry);
    }
    Ok(Value::Object(map))
}

/// Convert a keyed map (or a plain array) back into an ordered list.
///
/// Entries that do not decode are skipped with a warning; a missing or
/// non-collection value yields an empty list.
pub fn from_remote_map<R: KeyedRecord>(value: Option<Value>) -> Vec<R> {
    let from_array = matches!(value, Some(Value::Array(_)));
    let entries: Vec<(String, Value)> = match value {
        Some(Value::Object(map)) => map.into_iter().collect(),
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item))
            .collect(),
        Some(Value::Null) | None => return Vec::new(),
        Some(other) => {
            tracing::warn!("Expected a remote collection, found {}", other);
            return Vec::new();
        }
    };

    let mut decoded: Vec<(Option<u64>, String, R)> = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        if entry.is_null() {
            continue;
        }
        let (entry, mut position) = strip_metadata(entry);
        if from_array {
            position = position.or_else(|| key.parse().ok());
        }
        match serde_json::from_value::<R>(entry) {
            Ok(mut record) => {
                record.restore_key(&key);
                decoded.push((position, key, record));
            }
            Err(e) => tracing::warn!("Skipping undecodable remote entry '{}': {}", key, e),
        }
    }

    // Entries without a position (written by older clients) go last, by key.
    decoded.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.1.cmp(&b.1)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.1.cmp(&b.1),
    });

    decoded.into_iter().map(|(_, _, record)| record).collect()
}

fn strip_metadata(entry: Value) -> (Value, Option<u64>) {
    match entry {
        Value::Object(mut fields) => {
            fields.remove(UPDATED_AT_FIELD);
            let position = fields.remove(POSITION_FIELD).and_then(|p| p.as_u64());
            (Value::Object(fields), position)
        }
        other => (other, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceStatus;

    #[test]
    fn test_to_remote_map_stamps_entries() {
        let records = vec![PersonRecord::new("Zoe", "17:00"), PersonRecord::new("Adam", "15:00")];
        let map = to_remote_map(&records, 42).unwrap();

        assert_eq!(map["Zoe"]["updatedAt"], 42);
        assert_eq!(map["Zoe"]["position"], 0);
        assert_eq!(map["Adam"]["position"], 1);
        assert_eq!(map["Adam"]["endTime"], "15:00");
    }

    #[test]
    fn test_from_remote_map_strips_metadata_and_keeps_order() {
        let records = vec![PersonRecord::new("Zoe", "17:00"), PersonRecord::new("Adam", "15:00")];
        let map = to_remote_map(&records, 42).unwrap();

        let restored: Vec<PersonRecord> = from_remote_map(Some(map));
        assert_eq!(restored, records);
    }

    #[test]
    fn test_from_remote_map_restores_missing_key() {
        let value = json!({
            "RoomA": { "order": 0, "status": "NotRunning" }
        });
        let restored: Vec<ResourceRecord> = from_remote_map(Some(value));

        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].id, "RoomA");
        assert_eq!(restored[0].status, ResourceStatus::NotRunning);
    }

    #[test]
    fn test_from_remote_map_skips_bad_entries() {
        let value = json!({
            "ok": { "name": "ok", "endTime": "12:00" },
            "bad": { "name": "bad", "mealTaken": "definitely" }
        });
        let restored: Vec<PersonRecord> = from_remote_map(Some(value));
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].name, "ok");
    }

    #[test]
    fn test_from_remote_map_accepts_arrays_and_nothing() {
        let restored: Vec<PersonRecord> =
            from_remote_map(Some(json!([{ "name": "A" }, null, { "name": "B" }])));
        assert_eq!(restored.len(), 2);

        let empty: Vec<PersonRecord> = from_remote_map(None);
        assert!(empty.is_empty());
        let empty: Vec<PersonRecord> = from_remote_map(Some(json!("oops")));
        assert!(empty.is_empty());
    }
}

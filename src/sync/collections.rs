//! Typed per-day collections.
//!
//! Each collection knows where it lives (remote root and cache key), how it
//! is validated, and how it converts to and from its remote form.

use std::collections::HashSet;
use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::cache::keys;
use crate::models::{normalize_order, validate_roster_date, PersonRecord, ResourceRecord};
use crate::remote::{from_remote_map, to_remote_map};

/// A collection partitioned by day.
pub trait DayCollection: Send + Sync + 'static {
    type Value: Clone + Default + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Human-readable name used in logs.
    const NAME: &'static str;
    /// Segment under the namespace, e.g. `resourcesByDay`.
    const REMOTE_ROOT: &'static str;
    /// Cache entry holding the day map.
    const CACHE_KEY: &'static str;

    fn validate(value: &Self::Value) -> Result<(), String>;

    /// Remote form, stamped with `stamp` where entries carry metadata.
    fn to_remote(value: &Self::Value, stamp: i64) -> Result<Value, serde_json::Error>;

    fn from_remote(value: Option<Value>) -> Self::Value;
}

/// Theatres of a day.
pub struct Resources;

impl DayCollection for Resources {
    type Value = Vec<ResourceRecord>;

    const NAME: &'static str = "theatres";
    const REMOTE_ROOT: &'static str = keys::RESOURCES_BY_DAY;
    const CACHE_KEY: &'static str = keys::RESOURCES_BY_DAY;

    fn validate(value: &Self::Value) -> Result<(), String> {
        let mut ids = HashSet::new();
        for record in value {
            record.validate()?;
            if !ids.insert(record.id.as_str()) {
                return Err(format!("Duplicate theatre id '{}'", record.id));
            }
        }
        Ok(())
    }

    fn to_remote(value: &Self::Value, stamp: i64) -> Result<Value, serde_json::Error> {
        to_remote_map(value, stamp)
    }

    fn from_remote(value: Option<Value>) -> Self::Value {
        let mut records: Vec<ResourceRecord> = from_remote_map(value);
        for record in &mut records {
            record.normalize_identity();
        }
        normalize_order(&mut records);
        records
    }
}

/// Practitioners of a day.
pub struct Persons;

impl DayCollection for Persons {
    type Value = Vec<PersonRecord>;

    const NAME: &'static str = "practitioners";
    const REMOTE_ROOT: &'static str = keys::PERSONS_BY_DAY;
    const CACHE_KEY: &'static str = keys::PERSONS_BY_DAY;

    fn validate(value: &Self::Value) -> Result<(), String> {
        let mut names = HashSet::new();
        for record in value {
            record.validate()?;
            if !names.insert(record.name.as_str()) {
                return Err(format!("Duplicate practitioner '{}'", record.name));
            }
        }
        Ok(())
    }

    fn to_remote(value: &Self::Value, stamp: i64) -> Result<Value, serde_json::Error> {
        to_remote_map(value, stamp)
    }

    fn from_remote(value: Option<Value>) -> Self::Value {
        from_remote_map(value)
    }
}

/// Roster date of a day, `DD/MM/YYYY` or empty.
pub struct RosterDates;

impl DayCollection for RosterDates {
    type Value = String;

    const NAME: &'static str = "roster date";
    const REMOTE_ROOT: &'static str = keys::ROSTER_DATES_BY_DAY;
    const CACHE_KEY: &'static str = keys::ROSTER_DATES_BY_DAY;

    fn validate(value: &Self::Value) -> Result<(), String> {
        validate_roster_date(value)
    }

    fn to_remote(value: &Self::Value, _stamp: i64) -> Result<Value, serde_json::Error> {
        // An empty date removes the leaf.
        if value.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(Value::String(value.clone()))
        }
    }

    fn from_remote(value: Option<Value>) -> Self::Value {
        match value {
            Some(Value::String(date)) => date,
            Some(other) => {
                tracing::warn!("Ignoring non-string roster date {}", other);
                String::new()
            }
            None => String::new(),
        }
    }
}

//! Export/import documents.
//!
//! Two shapes exist: the current day-partitioned snapshot and the legacy
//! flat document written before the board had per-day schedules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Day, GlobalSettings, PersonRecord, ResourceRecord};

pub const SNAPSHOT_SCHEMA_VERSION: i32 = 2;

/// Full board export, partitioned by day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: i32,
    #[serde(default)]
    pub exported_at: String,
    #[serde(default)]
    pub resources_by_day: BTreeMap<Day, Vec<ResourceRecord>>,
    #[serde(default)]
    pub persons_by_day: BTreeMap<Day, Vec<PersonRecord>>,
    #[serde(default)]
    pub roster_dates_by_day: BTreeMap<Day, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<GlobalSettings>,
}

fn default_schema_version() -> i32 {
    SNAPSHOT_SCHEMA_VERSION
}

/// Flat document from before day partitioning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LegacySnapshot {
    #[serde(default)]
    pub resources: Vec<ResourceRecord>,
    #[serde(default)]
    pub person_list: Vec<PersonRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roster_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<GlobalSettings>,
}

impl LegacySnapshot {
    /// Place every legacy collection in `bucket` and give the remaining
    /// `days` empty collections.
    pub fn into_partitioned(self, bucket: Day, days: &[Day], exported_at: String) -> BoardSnapshot {
        let mut snapshot = BoardSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            exported_at,
            resources_by_day: BTreeMap::new(),
            persons_by_day: BTreeMap::new(),
            roster_dates_by_day: BTreeMap::new(),
            settings: self.settings,
        };

        for &day in days {
            snapshot.resources_by_day.insert(day, Vec::new());
            snapshot.persons_by_day.insert(day, Vec::new());
            snapshot.roster_dates_by_day.insert(day, String::new());
        }

        snapshot.resources_by_day.insert(bucket, self.resources);
        snapshot.persons_by_day.insert(bucket, self.person_list);
        snapshot
            .roster_dates_by_day
            .insert(bucket, self.roster_date.unwrap_or_default());
        snapshot
    }
}

/// A parsed import file in whichever shape it was written.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportDocument {
    Partitioned(BoardSnapshot),
    Legacy(LegacySnapshot),
}

const PARTITIONED_KEYS: [&str; 3] = ["resourcesByDay", "personsByDay", "rosterDatesByDay"];
const LEGACY_KEYS: [&str; 3] = ["resources", "personList", "rosterDate"];

impl ImportDocument {
    /// Detect the document shape and parse it.
    pub fn parse(json: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| format!("Import file is not valid JSON: {}", e))?;

        let Some(object) = value.as_object() else {
            return Err("Import file must contain a JSON object".to_string());
        };

        if PARTITIONED_KEYS.iter().any(|k| object.contains_key(*k)) {
            let snapshot: BoardSnapshot = serde_json::from_value(value)
                .map_err(|e| format!("Invalid day-partitioned import file: {}", e))?;
            return Ok(ImportDocument::Partitioned(snapshot));
        }

        if LEGACY_KEYS.iter().any(|k| object.contains_key(*k)) {
            let legacy: LegacySnapshot = serde_json::from_value(value)
                .map_err(|e| format!("Invalid legacy import file: {}", e))?;
            return Ok(ImportDocument::Legacy(legacy));
        }

        Err("Import file contains neither day-partitioned nor legacy board data".to_string())
    }
}

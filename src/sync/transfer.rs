//! Export and import of the whole board.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::info;

use super::{DayCollection, Persons, Resources, RosterDates, SyncService};
use crate::errors::SyncError;
use crate::models::{normalize_order, BoardSnapshot, Day, ImportDocument, SNAPSHOT_SCHEMA_VERSION};

/// What an import wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    /// Set when a legacy document was placed into this day.
    pub legacy_bucket: Option<Day>,
    pub days: usize,
    pub resources: usize,
    pub persons: usize,
    pub settings: bool,
}

impl SyncService {
    /// Snapshot of every active day and the settings, read through the
    /// same path as [`get_for_day`](SyncService::get_for_day).
    pub async fn export_all_data(&self) -> Result<BoardSnapshot, SyncError> {
        let mut snapshot = BoardSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            exported_at: self.timestamp(),
            resources_by_day: BTreeMap::new(),
            persons_by_day: BTreeMap::new(),
            roster_dates_by_day: BTreeMap::new(),
            settings: None,
        };

        for &day in self.config().week.days() {
            snapshot
                .resources_by_day
                .insert(day, self.get_for_day::<Resources>(day).await?);
            snapshot
                .persons_by_day
                .insert(day, self.get_for_day::<Persons>(day).await?);
            snapshot
                .roster_dates_by_day
                .insert(day, self.get_for_day::<RosterDates>(day).await?);
        }
        snapshot.settings = Some(self.get_settings().await?);

        Ok(snapshot)
    }

    /// [`export_all_data`](SyncService::export_all_data) as pretty JSON.
    pub async fn export_json(&self) -> Result<String, SyncError> {
        let snapshot = self.export_all_data().await?;
        serde_json::to_string_pretty(&snapshot)
            .map_err(|e| SyncError::Import(format!("Cannot encode export: {}", e)))
    }

    /// Import a day-partitioned or legacy document. Everything is validated
    /// before the first write; a legacy document goes into today's bucket
    /// and every other active day is emptied.
    pub async fn import_all_data(&self, json: &str) -> Result<ImportSummary, SyncError> {
        let document = ImportDocument::parse(json).map_err(SyncError::Import)?;

        let (mut snapshot, legacy_bucket) = match document {
            ImportDocument::Partitioned(snapshot) => (snapshot, None),
            ImportDocument::Legacy(legacy) => {
                let bucket = self.config().week.bucket_for(self.today());
                let snapshot =
                    legacy.into_partitioned(bucket, self.config().week.days(), self.timestamp());
                (snapshot, Some(bucket))
            }
        };

        // Older files key theatres by display name only.
        for records in snapshot.resources_by_day.values_mut() {
            for record in records.iter_mut() {
                record.normalize_identity();
            }
            normalize_order(records);
        }

        validate_days::<Resources>(&snapshot.resources_by_day)?;
        validate_days::<Persons>(&snapshot.persons_by_day)?;
        validate_days::<RosterDates>(&snapshot.roster_dates_by_day)?;

        for (day, records) in &snapshot.resources_by_day {
            self.set_for_day::<Resources>(*day, records).await?;
        }
        for (day, records) in &snapshot.persons_by_day {
            self.set_for_day::<Persons>(*day, records).await?;
        }
        for (day, date) in &snapshot.roster_dates_by_day {
            self.set_for_day::<RosterDates>(*day, date).await?;
        }
        if let Some(settings) = &snapshot.settings {
            self.set_settings(settings).await?;
        }

        let mut days: Vec<Day> = snapshot
            .resources_by_day
            .keys()
            .chain(snapshot.persons_by_day.keys())
            .chain(snapshot.roster_dates_by_day.keys())
            .copied()
            .collect();
        days.sort();
        days.dedup();

        let summary = ImportSummary {
            legacy_bucket,
            days: days.len(),
            resources: snapshot.resources_by_day.values().map(Vec::len).sum(),
            persons: snapshot.persons_by_day.values().map(Vec::len).sum(),
            settings: snapshot.settings.is_some(),
        };
        info!("Imported board data: {:?}", summary);
        Ok(summary)
    }

    fn timestamp(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.clock.now_millis())
            .unwrap_or_else(Utc::now)
            .to_rfc3339()
    }
}

fn validate_days<C: DayCollection>(days: &BTreeMap<Day, C::Value>) -> Result<(), SyncError> {
    for (day, value) in days {
        C::validate(value).map_err(|e| SyncError::Import(format!("{} ({}): {}", C::NAME, day, e)))?;
    }
    Ok(())
}

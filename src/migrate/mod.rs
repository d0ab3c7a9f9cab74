//! One-shot upgrade of the local cache to the day-partitioned schema.
//!
//! Before the board had per-day schedules the cache held three flat
//! entries. The upgrade moves them into today's bucket of the partitioned
//! entries and keeps the originals under `{key}_legacy`. It runs only when
//! some legacy entry exists and no partitioned entry does, so running it
//! again is a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{keys, LocalCache};
use crate::errors::SyncError;
use crate::models::{normalize_order, Clock, Day, PersonRecord, ResourceRecord, WeekLength};

/// Legacy flat key and the partitioned key that replaces it.
pub const KEY_MAPPINGS: [(&str, &str); 3] = [
    (keys::LEGACY_RESOURCES, keys::RESOURCES_BY_DAY),
    (keys::LEGACY_PERSONS, keys::PERSONS_BY_DAY),
    (keys::LEGACY_ROSTER_DATE, keys::ROSTER_DATES_BY_DAY),
];

/// What a migrator run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing to upgrade, or already upgraded.
    NotNeeded,
    Migrated {
        bucket: Day,
        resources: usize,
        persons: usize,
    },
}

pub struct SchemaMigrator {
    cache: LocalCache,
    week: WeekLength,
    clock: Arc<dyn Clock>,
}

impl SchemaMigrator {
    pub fn new(cache: LocalCache, week: WeekLength, clock: Arc<dyn Clock>) -> Self {
        Self { cache, week, clock }
    }

    /// Some legacy entry exists and no partitioned entry does.
    pub async fn needs_migration(&self) -> bool {
        let mut has_legacy = false;
        for (legacy, partitioned) in KEY_MAPPINGS {
            if self.cache.contains(partitioned).await {
                return false;
            }
            has_legacy |= self.cache.contains(legacy).await;
        }
        has_legacy
    }

    /// Upgrade the cache if needed. On failure every partitioned entry
    /// written so far is removed and the legacy entries are left as they
    /// were, so the next start tries again.
    pub async fn run(&self) -> Result<MigrationOutcome, SyncError> {
        if !self.needs_migration().await {
            return Ok(MigrationOutcome::NotNeeded);
        }

        let bucket = self.week.bucket_for(self.clock.today());
        info!("Migrating local cache to per-day schema (bucket: {})", bucket);

        let mut resources: Vec<ResourceRecord> = self.load_legacy(keys::LEGACY_RESOURCES).await?;
        for record in &mut resources {
            record.normalize_identity();
        }
        normalize_order(&mut resources);

        let persons: Vec<PersonRecord> = self.load_legacy(keys::LEGACY_PERSONS).await?;
        let roster_date: String = self.load_legacy(keys::LEGACY_ROSTER_DATE).await?;

        let outcome = MigrationOutcome::Migrated {
            bucket,
            resources: resources.len(),
            persons: persons.len(),
        };

        let partitioned = [
            (keys::RESOURCES_BY_DAY, self.partition(bucket, resources)?),
            (keys::PERSONS_BY_DAY, self.partition(bucket, persons)?),
            (keys::ROSTER_DATES_BY_DAY, self.partition(bucket, roster_date)?),
        ];

        let mut written: Vec<String> = Vec::new();
        for (key, value) in &partitioned {
            if let Err(e) = self.cache.try_save(key, value).await {
                self.roll_back(&written).await;
                return Err(SyncError::Migration(format!(
                    "Writing '{}' failed, migration rolled back: {}",
                    key, e
                )));
            }
            written.push(key.to_string());
        }

        // Every backup lands before any flat key goes away, so a failure
        // part way leaves all legacy data where the next start finds it.
        let mut legacy_present: Vec<&str> = Vec::new();
        for (legacy, _) in KEY_MAPPINGS {
            let Some(original) = self.cache.load_raw(legacy).await else {
                continue;
            };
            let backup = format!("{}{}", legacy, keys::LEGACY_SUFFIX);
            let created = !self.cache.contains(&backup).await;
            if let Err(e) = self.cache.try_save(&backup, &original).await {
                self.roll_back(&written).await;
                return Err(SyncError::Migration(format!(
                    "Keeping legacy '{}' failed, migration rolled back: {}",
                    legacy, e
                )));
            }
            if created {
                written.push(backup);
            }
            legacy_present.push(legacy);
        }

        for legacy in legacy_present {
            // The backup exists, so a leftover flat key loses nothing.
            if let Err(e) = self.cache.try_remove(legacy).await {
                warn!("Legacy key '{}' could not be removed: {}", legacy, e);
            }
        }

        info!("Local cache migration complete: {:?}", outcome);
        Ok(outcome)
    }

    /// Decode a legacy entry; absent means empty.
    async fn load_legacy<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, SyncError> {
        match self.cache.load_raw(key).await {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                SyncError::Migration(format!("Legacy entry '{}' is malformed: {}", key, e))
            }),
        }
    }

    /// `value` in the bucket, defaults on every other active day.
    fn partition<T: serde::Serialize + Default>(&self, bucket: Day, value: T) -> Result<Value, SyncError> {
        let mut map: BTreeMap<Day, T> = self
            .week
            .days()
            .iter()
            .map(|day| (*day, T::default()))
            .collect();
        map.insert(bucket, value);
        serde_json::to_value(map).map_err(|e| SyncError::Migration(e.to_string()))
    }

    async fn roll_back(&self, written: &[String]) {
        for key in written {
            if let Err(e) = self.cache.try_remove(key).await {
                warn!("Rollback of '{}' failed: {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FixedClock;
    use serde_json::json;

    fn migrator(cache: &LocalCache, today: Day) -> SchemaMigrator {
        SchemaMigrator::new(cache.clone(), WeekLength::Five, Arc::new(FixedClock::new(today)))
    }

    async fn seed_legacy(cache: &LocalCache) {
        cache
            .save(
                "resources",
                &json!([
                    { "name": "T2", "order": 1, "status": "Running" },
                    { "name": "T1", "order": 0 }
                ]),
            )
            .await;
        cache
            .save("personList", &json!([{ "name": "Sam", "endTime": "18:00" }]))
            .await;
        cache.save("rosterDate", &json!("01/03/2025")).await;
    }

    #[tokio::test]
    async fn test_migrates_into_todays_bucket() {
        let cache = LocalCache::in_memory().await.unwrap();
        seed_legacy(&cache).await;

        let outcome = migrator(&cache, Day::Tuesday).run().await.unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                bucket: Day::Tuesday,
                resources: 2,
                persons: 1
            }
        );

        let resources: BTreeMap<Day, Vec<ResourceRecord>> =
            cache.load(keys::RESOURCES_BY_DAY, BTreeMap::new()).await;
        assert_eq!(resources.len(), 5);
        assert!(resources[&Day::Monday].is_empty());
        let tuesday = &resources[&Day::Tuesday];
        assert_eq!(tuesday[0].id, "T1");
        assert_eq!(tuesday[1].id, "T2");
        assert_eq!(tuesday[1].name, "T2");

        let roster: BTreeMap<Day, String> = cache.load(keys::ROSTER_DATES_BY_DAY, BTreeMap::new()).await;
        assert_eq!(roster[&Day::Tuesday], "01/03/2025");
        assert_eq!(roster[&Day::Friday], "");

        assert!(!cache.contains("resources").await);
        assert!(!cache.contains("personList").await);
        assert!(cache.contains("resources_legacy").await);
        assert!(cache.contains("rosterDate_legacy").await);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let cache = LocalCache::in_memory().await.unwrap();
        seed_legacy(&cache).await;

        let migrator = migrator(&cache, Day::Monday);
        migrator.run().await.unwrap();
        let after_first = cache.entries().await;

        assert_eq!(migrator.run().await.unwrap(), MigrationOutcome::NotNeeded);
        assert_eq!(cache.entries().await, after_first);
    }

    #[tokio::test]
    async fn test_skips_when_partitioned_data_exists() {
        let cache = LocalCache::in_memory().await.unwrap();
        seed_legacy(&cache).await;
        cache.save(keys::PERSONS_BY_DAY, &json!({ "monday": [] })).await;

        assert_eq!(
            migrator(&cache, Day::Monday).run().await.unwrap(),
            MigrationOutcome::NotNeeded
        );
        assert!(cache.contains("resources").await);
    }

    #[tokio::test]
    async fn test_empty_cache_is_noop() {
        let cache = LocalCache::in_memory().await.unwrap();
        assert_eq!(
            migrator(&cache, Day::Monday).run().await.unwrap(),
            MigrationOutcome::NotNeeded
        );
        assert!(cache.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_weekend_uses_monday_bucket() {
        let cache = LocalCache::in_memory().await.unwrap();
        seed_legacy(&cache).await;

        let outcome = migrator(&cache, Day::Sunday).run().await.unwrap();
        assert!(matches!(outcome, MigrationOutcome::Migrated { bucket: Day::Monday, .. }));
    }

    #[tokio::test]
    async fn test_malformed_legacy_is_left_alone() {
        let cache = LocalCache::in_memory().await.unwrap();
        cache.save("personList", &json!("not a list")).await;

        let err = migrator(&cache, Day::Monday).run().await.unwrap_err();
        assert!(matches!(err, SyncError::Migration(_)));
        assert!(cache.contains("personList").await);
        assert!(!cache.contains(keys::RESOURCES_BY_DAY).await);
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let cache = LocalCache::in_memory().await.unwrap();
        seed_legacy(&cache).await;

        sqlx::query(
            "CREATE TRIGGER reject_roster BEFORE INSERT ON cache_entries
             WHEN NEW.key = 'rosterDatesByDay'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .execute(cache.pool())
        .await
        .unwrap();

        let migrator = migrator(&cache, Day::Monday);
        assert!(matches!(migrator.run().await, Err(SyncError::Migration(_))));

        assert!(!cache.contains(keys::RESOURCES_BY_DAY).await);
        assert!(!cache.contains(keys::PERSONS_BY_DAY).await);
        assert!(cache.contains("resources").await);
        assert!(cache.contains("personList").await);
        assert!(cache.contains("rosterDate").await);

        // Retried on the next start once the fault is gone.
        sqlx::query("DROP TRIGGER reject_roster")
            .execute(cache.pool())
            .await
            .unwrap();
        assert!(matches!(migrator.run().await, Ok(MigrationOutcome::Migrated { .. })));
    }

    #[tokio::test]
    async fn test_failed_backup_keeps_every_flat_key() {
        let cache = LocalCache::in_memory().await.unwrap();
        seed_legacy(&cache).await;

        sqlx::query(
            "CREATE TRIGGER reject_backup BEFORE INSERT ON cache_entries
             WHEN NEW.key = 'personList_legacy'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .execute(cache.pool())
        .await
        .unwrap();

        let migrator = migrator(&cache, Day::Monday);
        assert!(matches!(migrator.run().await, Err(SyncError::Migration(_))));

        assert!(cache.contains("resources").await);
        assert!(cache.contains("personList").await);
        assert!(cache.contains("rosterDate").await);
        assert!(!cache.contains("resources_legacy").await);
        assert!(!cache.contains(keys::RESOURCES_BY_DAY).await);

        sqlx::query("DROP TRIGGER reject_backup")
            .execute(cache.pool())
            .await
            .unwrap();
        assert_eq!(
            migrator.run().await.unwrap(),
            MigrationOutcome::Migrated {
                bucket: Day::Monday,
                resources: 2,
                persons: 1
            }
        );
        let resources: BTreeMap<Day, Vec<ResourceRecord>> =
            cache.load(keys::RESOURCES_BY_DAY, BTreeMap::new()).await;
        assert_eq!(resources[&Day::Monday].len(), 2);
    }
}

//! Theatre (room) records shown on the board.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Running state of a theatre.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ResourceStatus {
    Running,
    Complete,
    #[default]
    NotRunning,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Running => "Running",
            ResourceStatus::Complete => "Complete",
            ResourceStatus::NotRunning => "NotRunning",
        }
    }
}

/// A theatre with its allocation and timing state.
///
/// `id` is the stable identity and the remote map key; `name` is the
/// display label and may be changed freely. Older data keyed theatres by
/// display name, so whichever of the two is missing is filled from the
/// other (see [`ResourceRecord::normalize_identity`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub allocated_person: String,
    /// `HH:MM` or empty.
    #[serde(default)]
    pub eta_time: String,
    /// `HH:MM` or empty.
    #[serde(default)]
    pub person_end_time: String,
    #[serde(default)]
    pub next_person: String,
    #[serde(default)]
    pub status: ResourceStatus,
    #[serde(default)]
    pub auxiliary_field: String,
    #[serde(default)]
    pub order: i64,
}

impl ResourceRecord {
    /// Create a theatre with a fresh stable id.
    pub fn new(name: impl Into<String>, order: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            order,
            ..Default::default()
        }
    }

    /// Display label, falling back to the id for records without one.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Fill whichever of `id` / `name` is empty from the other.
    pub fn normalize_identity(&mut self) {
        if self.id.trim().is_empty() && !self.name.trim().is_empty() {
            self.id = self.name.clone();
        }
        if self.name.trim().is_empty() && !self.id.trim().is_empty() {
            self.name = self.id.clone();
        }
    }

    /// Check the record before it is written anywhere.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Theatre id is required".to_string());
        }
        if !is_clock_time_or_empty(&self.eta_time) {
            return Err(format!(
                "Theatre {}: etaTime '{}' is not HH:MM",
                self.id, self.eta_time
            ));
        }
        if !is_clock_time_or_empty(&self.person_end_time) {
            return Err(format!(
                "Theatre {}: personEndTime '{}' is not HH:MM",
                self.id, self.person_end_time
            ));
        }
        Ok(())
    }
}

/// Sort theatres by `order` and make the orders unique.
///
/// When every order is already distinct the records are only sorted.
/// Otherwise (missing orders deserialize as 0) orders are reassigned from
/// list position, keeping the incoming relative order for ties.
pub fn normalize_order(records: &mut [ResourceRecord]) {
    records.sort_by_key(|r| r.order);

    let has_duplicates = records.windows(2).any(|pair| pair[0].order == pair[1].order);
    if has_duplicates {
        for (index, record) in records.iter_mut().enumerate() {
            record.order = index as i64;
        }
    }
}

/// `true` for an empty string or a valid 24-hour `HH:MM` time.
pub fn is_clock_time_or_empty(value: &str) -> bool {
    value.is_empty() || NaiveTime::parse_from_str(value, "%H:%M").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_with_defaults() {
        let record: ResourceRecord = serde_json::from_value(json!({
            "id": "RoomA",
            "status": "Running",
            "order": 3
        }))
        .unwrap();

        assert_eq!(record.id, "RoomA");
        assert_eq!(record.status, ResourceStatus::Running);
        assert_eq!(record.order, 3);
        assert!(record.allocated_person.is_empty());
    }

    #[test]
    fn test_serializes_camel_case() {
        let record = ResourceRecord {
            id: "T1".to_string(),
            allocated_person: "Dr Who".to_string(),
            eta_time: "09:30".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["allocatedPerson"], "Dr Who");
        assert_eq!(value["etaTime"], "09:30");
        assert_eq!(value["status"], "NotRunning");
    }

    #[test]
    fn test_normalize_identity_from_legacy_name() {
        let mut record = ResourceRecord {
            name: "Theatre 4".to_string(),
            ..Default::default()
        };
        record.normalize_identity();
        assert_eq!(record.id, "Theatre 4");

        let mut record = ResourceRecord {
            id: "T5".to_string(),
            ..Default::default()
        };
        record.normalize_identity();
        assert_eq!(record.name, "T5");
        assert_eq!(record.label(), "T5");
    }

    #[test]
    fn test_new_assigns_stable_id() {
        let a = ResourceRecord::new("Theatre 1", 0);
        let b = ResourceRecord::new("Theatre 1", 1);
        assert_ne!(a.id, b.id);
        assert_eq!(a.label(), "Theatre 1");
    }

    #[test]
    fn test_validate_times() {
        let mut record = ResourceRecord {
            id: "T1".to_string(),
            eta_time: "25:00".to_string(),
            ..Default::default()
        };
        assert!(record.validate().is_err());

        record.eta_time = "13:45".to_string();
        assert!(record.validate().is_ok());

        record.id.clear();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_normalize_order_reassigns_duplicates() {
        let mut records = vec![
            ResourceRecord { id: "a".into(), ..Default::default() },
            ResourceRecord { id: "b".into(), ..Default::default() },
            ResourceRecord { id: "c".into(), ..Default::default() },
        ];
        normalize_order(&mut records);
        let orders: Vec<i64> = records.iter().map(|r| r.order).collect();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_normalize_order_keeps_distinct_orders() {
        let mut records = vec![
            ResourceRecord { id: "late".into(), order: 10, ..Default::default() },
            ResourceRecord { id: "early".into(), order: 2, ..Default::default() },
        ];
        normalize_order(&mut records);
        assert_eq!(records[0].id, "early");
        assert_eq!(records[0].order, 2);
        assert_eq!(records[1].order, 10);
    }
}

//! Practitioner records.

use serde::{Deserialize, Serialize};

use super::is_clock_time_or_empty;

/// A practitioner on the day's list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PersonRecord {
    #[serde(default)]
    pub name: String,
    /// End of shift, `HH:MM`.
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub relief_taken: bool,
    #[serde(default)]
    pub meal_taken: bool,
    #[serde(default)]
    pub unavailable: bool,
}

impl PersonRecord {
    pub fn new(name: impl Into<String>, end_time: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            end_time: end_time.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Practitioner name is required".to_string());
        }
        if !is_clock_time_or_empty(&self.end_time) {
            return Err(format!(
                "Practitioner {}: endTime '{}' is not HH:MM",
                self.name, self.end_time
            ));
        }
        Ok(())
    }
}

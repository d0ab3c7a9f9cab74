//! Board-wide settings and the per-day roster date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Colour theme of the board.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

/// Settings shared by every day. Stored remotely under `settings/*`, one
/// leaf per field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    pub theme: Theme,
    /// Highlight theatres whose practitioner is past their end time.
    pub highlight_overrun: bool,
    /// Highlight practitioners who have not had a relief break.
    pub highlight_relief_due: bool,
    /// Highlight practitioners marked unavailable.
    pub highlight_unavailable: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            highlight_overrun: true,
            highlight_relief_due: true,
            highlight_unavailable: true,
        }
    }
}

/// Setting keys are single path segments.
pub fn is_valid_setting_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Roster dates are `DD/MM/YYYY`; an empty string means "not set".
pub fn validate_roster_date(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    NaiveDate::parse_from_str(value, "%d/%m/%Y")
        .map(|_| ())
        .map_err(|_| format!("Roster date '{}' is not DD/MM/YYYY", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: GlobalSettings = serde_json::from_value(json!({ "theme": "light" })).unwrap();
        assert_eq!(settings.theme, Theme::Light);
        assert!(settings.highlight_overrun);
    }

    #[test]
    fn test_setting_keys() {
        assert!(is_valid_setting_key("theme"));
        assert!(is_valid_setting_key("highlight_overrun"));
        assert!(!is_valid_setting_key(""));
        assert!(!is_valid_setting_key("a/b"));
        assert!(!is_valid_setting_key(".info"));
    }

    #[test]
    fn test_roster_date_format() {
        assert!(validate_roster_date("").is_ok());
        assert!(validate_roster_date("03/02/2025").is_ok());
        assert!(validate_roster_date("2025-02-03").is_err());
        assert!(validate_roster_date("31/02/2025").is_err());
    }
}

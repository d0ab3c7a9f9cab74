//! Day tokens used to partition every per-day collection.

use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};

/// A weekday identifier. Serialized as the lowercase day name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
        Day::Sunday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Day::Monday => "monday",
            Day::Tuesday => "tuesday",
            Day::Wednesday => "wednesday",
            Day::Thursday => "thursday",
            Day::Friday => "friday",
            Day::Saturday => "saturday",
            Day::Sunday => "sunday",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" => Some(Day::Monday),
            "tuesday" => Some(Day::Tuesday),
            "wednesday" => Some(Day::Wednesday),
            "thursday" => Some(Day::Thursday),
            "friday" => Some(Day::Friday),
            "saturday" => Some(Day::Saturday),
            "sunday" => Some(Day::Sunday),
            _ => None,
        }
    }

    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Day::Monday,
            Weekday::Tue => Day::Tuesday,
            Weekday::Wed => Day::Wednesday,
            Weekday::Thu => Day::Thursday,
            Weekday::Fri => Day::Friday,
            Weekday::Sat => Day::Saturday,
            Weekday::Sun => Day::Sunday,
        }
    }

    /// The day of week according to the local wall clock.
    pub fn today() -> Self {
        Self::from_weekday(chrono::Local::now().weekday())
    }

    pub fn is_weekend(&self) -> bool {
        matches!(self, Day::Saturday | Day::Sunday)
    }
}

impl std::fmt::Display for Day {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of days shown on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeekLength {
    /// Monday to Friday.
    #[default]
    Five,
    /// Every day of the week.
    Seven,
}

impl WeekLength {
    pub fn days(&self) -> &'static [Day] {
        match self {
            WeekLength::Five => &Day::ALL[..5],
            WeekLength::Seven => &Day::ALL,
        }
    }

    pub fn contains(&self, day: Day) -> bool {
        self.days().contains(&day)
    }

    /// Bucket that receives undated data (legacy migration, legacy import).
    /// Weekend days fall back to Monday on a five-day board.
    pub fn bucket_for(&self, today: Day) -> Day {
        if self.contains(today) {
            today
        } else {
            Day::Monday
        }
    }
}

/// Source of "now" for anything that depends on the wall clock.
pub trait Clock: Send + Sync {
    fn today(&self) -> Day;

    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Wall-clock implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> Day {
        Day::today()
    }

    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock pinned to one day; used by tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub day: Day,
    pub millis: i64,
}

impl FixedClock {
    pub fn new(day: Day) -> Self {
        Self {
            day,
            millis: 1_700_000_000_000,
        }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> Day {
        self.day
    }

    fn now_millis(&self) -> i64 {
        self.millis
    }
}

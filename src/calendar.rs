use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Deserialize;

/// Answers whether a date can carry reservations.
pub trait CalendarPredicate: Send + Sync {
    fn is_bookable(&self, date: NaiveDate) -> bool;
}

impl<F> CalendarPredicate for F
where
    F: Fn(NaiveDate) -> bool + Send + Sync,
{
    fn is_bookable(&self, date: NaiveDate) -> bool {
        self(date)
    }
}

/// Inclusive date range with no lessons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Vacation {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Weekends, single holidays and vacation ranges are not bookable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchoolCalendar {
    #[serde(default)]
    holidays: BTreeSet<NaiveDate>,
    #[serde(default)]
    vacations: Vec<Vacation>,
}

const HOLIDAYS: &[&str] = &[
    "2024-10-12", "2024-11-01", "2024-12-06", "2024-12-08", "2024-12-25",
    "2025-01-01", "2025-01-06", "2025-02-28", "2025-05-01",
    "2025-10-13", "2025-10-14", "2025-11-01", "2025-12-06", "2025-12-08",
    "2025-12-25", "2026-01-01", "2026-01-06", "2026-02-27", "2026-02-28",
    "2026-05-01", "2026-05-21", "2026-05-22", "2026-05-25",
];

const VACATIONS: &[(&str, &str)] = &[
    ("2024-12-23", "2025-01-07"),
    ("2025-04-14", "2025-04-20"),
    ("2025-06-24", "2025-09-09"),
    ("2025-12-23", "2026-01-06"),
    ("2026-03-30", "2026-04-05"),
    ("2026-06-23", "2026-09-10"),
];

fn parse(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

impl SchoolCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>, vacations: Vec<Vacation>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
            vacations,
        }
    }

    /// Built-in table for the 2024/25 and 2025/26 school years.
    pub fn builtin() -> Self {
        let holidays = HOLIDAYS.iter().filter_map(|s| parse(s));
        let vacations = VACATIONS
            .iter()
            .filter_map(|(s, e)| Some(Vacation { start: parse(s)?, end: parse(e)? }))
            .collect();
        Self::new(holidays, vacations)
    }

    /// Load a `{ "holidays": [..], "vacations": [{start, end}] }` table.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl CalendarPredicate for SchoolCalendar {
    fn is_bookable(&self, date: NaiveDate) -> bool {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if self.holidays.contains(&date) {
            return false;
        }
        !self
            .vacations
            .iter()
            .any(|v| v.start <= date && date <= v.end)
    }
}

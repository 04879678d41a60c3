use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodLogEntry {
    pub user_id: String,
    pub date: NaiveDate,
}

/// One menstrual period's bleeding days, oldest first. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cycle {
    start: NaiveDate,
    dates: Vec<NaiveDate>,
}

impl Cycle {
    /// Sorts and dedups `dates`; `None` when there are none.
    pub fn new(mut dates: Vec<NaiveDate>) -> Option<Self> {
        dates.sort_unstable();
        dates.dedup();
        let start = *dates.first()?;
        Some(Self { start, dates })
    }

    pub(crate) fn starting_at(date: NaiveDate) -> Self {
        Self {
            start: date,
            dates: vec![date],
        }
    }

    /// Callers push in ascending order.
    pub(crate) fn push(&mut self, date: NaiveDate) {
        self.dates.push(date);
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CyclePrediction {
    pub average_cycle_length_days: i64,
    pub predicted_next_period_start: NaiveDate,
    pub predicted_ovulation_date: NaiveDate,
    pub fertile_window: Vec<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub probability: i32,
    pub confidence: i32,
    pub findings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl UserProfile {
    pub fn display_label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("User")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub logged: bool,
    pub predicted_start: bool,
    pub in_predicted_range: bool,
    pub ovulation: bool,
    pub fertile: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarMonth {
    pub year: i32,
    pub month: u32,
    /// Blank cells before the 1st in a Sunday-first grid.
    pub leading_blanks: u32,
    pub days: Vec<CalendarDay>,
}

/// Sections of the context block that are fed by an external read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextSection {
    Profile,
    Diagnosis,
    PeriodLog,
}

impl std::fmt::Display for ContextSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ContextSection::Profile => "profile",
            ContextSection::Diagnosis => "diagnosis",
            ContextSection::PeriodLog => "period log",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContextSummary {
    pub text: String,
    pub degraded: Vec<ContextSection>,
}

impl UserContextSummary {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

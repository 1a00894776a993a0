//! Worker model and per-day timesheet

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::EntityId;

/// Worker employment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Active,
    Inactive,
}

impl WorkerStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

/// One day of a worker's timesheet.
///
/// This is the merge unit for workers: an entry is replaced wholesale,
/// never merged field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimesheetEntry {
    pub hours: f64,
    #[serde(default)]
    pub job_id: Option<EntityId>,
    #[serde(default)]
    pub note: Option<String>,
}

impl TimesheetEntry {
    pub const fn hours(hours: f64) -> Self {
        Self {
            hours,
            job_id: None,
            note: None,
        }
    }
}

/// A field worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub hourly_rate_cents: i64,
    #[serde(default)]
    pub status: WorkerStatus,
    /// Entries keyed by day
    #[serde(default)]
    pub timesheet: BTreeMap<String, TimesheetEntry>,
    /// Last modification time (unix ms) per timesheet day, when known
    #[serde(default)]
    pub timesheet_modified: BTreeMap<String, i64>,
}

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
            hourly_rate_cents: 0,
            status: WorkerStatus::Active,
            timesheet: BTreeMap::new(),
            timesheet_modified: BTreeMap::new(),
        }
    }

    /// Set the entry for `day` and stamp its modification time
    pub fn set_entry(&mut self, day: impl Into<String>, entry: TimesheetEntry, modified_at: i64) {
        let day = day.into();
        self.timesheet_modified.insert(day.clone(), modified_at);
        self.timesheet.insert(day, entry);
    }

    pub fn total_hours(&self) -> f64 {
        self.timesheet.values().map(|entry| entry.hours).sum()
    }
}

//! Sync conflict model

use serde::Serialize;

/// Recorded merge-unit conflict resolved deterministically
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    /// Merge unit key (e.g. timesheet day)
    pub unit_key: String,
    /// Local unit's modification stamp, if known
    pub local_modified_at: Option<i64>,
    /// Incoming unit's modification stamp, if known
    pub incoming_modified_at: Option<i64>,
    /// Which side won and why
    pub resolution: String,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
}

//! Shared cross-platform state types.

use serde::Serialize;

/// Unified sync state reported to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

/// Snapshot of the engine's sync health.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Mutations still waiting in the outbox
    pub queue_size: usize,
    /// Whether a drain pass is in progress
    pub draining: bool,
    /// Current connectivity
    pub online: bool,
    /// Summary state for status indicators
    pub state: SyncState,
    /// Mutations that were dropped after exhausting retries or being rejected
    pub failed_count: usize,
    /// Last successful sync (unix ms)
    pub last_synced_at: Option<i64>,
    /// Local persistence reported a failure; writes may not be durable
    pub storage_degraded: bool,
}

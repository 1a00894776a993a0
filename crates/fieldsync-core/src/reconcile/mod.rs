//! Outbox draining, temporary-id resolution and server refresh.

mod controller;
mod scheduler;

pub use controller::{ReconciliationController, RefreshReport, SyncReport};
pub use scheduler::{SchedulerHandle, SchedulerOptions, SyncScheduler};

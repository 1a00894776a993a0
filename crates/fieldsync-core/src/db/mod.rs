//! Database layer for fieldsync

mod conflict_repository;
mod connection;
mod migrations;
mod outbox_repository;
mod params;
mod record_repository;

pub use conflict_repository::{LibSqlConflictRepository, NewConflict};
pub use connection::Database;
pub use outbox_repository::{LibSqlOutboxRepository, OutboxRepository};
pub use record_repository::{LibSqlRecordRepository, RecordFilter, RecordRepository};

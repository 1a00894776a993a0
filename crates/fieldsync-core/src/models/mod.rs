//! Data models for fieldsync

mod cache;
mod customer;
mod entity;
mod id;
mod job;
mod material;
mod mutation;
mod sync_conflict;
mod worker;

pub use cache::{CacheMetadata, CachedRecord, Priority};
pub use customer::{Customer, CustomerStatus};
pub use entity::{Classification, EntityData, EntityType, Record};
pub use id::{EntityId, IdKind, TempId};
pub use job::{Job, JobStatus};
pub use material::Material;
pub use mutation::{
    FailedMutation, FailureReason, Mutation, MutationId, MutationIntent, Operation,
};
pub use sync_conflict::SyncConflict;
pub use worker::{TimesheetEntry, Worker, WorkerStatus};

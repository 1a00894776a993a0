//! Service layer shared by all clients.

mod engine;
mod entities;
mod local_store;

pub use engine::{SyncEngine, WriteIntent};
pub use entities::{
    CustomerService, Entity, EntityFields, EntityService, JobService, MaterialService,
    WorkerService,
};
pub use local_store::{LocalStore, Replacement};

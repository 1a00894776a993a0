//! fieldsync-core - Core library for fieldsync
//!
//! This crate contains the offline-first sync engine shared by every
//! fieldsync client: the durable local record cache, the mutation outbox,
//! the unit-level conflict resolver and the reconciliation controller that
//! drains the outbox against the remote service.

pub mod audit;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod outbox;
pub mod reconcile;
pub mod resolver;
pub mod services;
pub mod state;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use models::{EntityData, EntityId, EntityType, Record, TempId};

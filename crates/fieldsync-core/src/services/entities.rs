//! Typed services over the sync engine, one per entity type.

use std::marker::PhantomData;

use serde::Serialize;

use super::engine::{SyncEngine, WriteIntent};
use crate::audit::AuditSink;
use crate::db::RecordFilter;
use crate::error::{Error, Result};
use crate::gateway::RemoteGateway;
use crate::models::{
    Customer, EntityData, EntityId, EntityType, Job, JobStatus, Material, Record, TimesheetEntry,
    Worker,
};
use crate::util::{timesheet_day_key, unix_millis_now};

/// Domain payloads the engine can store and sync.
pub trait EntityFields: Clone + Sized {
    const ENTITY_TYPE: EntityType;

    fn from_data(data: EntityData) -> Option<Self>;

    fn into_data(self) -> EntityData;

    /// Reject payloads the remote would refuse anyway.
    fn validate(&self) -> Result<()>;
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_hours(day: &str, entry: &TimesheetEntry) -> Result<()> {
    if !entry.hours.is_finite() || !(0.0..=24.0).contains(&entry.hours) {
        return Err(Error::InvalidInput(format!(
            "hours for {day} must be between 0 and 24"
        )));
    }
    Ok(())
}

impl EntityFields for Customer {
    const ENTITY_TYPE: EntityType = EntityType::Customer;

    fn from_data(data: EntityData) -> Option<Self> {
        match data {
            EntityData::Customer(customer) => Some(customer),
            _ => None,
        }
    }

    fn into_data(self) -> EntityData {
        EntityData::Customer(self)
    }

    fn validate(&self) -> Result<()> {
        require_text("customer name", &self.name)?;
        if self.email.as_deref().is_some_and(|email| !email.contains('@')) {
            return Err(Error::InvalidInput("customer email is not valid".to_string()));
        }
        Ok(())
    }
}

impl EntityFields for Job {
    const ENTITY_TYPE: EntityType = EntityType::Job;

    fn from_data(data: EntityData) -> Option<Self> {
        match data {
            EntityData::Job(job) => Some(job),
            _ => None,
        }
    }

    fn into_data(self) -> EntityData {
        EntityData::Job(self)
    }

    fn validate(&self) -> Result<()> {
        require_text("job title", &self.title)
    }
}

impl EntityFields for Material {
    const ENTITY_TYPE: EntityType = EntityType::Material;

    fn from_data(data: EntityData) -> Option<Self> {
        match data {
            EntityData::Material(material) => Some(material),
            _ => None,
        }
    }

    fn into_data(self) -> EntityData {
        EntityData::Material(self)
    }

    fn validate(&self) -> Result<()> {
        require_text("material name", &self.name)?;
        if !self.quantity.is_finite() || self.quantity < 0.0 {
            return Err(Error::InvalidInput(
                "material quantity must be zero or more".to_string(),
            ));
        }
        Ok(())
    }
}

impl EntityFields for Worker {
    const ENTITY_TYPE: EntityType = EntityType::Worker;

    fn from_data(data: EntityData) -> Option<Self> {
        match data {
            EntityData::Worker(worker) => Some(worker),
            _ => None,
        }
    }

    fn into_data(self) -> EntityData {
        EntityData::Worker(self)
    }

    fn validate(&self) -> Result<()> {
        require_text("worker name", &self.name)?;
        if self.hourly_rate_cents < 0 {
            return Err(Error::InvalidInput(
                "hourly rate must not be negative".to_string(),
            ));
        }
        self.timesheet
            .iter()
            .try_for_each(|(day, entry)| require_hours(day, entry))
    }
}

/// A typed record as returned by the entity services
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity<T> {
    pub id: EntityId,
    pub updated_at: i64,
    #[serde(flatten)]
    pub fields: T,
}

impl<T: EntityFields> Entity<T> {
    fn from_record(record: Record) -> Result<Self> {
        let id = record.id;
        let fields = T::from_data(record.data).ok_or_else(|| {
            Error::Database(format!("{id} is not a {}", T::ENTITY_TYPE))
        })?;
        Ok(Self {
            id,
            updated_at: record.updated_at,
            fields,
        })
    }
}

/// CRUD over one entity type
pub struct EntityService<'a, T, G, A> {
    engine: &'a SyncEngine<G, A>,
    _fields: PhantomData<fn() -> T>,
}

pub type CustomerService<'a, G, A> = EntityService<'a, Customer, G, A>;
pub type JobService<'a, G, A> = EntityService<'a, Job, G, A>;
pub type MaterialService<'a, G, A> = EntityService<'a, Material, G, A>;
pub type WorkerService<'a, G, A> = EntityService<'a, Worker, G, A>;

impl<'a, T, G, A> EntityService<'a, T, G, A>
where
    T: EntityFields,
    G: RemoteGateway + 'static,
    A: AuditSink + 'static,
{
    pub const fn new(engine: &'a SyncEngine<G, A>) -> Self {
        Self {
            engine,
            _fields: PhantomData,
        }
    }

    pub async fn create(&self, fields: T) -> Result<Entity<T>> {
        fields.validate()?;
        let cached = self
            .engine
            .write_optimistic(WriteIntent::Create(fields.into_data()))
            .await?
            .ok_or_else(|| Error::Database("create returned no record".to_string()))?;
        Entity::from_record(cached.record)
    }

    pub async fn update(&self, id: &EntityId, fields: T) -> Result<Entity<T>> {
        fields.validate()?;
        let cached = self
            .engine
            .write_optimistic(WriteIntent::Update {
                id: id.clone(),
                data: fields.into_data(),
            })
            .await?
            .ok_or_else(|| Error::Database("update returned no record".to_string()))?;
        Entity::from_record(cached.record)
    }

    pub async fn delete(&self, id: &EntityId) -> Result<()> {
        self.engine
            .write_optimistic(WriteIntent::Delete {
                entity_type: T::ENTITY_TYPE,
                id: id.clone(),
            })
            .await?;
        Ok(())
    }

    /// Stale copies are returned rather than nothing.
    pub async fn get(&self, id: &EntityId) -> Result<Option<Entity<T>>> {
        self.engine
            .read_through(T::ENTITY_TYPE, id, true)
            .await?
            .map(Entity::from_record)
            .transpose()
    }

    pub async fn list(&self, filter: &RecordFilter) -> Result<Vec<Entity<T>>> {
        self.engine
            .read_all_through(T::ENTITY_TYPE, filter)
            .await?
            .into_iter()
            .map(Entity::from_record)
            .collect()
    }

    /// Load, change and write back one record.
    pub async fn modify(&self, id: &EntityId, change: impl FnOnce(&mut T)) -> Result<Entity<T>> {
        let Some(mut entity) = self.get(id).await? else {
            return Err(Error::NotFound(format!("{} {id}", T::ENTITY_TYPE)));
        };
        change(&mut entity.fields);
        self.update(&entity.id, entity.fields).await
    }
}

impl<G, A> EntityService<'_, Job, G, A>
where
    G: RemoteGateway + 'static,
    A: AuditSink + 'static,
{
    pub async fn for_customer(&self, customer_id: &EntityId) -> Result<Vec<Entity<Job>>> {
        self.list(&RecordFilter::default().owned_by(customer_id.clone()))
            .await
    }

    pub async fn set_status(&self, id: &EntityId, status: JobStatus) -> Result<Entity<Job>> {
        self.modify(id, |job| job.status = status).await
    }

    pub async fn assign_worker(&self, id: &EntityId, worker_id: &EntityId) -> Result<Entity<Job>> {
        self.modify(id, |job| {
            if !job.assigned_workers.contains(worker_id) {
                job.assigned_workers.push(worker_id.clone());
            }
        })
        .await
    }
}

impl<G, A> EntityService<'_, Worker, G, A>
where
    G: RemoteGateway + 'static,
    A: AuditSink + 'static,
{
    /// Replace one timesheet day and stamp it for merging.
    pub async fn record_hours(
        &self,
        id: &EntityId,
        day: &str,
        entry: TimesheetEntry,
    ) -> Result<Entity<Worker>> {
        let day = timesheet_day_key(day);
        require_text("timesheet day", &day)?;
        require_hours(&day, &entry)?;
        self.modify(id, |worker| worker.set_entry(day, entry, unix_millis_now()))
            .await
    }
}

impl<G, A> SyncEngine<G, A>
where
    G: RemoteGateway + 'static,
    A: AuditSink + 'static,
{
    pub const fn customers(&self) -> CustomerService<'_, G, A> {
        EntityService::new(self)
    }

    pub const fn jobs(&self) -> JobService<'_, G, A> {
        EntityService::new(self)
    }

    pub const fn materials(&self) -> MaterialService<'_, G, A> {
        EntityService::new(self)
    }

    pub const fn workers(&self) -> WorkerService<'_, G, A> {
        EntityService::new(self)
    }
}

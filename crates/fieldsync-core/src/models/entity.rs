//! Entity types and the typed record envelope

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Customer, EntityId, Job, Material, Priority, TempId, Worker};

/// Kinds of domain records handled by the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Customer,
    Job,
    Material,
    Worker,
}

/// Sensitivity tag passed to the audit collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Internal,
    Confidential,
}

impl Classification {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Confidential => "confidential",
        }
    }
}

impl EntityType {
    pub const ALL: [Self; 4] = [Self::Customer, Self::Job, Self::Material, Self::Worker];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Job => "job",
            Self::Material => "material",
            Self::Worker => "worker",
        }
    }

    /// REST collection name on the remote service
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Customer => "customers",
            Self::Job => "jobs",
            Self::Material => "materials",
            Self::Worker => "workers",
        }
    }

    /// Cache tier used when a caller does not pick one
    pub const fn default_priority(self) -> Priority {
        match self {
            Self::Job => Priority::Critical,
            Self::Customer | Self::Worker => Priority::Important,
            Self::Material => Priority::Normal,
        }
    }

    /// Whether records of this type are merged unit-by-unit on refresh
    pub const fn has_merge_units(self) -> bool {
        matches!(self, Self::Worker)
    }

    pub const fn classification(self) -> Classification {
        match self {
            Self::Customer | Self::Worker => Classification::Confidential,
            Self::Job | Self::Material => Classification::Internal,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" | "customers" => Ok(Self::Customer),
            "job" | "jobs" => Ok(Self::Job),
            "material" | "materials" => Ok(Self::Material),
            "worker" | "workers" => Ok(Self::Worker),
            other => Err(format!("unknown entity type '{other}'")),
        }
    }
}

/// Entity-specific fields, tagged by entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityData {
    Customer(Customer),
    Job(Job),
    Material(Material),
    Worker(Worker),
}

impl EntityData {
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Customer(_) => EntityType::Customer,
            Self::Job(_) => EntityType::Job,
            Self::Material(_) => EntityType::Material,
            Self::Worker(_) => EntityType::Worker,
        }
    }

    /// Status value indexed by the local store, if the entity has one
    pub const fn status(&self) -> Option<&'static str> {
        match self {
            Self::Customer(customer) => Some(customer.status.as_str()),
            Self::Job(job) => Some(job.status.as_str()),
            Self::Worker(worker) => Some(worker.status.as_str()),
            Self::Material(_) => None,
        }
    }

    /// Owning record (foreign key) indexed by the local store
    pub const fn owner(&self) -> Option<&EntityId> {
        match self {
            Self::Job(job) => Some(&job.customer_id),
            Self::Material(material) => material.job_id.as_ref(),
            Self::Customer(_) | Self::Worker(_) => None,
        }
    }

    /// Every reference to another record held in the fields
    pub fn references(&self) -> Vec<&EntityId> {
        match self {
            Self::Customer(_) => Vec::new(),
            Self::Job(job) => std::iter::once(&job.customer_id)
                .chain(job.assigned_workers.iter())
                .collect(),
            Self::Material(material) => material.job_id.iter().collect(),
            Self::Worker(worker) => worker
                .timesheet
                .values()
                .filter_map(|entry| entry.job_id.as_ref())
                .collect(),
        }
    }

    fn references_mut(&mut self) -> Vec<&mut EntityId> {
        match self {
            Self::Customer(_) => Vec::new(),
            Self::Job(job) => std::iter::once(&mut job.customer_id)
                .chain(job.assigned_workers.iter_mut())
                .collect(),
            Self::Material(material) => material.job_id.iter_mut().collect(),
            Self::Worker(worker) => worker
                .timesheet
                .values_mut()
                .filter_map(|entry| entry.job_id.as_mut())
                .collect(),
        }
    }

    /// Temporary ids referenced by this payload
    pub fn temporary_references(&self) -> Vec<&TempId> {
        self.references()
            .into_iter()
            .filter_map(EntityId::as_temporary)
            .collect()
    }

    /// Point references to `temp` at `permanent`; returns whether anything changed
    pub fn remap_reference(&mut self, temp: &TempId, permanent: &str) -> bool {
        let mut changed = false;
        for reference in self.references_mut() {
            changed |= reference.remap(temp, permanent);
        }
        changed
    }

    /// Untagged field object as sent to the remote service
    pub fn to_fields(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Customer(customer) => serde_json::to_value(customer),
            Self::Job(job) => serde_json::to_value(job),
            Self::Material(material) => serde_json::to_value(material),
            Self::Worker(worker) => serde_json::to_value(worker),
        }
    }

    /// Parse an untagged field object for a known entity type
    pub fn from_fields(
        entity_type: EntityType,
        fields: serde_json::Value,
    ) -> serde_json::Result<Self> {
        Ok(match entity_type {
            EntityType::Customer => Self::Customer(serde_json::from_value(fields)?),
            EntityType::Job => Self::Job(serde_json::from_value(fields)?),
            EntityType::Material => Self::Material(serde_json::from_value(fields)?),
            EntityType::Worker => Self::Worker(serde_json::from_value(fields)?),
        })
    }
}

/// A domain record as held by the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier
    pub id: EntityId,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Entity fields
    pub data: EntityData,
}

impl Record {
    pub const fn new(id: EntityId, updated_at: i64, data: EntityData) -> Self {
        Self {
            id,
            updated_at,
            data,
        }
    }

    pub const fn entity_type(&self) -> EntityType {
        self.data.entity_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, TimesheetEntry};

    fn job_for(customer: EntityId) -> EntityData {
        EntityData::Job(Job::new("Replace boiler", customer))
    }

    #[test]
    fn entity_type_parses_singular_and_plural() {
        assert_eq!("Customers".parse::<EntityType>().unwrap(), EntityType::Customer);
        assert_eq!("worker".parse::<EntityType>().unwrap(), EntityType::Worker);
        assert!("invoice".parse::<EntityType>().is_err());
    }

    #[test]
    fn job_owner_is_customer() {
        let data = job_for(EntityId::permanent("cust_1"));
        assert_eq!(data.owner(), Some(&EntityId::permanent("cust_1")));
        assert_eq!(data.status(), Some(JobStatus::Scheduled.as_str()));
    }

    #[test]
    fn remap_reference_rewrites_nested_worker_entries() {
        let temp = TempId::from_parts(EntityType::Job, 10, "j1");
        let mut worker = Worker::new("Ana");
        worker.timesheet.insert(
            "mon".to_string(),
            TimesheetEntry {
                hours: 8.0,
                job_id: Some(temp.clone().into()),
                note: None,
            },
        );
        let mut data = EntityData::Worker(worker);

        assert_eq!(data.temporary_references(), vec![&temp]);
        assert!(data.remap_reference(&temp, "job_9"));
        assert!(data.temporary_references().is_empty());
        assert!(!data.remap_reference(&temp, "job_9"));
    }

    #[test]
    fn fields_round_trip_without_type_tag() {
        let data = job_for(EntityId::permanent("cust_1"));
        let fields = data.to_fields().unwrap();
        assert!(fields.get("type").is_none());
        assert_eq!(fields["customer_id"], "cust_1");
        let back = EntityData::from_fields(EntityType::Job, fields).unwrap();
        assert_eq!(back, data);
    }
}

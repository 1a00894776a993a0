//! Outbox mutation model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{EntityData, EntityId, EntityType, TempId};

/// Queue-local mutation identifier (insertion order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationId(pub i64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation '{other}'")),
        }
    }
}

/// What a mutation asks the remote service to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum MutationIntent {
    /// Create a record known locally under `temp_id`
    Create { temp_id: TempId, data: EntityData },
    /// Replace the fields of an existing record
    Update { id: EntityId, data: EntityData },
    /// Remove a record
    Delete { id: EntityId, entity_type: EntityType },
}

impl MutationIntent {
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Create { .. } => Operation::Create,
            Self::Update { .. } => Operation::Update,
            Self::Delete { .. } => Operation::Delete,
        }
    }

    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Create { data, .. } | Self::Update { data, .. } => data.entity_type(),
            Self::Delete { entity_type, .. } => *entity_type,
        }
    }

    /// Target record id; for creates this is the temporary id
    pub fn entity_id(&self) -> EntityId {
        match self {
            Self::Create { temp_id, .. } => EntityId::Temporary(temp_id.clone()),
            Self::Update { id, .. } | Self::Delete { id, .. } => id.clone(),
        }
    }

    pub const fn payload(&self) -> Option<&EntityData> {
        match self {
            Self::Create { data, .. } | Self::Update { data, .. } => Some(data),
            Self::Delete { .. } => None,
        }
    }

    /// Rewrite target and payload references from `temp` to `permanent`
    pub fn remap(&mut self, temp: &TempId, permanent: &str) -> bool {
        match self {
            Self::Create { data, .. } => data.remap_reference(temp, permanent),
            Self::Update { id, data } => {
                let target = id.remap(temp, permanent);
                data.remap_reference(temp, permanent) || target
            }
            Self::Delete { id, .. } => id.remap(temp, permanent),
        }
    }
}

/// A queued intent to change remote state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mutation {
    pub id: MutationId,
    pub intent: MutationIntent,
    /// Enqueue time (unix ms)
    pub timestamp: i64,
    pub retry_count: u32,
}

impl Mutation {
    pub const fn operation(&self) -> Operation {
        self.intent.operation()
    }

    pub const fn entity_type(&self) -> EntityType {
        self.intent.entity_type()
    }
}

/// Why a mutation left the outbox without being applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The retry bound was reached
    RetriesExhausted,
    /// The remote service refused the payload
    Rejected,
    /// It targets a temporary id whose create will never reach the server
    Orphaned,
}

impl FailureReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RetriesExhausted => "retries_exhausted",
            Self::Rejected => "rejected",
            Self::Orphaned => "orphaned",
        }
    }
}

impl FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retries_exhausted" => Ok(Self::RetriesExhausted),
            "rejected" => Ok(Self::Rejected),
            "orphaned" => Ok(Self::Orphaned),
            other => Err(format!("unknown failure reason '{other}'")),
        }
    }
}

/// A permanently failed mutation, kept for sync-failed indicators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedMutation {
    pub mutation: Mutation,
    pub reason: FailureReason,
    pub error: String,
    /// Unix ms
    pub failed_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Customer, Job};

    #[test]
    fn update_remap_rewrites_target_and_payload() {
        let customer = TempId::from_parts(EntityType::Customer, 1, "c");
        let job = TempId::from_parts(EntityType::Job, 1, "j");
        let mut intent = MutationIntent::Update {
            id: job.clone().into(),
            data: EntityData::Job(Job::new("Survey", customer.clone().into())),
        };

        assert!(intent.remap(&customer, "cust_1"));
        assert!(intent.entity_id().is_temporary());
        assert!(intent.remap(&job, "job_1"));
        assert_eq!(intent.entity_id(), EntityId::permanent("job_1"));
    }

    #[test]
    fn create_exposes_temp_target() {
        let temp = TempId::from_parts(EntityType::Customer, 1, "c");
        let intent = MutationIntent::Create {
            temp_id: temp.clone(),
            data: EntityData::Customer(Customer::new("J. Smith")),
        };
        assert_eq!(intent.operation(), Operation::Create);
        assert_eq!(intent.entity_type(), EntityType::Customer);
        assert_eq!(intent.entity_id(), EntityId::Temporary(temp));
    }
}

//! Material model

use serde::{Deserialize, Serialize};

use super::EntityId;

/// Stock material, optionally allocated to a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    /// Unit of measure (e.g. "m", "pcs")
    pub unit: String,
    pub quantity: f64,
    #[serde(default)]
    pub unit_cost_cents: i64,
    /// Job the material is allocated to
    #[serde(default)]
    pub job_id: Option<EntityId>,
}

impl Material {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, quantity: f64) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            quantity,
            unit_cost_cents: 0,
            job_id: None,
        }
    }
}

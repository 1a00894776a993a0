//! In-memory remote service for tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use crate::gateway::{ListFilter, RemoteError, RemoteGateway, RemoteResult};
use crate::models::{EntityData, EntityId, EntityType, Record};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(EntityType),
    Update(EntityType, String),
    Delete(EntityType, String),
    List(EntityType),
    Probe,
}

#[derive(Default)]
struct State {
    records: BTreeMap<(EntityType, String), Record>,
    next_id: u64,
    clock: i64,
    calls: Vec<Call>,
    scripted: VecDeque<RemoteError>,
    failing: Option<RemoteError>,
}

/// Server double: issues `{prefix}_{n}` ids and records every call.
pub struct FakeGateway {
    state: Mutex<State>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(next_id: u64) -> Self {
        Self {
            state: Mutex::new(State {
                next_id,
                clock: 1_000,
                ..State::default()
            }),
        }
    }

    fn prefix(entity_type: EntityType) -> &'static str {
        match entity_type {
            EntityType::Customer => "cust",
            EntityType::Job => "job",
            EntityType::Material => "mat",
            EntityType::Worker => "wrk",
        }
    }

    /// Store a record server-side without recording a call.
    pub fn seed(&self, record: Record) {
        let mut state = self.state.lock().unwrap();
        let key = (record.entity_type(), record.id.key());
        state.records.insert(key, record);
    }

    pub fn remove(&self, entity_type: EntityType, id: &str) {
        self.state
            .lock()
            .unwrap()
            .records
            .remove(&(entity_type, id.to_string()));
    }

    pub fn record(&self, entity_type: EntityType, id: &str) -> Option<Record> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&(entity_type, id.to_string()))
            .cloned()
    }

    pub fn records(&self, entity_type: EntityType) -> Vec<Record> {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|((kind, _), _)| *kind == entity_type)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that change server state
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::List(_) | Call::Probe))
            .collect()
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().unwrap().scripted.push_back(error);
    }

    /// Fail every call until reset with `None`.
    pub fn fail_always(&self, error: Option<RemoteError>) {
        self.state.lock().unwrap().failing = error;
    }

    fn begin(&self, call: Call) -> RemoteResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(error) = state.scripted.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.failing.clone() {
            return Err(error);
        }
        state.clock += 1;
        Ok(state)
    }

    fn not_found(entity_type: EntityType, id: &str) -> RemoteError {
        RemoteError::RemoteRejected {
            status: 404,
            message: format!("{entity_type} {id} not found"),
        }
    }

    fn reject_temporary_references(data: &EntityData) -> RemoteResult<()> {
        if data.temporary_references().is_empty() {
            Ok(())
        } else {
            Err(RemoteError::RemoteRejected {
                status: 422,
                message: "payload references an unknown id".to_string(),
            })
        }
    }
}

impl RemoteGateway for FakeGateway {
    async fn create(&self, entity_type: EntityType, data: &EntityData) -> RemoteResult<Record> {
        let mut state = self.begin(Call::Create(entity_type))?;
        Self::reject_temporary_references(data)?;
        let id = format!("{}_{}", Self::prefix(entity_type), state.next_id);
        state.next_id += 1;
        let record = Record::new(EntityId::permanent(id.clone()), state.clock, data.clone());
        state.records.insert((entity_type, id), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        data: &EntityData,
    ) -> RemoteResult<Record> {
        let mut state = self.begin(Call::Update(entity_type, id.to_string()))?;
        Self::reject_temporary_references(data)?;
        let clock = state.clock;
        let Some(record) = state.records.get_mut(&(entity_type, id.to_string())) else {
            return Err(Self::not_found(entity_type, id));
        };
        record.data = data.clone();
        record.updated_at = clock;
        Ok(record.clone())
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> RemoteResult<()> {
        let mut state = self.begin(Call::Delete(entity_type, id.to_string()))?;
        match state.records.remove(&(entity_type, id.to_string())) {
            Some(_) => Ok(()),
            None => Err(Self::not_found(entity_type, id)),
        }
    }

    async fn list(&self, entity_type: EntityType, filter: &ListFilter) -> RemoteResult<Vec<Record>> {
        let state = self.begin(Call::List(entity_type))?;
        Ok(state
            .records
            .iter()
            .filter(|((kind, id), _)| {
                *kind == entity_type && filter.id.as_ref().is_none_or(|wanted| wanted == id)
            })
            .map(|(_, record)| record)
            .filter(|record| {
                filter
                    .status
                    .as_deref()
                    .is_none_or(|status| record.data.status() == Some(status))
            })
            .filter(|record| {
                filter.owner_id.as_deref().is_none_or(|owner| {
                    record.data.owner().and_then(EntityId::as_permanent) == Some(owner)
                })
            })
            .cloned()
            .collect())
    }

    async fn probe(&self) -> RemoteResult<()> {
        drop(self.begin(Call::Probe)?);
        Ok(())
    }
}

pub fn network_down() -> RemoteError {
    RemoteError::NetworkUnavailable("connection refused".to_string())
}

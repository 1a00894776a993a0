//! Engine façade consumed by entity services and clients.

use std::sync::{Arc, Mutex};

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::config::EngineConfig;
use crate::connectivity::Connectivity;
use crate::db::RecordFilter;
use crate::error::{Error, Result};
use crate::gateway::{ListFilter, RemoteGateway};
use crate::models::{
    CachedRecord, EntityData, EntityId, EntityType, FailedMutation, Mutation, MutationIntent,
    Priority, Record, SyncConflict, TempId,
};
use crate::outbox::Outbox;
use crate::reconcile::{
    ReconciliationController, SchedulerHandle, SchedulerOptions, SyncReport, SyncScheduler,
};
use crate::services::LocalStore;
use crate::state::{SyncState, SyncStatus};
use crate::util::unix_millis_now;

/// A local write requested by a client
#[derive(Debug, Clone, PartialEq)]
pub enum WriteIntent {
    Create(EntityData),
    Update { id: EntityId, data: EntityData },
    Delete { entity_type: EntityType, id: EntityId },
}

/// Offline-first sync engine.
///
/// Reads are served from the local store, writes land there first and are
/// queued for the remote. One engine per device and process.
pub struct SyncEngine<G, A> {
    store: LocalStore,
    outbox: Arc<Outbox>,
    controller: Arc<ReconciliationController<G, A>>,
    connectivity: Connectivity,
    options: SchedulerOptions,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl<G, A> SyncEngine<G, A>
where
    G: RemoteGateway + 'static,
    A: AuditSink + 'static,
{
    pub fn new(
        store: LocalStore,
        gateway: G,
        audit: A,
        connectivity: Connectivity,
        config: &EngineConfig,
    ) -> Self {
        let outbox = Arc::new(Outbox::new(
            store.clone(),
            connectivity.clone(),
            config.max_retries,
        ));
        let controller = ReconciliationController::new(
            store.clone(),
            Arc::clone(&outbox),
            gateway,
            audit,
            connectivity.clone(),
        )
        .with_auto_offline(config.probe_when_offline);

        Self {
            store,
            outbox,
            controller: Arc::new(controller),
            connectivity,
            options: SchedulerOptions {
                interval: config.sync_interval(),
                probe_when_offline: config.probe_when_offline,
            },
            scheduler: Mutex::new(None),
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn controller(&self) -> &ReconciliationController<G, A> {
        &self.controller
    }

    fn audit(&self, event: &AuditEvent<'_>) {
        self.controller.audit().record_access(event);
    }

    /// Fetch one record: fresh cache, then the remote, then (optionally) a stale copy.
    pub async fn read_through(
        &self,
        entity_type: EntityType,
        id: &EntityId,
        allow_stale: bool,
    ) -> Result<Option<Record>> {
        let mut found = self.store.get(entity_type, id).await?;

        if found.is_none() {
            if let Some(permanent) = id.as_permanent() {
                let refreshed = self
                    .controller
                    .refresh_collection(entity_type, &ListFilter::by_id(permanent))
                    .await;
                if Self::tolerate_remote(refreshed)?.is_some() {
                    found = self.store.get(entity_type, id).await?;
                }
            }
        }

        if found.is_none() && allow_stale {
            found = self.store.get_including_stale(entity_type, id).await?;
        }

        let detail = id.to_string();
        let event = AuditEvent::new(AuditAction::Read, entity_type, &detail);
        if found.is_some() {
            self.audit(&event);
        } else {
            self.audit(&event.failed());
        }
        Ok(found.map(|cached| cached.record))
    }

    /// List records, refreshing the matching slice from the remote when online.
    pub async fn read_all_through(
        &self,
        entity_type: EntityType,
        filter: &RecordFilter,
    ) -> Result<Vec<Record>> {
        let owner = match &filter.owner {
            Some(EntityId::Permanent(owner)) => Some(Some(owner.clone())),
            // The remote cannot know a temporary owner
            Some(EntityId::Temporary(_)) => None,
            None => Some(None),
        };

        if let Some(owner_id) = owner {
            let remote_filter = ListFilter {
                id: None,
                status: filter.status.clone(),
                owner_id,
            };
            let refreshed = self
                .controller
                .refresh_collection(entity_type, &remote_filter)
                .await;
            Self::tolerate_remote(refreshed)?;
        }

        let records = self.store.query(entity_type, filter).await?;
        self.audit(&AuditEvent::new(AuditAction::Read, entity_type, "list"));
        Ok(records.into_iter().map(|cached| cached.record).collect())
    }

    /// Remote failures degrade to cached data; local failures propagate.
    fn tolerate_remote<T>(result: Result<Option<T>>) -> Result<Option<T>> {
        match result {
            Err(Error::Remote(error)) => {
                tracing::warn!("Serving cached data: {error}");
                Ok(None)
            }
            other => other,
        }
    }

    /// Apply a write locally and queue it for the remote.
    ///
    /// Returns the local record for creates and updates. Local writes are
    /// never rolled back when the remote later refuses them.
    pub async fn write_optimistic(&self, intent: WriteIntent) -> Result<Option<CachedRecord>> {
        match intent {
            WriteIntent::Create(data) => self.create_local(data).await.map(Some),
            WriteIntent::Update { id, data } => self.update_local(id, data).await.map(Some),
            WriteIntent::Delete { entity_type, id } => {
                self.delete_local(entity_type, id).await?;
                Ok(None)
            }
        }
    }

    /// Point references at ids the remote already issued.
    async fn resolve_known_references(&self, mut data: EntityData) -> Result<EntityData> {
        let temps: Vec<TempId> = data.temporary_references().into_iter().cloned().collect();
        for temp in temps {
            if let Some(permanent) = self.store.lookup_mapping(&temp).await? {
                data.remap_reference(&temp, &permanent);
            }
        }
        Ok(data)
    }

    /// Follow a temporary id to its permanent id once one exists.
    async fn current_id(&self, id: EntityId) -> Result<EntityId> {
        if let EntityId::Temporary(temp) = &id {
            if let Some(permanent) = self.store.lookup_mapping(temp).await? {
                return Ok(EntityId::permanent(permanent));
            }
        }
        Ok(id)
    }

    async fn create_local(&self, data: EntityData) -> Result<CachedRecord> {
        let entity_type = data.entity_type();
        let data = self.resolve_known_references(data).await?;
        let temp = TempId::new(entity_type);

        let record = Record::new(temp.clone().into(), unix_millis_now(), data.clone());
        let cached = self
            .outbox
            .put_and_enqueue(
                &record,
                entity_type.default_priority(),
                &MutationIntent::Create {
                    temp_id: temp.clone(),
                    data,
                },
            )
            .await?;

        self.audit(&AuditEvent::new(AuditAction::Write, entity_type, &temp.to_string()));
        Ok(cached)
    }

    async fn update_local(&self, id: EntityId, data: EntityData) -> Result<CachedRecord> {
        let entity_type = data.entity_type();
        let id = self.current_id(id).await?;
        if let EntityId::Temporary(temp) = &id {
            if temp.entity_type != entity_type {
                return Err(Error::InvalidInput(format!(
                    "{temp} is not a {entity_type}"
                )));
            }
            if !self.store.has_pending_create(temp).await? {
                return Err(Error::NotFound(format!("{temp} has no queued create")));
            }
        }
        let data = self.resolve_known_references(data).await?;

        let priority = self
            .store
            .get_including_stale(entity_type, &id)
            .await?
            .map_or_else(|| entity_type.default_priority(), |cached| cached.meta.priority);
        let record = Record::new(id.clone(), unix_millis_now(), data.clone());
        let cached = self
            .outbox
            .put_and_enqueue(
                &record,
                priority,
                &MutationIntent::Update {
                    id: id.clone(),
                    data,
                },
            )
            .await?;

        self.audit(&AuditEvent::new(AuditAction::Write, entity_type, &id.to_string()));
        Ok(cached)
    }

    async fn delete_local(&self, entity_type: EntityType, id: EntityId) -> Result<()> {
        if let EntityId::Temporary(temp) = &id {
            if temp.entity_type != entity_type {
                return Err(Error::InvalidInput(format!(
                    "{temp} is not a {entity_type}"
                )));
            }
            if self.store.lookup_mapping(temp).await?.is_none() {
                let cancelled = self.store.discard_unsynced(temp).await?;
                tracing::debug!("Deleted unsynced {temp}; cancelled {cancelled} queued mutations");
                self.audit(&AuditEvent::new(AuditAction::Delete, entity_type, &temp.to_string()));
                return Ok(());
            }
            // Mapped since; drop any leftover local copy under the old id
            self.store.delete(entity_type, &id).await?;
        }

        let id = self.current_id(id).await?;
        self.outbox
            .delete_and_enqueue(
                entity_type,
                &id,
                &MutationIntent::Delete {
                    id: id.clone(),
                    entity_type,
                },
            )
            .await?;

        self.audit(&AuditEvent::new(AuditAction::Delete, entity_type, &id.to_string()));
        Ok(())
    }

    /// Drain the outbox and refresh collections at or above `priority`.
    ///
    /// A no-op while offline: nothing is attempted and the queue is untouched.
    pub async fn request_sync(&self, priority: Option<Priority>) -> Result<SyncReport> {
        let types: Vec<EntityType> = EntityType::ALL
            .into_iter()
            .filter(|entity_type| {
                priority.is_none_or(|priority| entity_type.default_priority() >= priority)
            })
            .collect();
        self.controller.sync(&types).await
    }

    pub async fn queue_depth(&self) -> Result<usize> {
        self.outbox.depth().await
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        let online = self.connectivity.is_online();
        let draining = self.outbox.is_draining();
        let queue_size = self.outbox.depth().await?;
        let failed_count = self.store.failed_count().await?;

        let state = if !online {
            SyncState::Offline
        } else if draining {
            SyncState::Syncing
        } else if failed_count > 0 || self.controller.last_sync_failed() {
            SyncState::Error
        } else {
            SyncState::Synced
        };

        Ok(SyncStatus {
            queue_size,
            draining,
            online,
            state,
            failed_count,
            last_synced_at: self.controller.last_synced_at(),
            storage_degraded: self.store.is_degraded(),
        })
    }

    pub async fn pending_mutations(&self) -> Result<Vec<Mutation>> {
        self.outbox.peek_all().await
    }

    pub async fn failed_mutations(&self, limit: usize) -> Result<Vec<FailedMutation>> {
        self.store.failed_mutations(limit).await
    }

    pub async fn clear_failed(&self) -> Result<u64> {
        self.store.clear_failed().await
    }

    /// Discard queued mutations without applying them.
    pub async fn clear_queue(&self) -> Result<u64> {
        self.outbox.clear().await
    }

    pub async fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.store.conflicts(limit).await
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        self.store.purge_expired().await
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Returns `true` when the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.connectivity.set_online(online)
    }

    /// Start the background scheduler; a no-op if it is already running.
    pub fn start_background(&self) {
        let Ok(mut scheduler) = self.scheduler.lock() else {
            tracing::error!("Scheduler lock poisoned");
            return;
        };
        if scheduler.as_ref().is_some_and(SchedulerHandle::is_running) {
            return;
        }
        *scheduler = Some(SyncScheduler::spawn(
            Arc::clone(&self.controller),
            Arc::clone(&self.outbox),
            &self.connectivity,
            self.options,
        ));
    }

    /// Ask the background scheduler for a sync; returns `false` if none is running.
    pub fn nudge_background(&self) -> bool {
        self.scheduler
            .lock()
            .ok()
            .and_then(|scheduler| {
                scheduler.as_ref().map(|handle| {
                    handle.request_sync();
                    true
                })
            })
            .unwrap_or(false)
    }

    /// Stop the background scheduler and wait for it.
    pub async fn shutdown(&self) {
        let handle = self
            .scheduler
            .lock()
            .ok()
            .and_then(|mut scheduler| scheduler.take());
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditSink;
    use crate::gateway::RemoteError;
    use crate::models::{Customer, Job, TimesheetEntry, Worker};
    use crate::outbox::SkipReason;
    use crate::testing::{Call, FakeGateway};
    use pretty_assertions::assert_eq;

    type Engine = SyncEngine<FakeGateway, TracingAuditSink>;

    async fn engine(online: bool) -> Engine {
        let store = LocalStore::open_in_memory().await.unwrap();
        SyncEngine::new(
            store,
            FakeGateway::new(),
            TracingAuditSink,
            Connectivity::new(online),
            &EngineConfig::default(),
        )
    }

    fn customer(name: &str) -> EntityData {
        EntityData::Customer(Customer::new(name))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_writes_queue_up_and_sync_later() {
        let engine = engine(false).await;
        let created = engine
            .write_optimistic(WriteIntent::Create(customer("A")))
            .await
            .unwrap()
            .unwrap();
        assert!(created.record.id.is_temporary());

        for _ in 0..3 {
            let report = engine.request_sync(None).await.unwrap();
            assert_eq!(report.drain.skipped, Some(SkipReason::Offline));
        }
        assert_eq!(engine.queue_depth().await.unwrap(), 1);
        assert!(engine.controller().gateway().calls().is_empty());
        assert_eq!(engine.sync_status().await.unwrap().state, SyncState::Offline);

        engine.set_online(true);
        let report = engine.request_sync(None).await.unwrap();
        assert_eq!(report.drain.applied, 1);
        assert_eq!(engine.queue_depth().await.unwrap(), 0);

        let status = engine.sync_status().await.unwrap();
        assert_eq!(status.state, SyncState::Synced);
        assert!(status.last_synced_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleting_an_unsynced_record_cancels_its_create() {
        let engine = engine(false).await;
        let created = engine
            .write_optimistic(WriteIntent::Create(customer("A")))
            .await
            .unwrap()
            .unwrap();

        engine
            .write_optimistic(WriteIntent::Delete {
                entity_type: EntityType::Customer,
                id: created.record.id.clone(),
            })
            .await
            .unwrap();

        assert_eq!(engine.queue_depth().await.unwrap(), 0);
        assert!(engine
            .read_through(EntityType::Customer, &created.record.id, true)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn writes_after_sync_use_the_permanent_id() {
        let engine = engine(true).await;
        let created = engine
            .write_optimistic(WriteIntent::Create(customer("A")))
            .await
            .unwrap()
            .unwrap();
        engine.request_sync(None).await.unwrap();

        let job = engine
            .write_optimistic(WriteIntent::Create(EntityData::Job(Job::new(
                "Install",
                created.record.id.clone(),
            ))))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.record.data.owner(), Some(&EntityId::permanent("cust_1")));

        let updated = engine
            .write_optimistic(WriteIntent::Update {
                id: created.record.id,
                data: customer("B"),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.record.id, EntityId::permanent("cust_1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_through_fetches_missing_records_when_online() {
        let engine = engine(true).await;
        let id = EntityId::permanent("cust_5");
        engine
            .controller()
            .gateway()
            .seed(Record::new(id.clone(), 10, customer("Remote")));

        let record = engine
            .read_through(EntityType::Customer, &id, false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.data, customer("Remote"));
        assert_eq!(
            engine.controller().gateway().calls(),
            vec![Call::List(EntityType::Customer)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_all_through_falls_back_to_cache_when_remote_fails() {
        let engine = engine(true).await;
        engine
            .write_optimistic(WriteIntent::Create(customer("Local")))
            .await
            .unwrap();
        engine
            .controller()
            .gateway()
            .fail_next(crate::gateway::RemoteError::RemoteUnavailable {
                status: 503,
                message: "down".to_string(),
            });

        let records = engine
            .read_all_through(EntityType::Customer, &RecordFilter::default())
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_of_unknown_temp_id_is_rejected() {
        let engine = engine(false).await;
        let error = engine
            .write_optimistic(WriteIntent::Update {
                id: TempId::new(EntityType::Customer).into(),
                data: customer("B"),
            })
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn request_sync_by_priority_limits_refreshed_types() {
        let engine = engine(true).await;

        engine.request_sync(Some(Priority::Critical)).await.unwrap();

        assert_eq!(
            engine.controller().gateway().calls(),
            vec![Call::List(EntityType::Job)]
        );
    }

    fn days(worker: &Worker) -> Vec<&str> {
        worker.timesheet.keys().map(String::as_str).collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_timesheet_day_survives_alongside_server_days() {
        let engine = engine(false).await;
        let id = EntityId::permanent("wrk_1");

        let mut server = Worker::new("W1");
        server.timesheet.insert("mon".to_string(), TimesheetEntry::hours(8.0));
        server.timesheet.insert("wed".to_string(), TimesheetEntry::hours(6.0));
        engine
            .controller()
            .gateway()
            .seed(Record::new(id.clone(), 5, EntityData::Worker(server)));
        let mut cached = Worker::new("W1");
        cached.timesheet.insert("mon".to_string(), TimesheetEntry::hours(8.0));
        engine
            .store()
            .put(
                &Record::new(id.clone(), 1, EntityData::Worker(cached)),
                Priority::Important,
            )
            .await
            .unwrap();

        engine
            .workers()
            .record_hours(&id, "tue", TimesheetEntry::hours(4.0))
            .await
            .unwrap();
        engine.set_online(true);
        let report = engine.request_sync(None).await.unwrap();
        assert_eq!(report.drain.applied, 1);

        let Some(Record {
            data: EntityData::Worker(local),
            ..
        }) = engine
            .read_through(EntityType::Worker, &id, true)
            .await
            .unwrap()
        else {
            panic!("expected cached worker");
        };
        let Some(Record {
            data: EntityData::Worker(remote),
            ..
        }) = engine
            .controller()
            .gateway()
            .record(EntityType::Worker, "wrk_1")
        else {
            panic!("expected server worker");
        };
        assert_eq!(days(&local), vec!["mon", "tue", "wed"]);
        assert_eq!(days(&remote), vec!["mon", "tue", "wed"]);
        assert_eq!(local.timesheet["tue"], TimesheetEntry::hours(4.0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_edit_stays_local_until_failures_are_cleared() {
        let engine = engine(true).await;
        let id = EntityId::permanent("cust_1");
        engine
            .controller()
            .gateway()
            .seed(Record::new(id.clone(), 5, customer("Server")));
        engine
            .store()
            .put(&Record::new(id.clone(), 5, customer("Server")), Priority::Important)
            .await
            .unwrap();

        engine
            .write_optimistic(WriteIntent::Update {
                id: id.clone(),
                data: customer("Field edit"),
            })
            .await
            .unwrap();
        engine
            .controller()
            .gateway()
            .fail_next(RemoteError::RemoteRejected {
                status: 422,
                message: "name is locked".to_string(),
            });
        let report = engine.request_sync(None).await.unwrap();

        assert_eq!(report.drain.failed.len(), 1);
        assert_eq!(report.refresh.map(|refresh| refresh.kept_pending), Some(1));
        let local = engine
            .store()
            .get(EntityType::Customer, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.record.data, customer("Field edit"));
        assert_eq!(engine.sync_status().await.unwrap().state, SyncState::Error);

        engine.clear_failed().await.unwrap();
        engine.request_sync(None).await.unwrap();
        let local = engine
            .store()
            .get(EntityType::Customer, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.record.data, customer("Server"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_queues_exactly_one_mutation() {
        let engine = engine(false).await;
        let id = EntityId::permanent("cust_8");
        engine
            .store()
            .put(&Record::new(id.clone(), 1, customer("Gone")), Priority::Important)
            .await
            .unwrap();

        engine
            .write_optimistic(WriteIntent::Delete {
                entity_type: EntityType::Customer,
                id: id.clone(),
            })
            .await
            .unwrap();

        let pending = engine.pending_mutations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].intent.entity_id(), id.clone());
        assert!(engine
            .store()
            .get_including_stale(EntityType::Customer, &id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn background_scheduler_starts_and_stops() {
        let engine = engine(true).await;
        engine.start_background();
        assert!(engine.nudge_background());
        engine.shutdown().await;
        assert!(!engine.nudge_background());
    }
}

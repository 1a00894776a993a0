//! Reconciliation controller: the only component that talks to the remote.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::connectivity::Connectivity;
use crate::db::{NewConflict, RecordFilter};
use crate::error::Result;
use crate::gateway::{ListFilter, RemoteError, RemoteGateway};
use crate::models::{
    EntityData, EntityId, EntityType, Mutation, MutationIntent, Priority, Record, TempId,
};
use crate::outbox::{ApplyOutcome, DrainReport, MutationSink, Outbox};
use crate::resolver::{merge_worker, merge_worker_for_push, UnitConflict};
use crate::services::LocalStore;
use crate::util::unix_millis_now;

/// Counts from applying one server snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub merged: usize,
    /// Left alone because local mutations are queued or dead-lettered
    pub kept_pending: usize,
    pub pruned: usize,
}

impl RefreshReport {
    fn absorb(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.merged += other.merged;
        self.kept_pending += other.kept_pending;
        self.pruned += other.pruned;
    }
}

/// Result of [`ReconciliationController::sync`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub drain: DrainReport,
    /// `None` when the drain did not run or was interrupted
    pub refresh: Option<RefreshReport>,
}

impl SyncReport {
    fn drain_only(drain: DrainReport) -> Self {
        Self {
            drain,
            refresh: None,
        }
    }
}

/// Where a reference to another record currently points
enum Resolved<T> {
    Ready(T),
    /// The create for this temporary id is still queued
    Waiting(TempId),
    /// Nothing will ever give this temporary id a permanent id
    Orphaned(TempId),
}

pub struct ReconciliationController<G, A> {
    store: LocalStore,
    outbox: Arc<Outbox>,
    gateway: G,
    audit: A,
    connectivity: Connectivity,
    /// Serializes drain passes against refreshes
    lane: Mutex<()>,
    /// Treat `NetworkUnavailable` as a signal to go offline
    auto_offline: bool,
    last_synced_at: AtomicI64,
    last_sync_failed: AtomicBool,
}

impl<G: RemoteGateway, A: AuditSink> ReconciliationController<G, A> {
    pub fn new(
        store: LocalStore,
        outbox: Arc<Outbox>,
        gateway: G,
        audit: A,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            store,
            outbox,
            gateway,
            audit,
            connectivity,
            lane: Mutex::new(()),
            auto_offline: false,
            last_synced_at: AtomicI64::new(0),
            last_sync_failed: AtomicBool::new(false),
        }
    }

    /// Flip connectivity to offline when the network is unreachable.
    #[must_use]
    pub const fn with_auto_offline(mut self, enabled: bool) -> Self {
        self.auto_offline = enabled;
        self
    }

    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    pub const fn audit(&self) -> &A {
        &self.audit
    }

    pub fn last_synced_at(&self) -> Option<i64> {
        match self.last_synced_at.load(Ordering::Acquire) {
            0 => None,
            at => Some(at),
        }
    }

    pub fn last_sync_failed(&self) -> bool {
        self.last_sync_failed.load(Ordering::Acquire)
    }

    /// Ping the remote; on success the device is marked online.
    pub async fn probe(&self) -> bool {
        match self.gateway.probe().await {
            Ok(()) => {
                self.connectivity.set_online(true);
                true
            }
            Err(error) => {
                tracing::debug!("Probe failed: {error}");
                false
            }
        }
    }

    /// Drain the outbox once.
    pub async fn drain(&self) -> Result<DrainReport> {
        let pass = match self.outbox.begin_drain() {
            Ok(pass) => pass,
            Err(reason) => return Ok(DrainReport::skipped(reason)),
        };
        let _lane = self.lane.lock().await;
        let report = pass.run(self).await;
        self.note_outcome(report.as_ref().map(|report| !report.failed.is_empty()));
        report
    }

    /// Drain, then refresh every entity type.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.sync(&EntityType::ALL).await
    }

    /// Drain, then refresh `types` if the drain ran to completion.
    pub async fn sync(&self, types: &[EntityType]) -> Result<SyncReport> {
        let pass = match self.outbox.begin_drain() {
            Ok(pass) => pass,
            Err(reason) => {
                tracing::debug!("Sync skipped: {reason:?}");
                return Ok(SyncReport::drain_only(DrainReport::skipped(reason)));
            }
        };
        let _lane = self.lane.lock().await;

        let drain = match pass.run(self).await {
            Ok(drain) => drain,
            Err(error) => {
                self.note_outcome(Err(&error));
                return Err(error);
            }
        };
        if drain.interrupted || !self.connectivity.is_online() {
            return Ok(SyncReport::drain_only(drain));
        }

        match self.refresh_locked(types).await {
            Ok(refresh) => {
                self.note_outcome(Ok(!drain.failed.is_empty()));
                Ok(SyncReport {
                    drain,
                    refresh: Some(refresh),
                })
            }
            Err(error) => {
                self.note_outcome(Err(&error));
                Err(error)
            }
        }
    }

    fn note_outcome(&self, outcome: std::result::Result<bool, &crate::Error>) {
        match outcome {
            Ok(had_failures) => {
                self.last_synced_at
                    .store(unix_millis_now(), Ordering::Release);
                self.last_sync_failed.store(had_failures, Ordering::Release);
            }
            Err(_) => self.last_sync_failed.store(true, Ordering::Release),
        }
    }

    /// Pull authoritative collections and fold them into the local store.
    ///
    /// Skipped (returns `None`) while offline.
    pub async fn refresh_from_server(&self, types: &[EntityType]) -> Result<Option<RefreshReport>> {
        if !self.connectivity.is_online() {
            return Ok(None);
        }
        let _lane = self.lane.lock().await;
        self.refresh_locked(types).await.map(Some)
    }

    async fn refresh_locked(&self, types: &[EntityType]) -> Result<RefreshReport> {
        let mut report = RefreshReport::default();
        for &entity_type in types {
            let incoming = self
                .remote(self.gateway.list(entity_type, &ListFilter::default()).await)?;
            report.absorb(self.apply_snapshot(entity_type, incoming, true).await?);
            self.audit
                .record_access(&AuditEvent::new(AuditAction::Sync, entity_type, "refresh"));
        }
        tracing::info!(
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            merged = report.merged,
            kept_pending = report.kept_pending,
            pruned = report.pruned,
            "Refresh finished"
        );
        Ok(report)
    }

    /// Fetch a filtered slice of one collection; never prunes.
    pub async fn refresh_collection(
        &self,
        entity_type: EntityType,
        filter: &ListFilter,
    ) -> Result<Option<RefreshReport>> {
        if !self.connectivity.is_online() {
            return Ok(None);
        }
        let _lane = self.lane.lock().await;
        let incoming = self.remote(self.gateway.list(entity_type, filter).await)?;
        let prune = filter.is_unfiltered();
        self.apply_snapshot(entity_type, incoming, prune).await.map(Some)
    }

    fn remote<T>(&self, result: std::result::Result<T, RemoteError>) -> Result<T> {
        if let Err(error) = &result {
            self.note_network(error);
        }
        result.map_err(Into::into)
    }

    fn note_network(&self, error: &RemoteError) {
        if let RemoteError::NetworkUnavailable(message) = error {
            if self.auto_offline && self.connectivity.set_online(false) {
                tracing::info!("Network unavailable ({message}); going offline");
            }
        }
    }

    /// Permanent ids of this type whose local state the server has not accepted.
    ///
    /// Covers queued mutations and dead-lettered ones; the latter stay held
    /// until the user clears them.
    async fn held_targets(&self, entity_type: EntityType) -> Result<HashSet<String>> {
        let queued = self.outbox.peek_all().await?;
        let failed = self.store.failed_mutations_for(entity_type).await?;
        Ok(queued
            .iter()
            .chain(failed.iter().map(|failed| &failed.mutation))
            .filter(|mutation| mutation.entity_type() == entity_type)
            .filter_map(|mutation| mutation.intent.entity_id().as_permanent().map(str::to_string))
            .collect())
    }

    async fn record_unit_conflicts(
        &self,
        entity_type: EntityType,
        id: &str,
        conflicts: &[UnitConflict<String>],
    ) -> Result<()> {
        for conflict in conflicts {
            if conflict.is_ambiguous() {
                tracing::warn!(
                    "Timesheet {} of worker {id} resolved without timestamps",
                    conflict.key
                );
            }
            self.store
                .record_conflict(&NewConflict {
                    entity_type: entity_type.as_str(),
                    entity_id: id,
                    unit_key: &conflict.key,
                    local_modified_at: conflict.local_modified_at,
                    incoming_modified_at: conflict.incoming_modified_at,
                    resolution: conflict.resolution.as_str(),
                })
                .await?;
        }
        Ok(())
    }

    async fn apply_snapshot(
        &self,
        entity_type: EntityType,
        incoming: Vec<Record>,
        prune: bool,
    ) -> Result<RefreshReport> {
        let held = self.held_targets(entity_type).await?;
        let mut report = RefreshReport::default();
        let mut seen = HashSet::new();

        for record in incoming {
            let Some(id) = record.id.as_permanent().map(str::to_string) else {
                continue;
            };
            if record.entity_type() != entity_type {
                tracing::warn!("Ignoring {} record {id} in {entity_type} list", record.entity_type());
                continue;
            }
            seen.insert(id.clone());

            let existing = self
                .store
                .get_including_stale(entity_type, &record.id)
                .await?;
            let queued = held.contains(&id);

            match existing {
                // Deleted locally; the delete has not been accepted yet
                None if queued => {
                    report.kept_pending += 1;
                }
                None => {
                    self.store
                        .put(&record, entity_type.default_priority())
                        .await?;
                    report.inserted += 1;
                }
                Some(cached) if queued => {
                    if let (EntityData::Worker(local), EntityData::Worker(theirs)) =
                        (&cached.record.data, &record.data)
                    {
                        let (worker, conflicts) = merge_worker(local, theirs);
                        self.record_unit_conflicts(entity_type, &id, &conflicts)
                            .await?;
                        let merged = Record::new(
                            record.id.clone(),
                            record.updated_at.max(cached.record.updated_at),
                            EntityData::Worker(worker),
                        );
                        if merged.data == cached.record.data {
                            self.store.touch(entity_type, &record.id).await?;
                        } else {
                            self.store.put(&merged, cached.meta.priority).await?;
                        }
                        report.merged += 1;
                    } else {
                        report.kept_pending += 1;
                    }
                }
                // Servers that omit `updated_at` get a fresh stamp on every list
                Some(cached) if cached.record.data == record.data => {
                    self.store.touch(entity_type, &record.id).await?;
                    report.unchanged += 1;
                }
                Some(cached) => {
                    self.store.put(&record, cached.meta.priority).await?;
                    report.updated += 1;
                }
            }
        }

        if prune {
            let local = self
                .store
                .query(entity_type, &RecordFilter::default().including_expired())
                .await?;
            for cached in local {
                let Some(id) = cached.record.id.as_permanent() else {
                    continue;
                };
                if !seen.contains(id) && !held.contains(id) {
                    self.store.delete(entity_type, &cached.record.id).await?;
                    report.pruned += 1;
                }
            }
        }

        Ok(report)
    }

    async fn resolve_id(&self, id: &EntityId) -> Result<Resolved<String>> {
        match id {
            EntityId::Permanent(id) => Ok(Resolved::Ready(id.clone())),
            EntityId::Temporary(temp) => {
                if let Some(permanent) = self.store.lookup_mapping(temp).await? {
                    Ok(Resolved::Ready(permanent))
                } else if self.store.has_pending_create(temp).await? {
                    Ok(Resolved::Waiting(temp.clone()))
                } else {
                    Ok(Resolved::Orphaned(temp.clone()))
                }
            }
        }
    }

    /// Rewrite temporary references through the id map.
    async fn resolve_payload(&self, data: &EntityData) -> Result<Resolved<EntityData>> {
        let mut resolved = data.clone();
        let temps: Vec<TempId> = data.temporary_references().into_iter().cloned().collect();
        for temp in temps {
            match self.resolve_id(&EntityId::Temporary(temp.clone())).await? {
                Resolved::Ready(permanent) => {
                    resolved.remap_reference(&temp, &permanent);
                }
                Resolved::Waiting(temp) => return Ok(Resolved::Waiting(temp)),
                Resolved::Orphaned(temp) => return Ok(Resolved::Orphaned(temp)),
            }
        }
        Ok(Resolved::Ready(resolved))
    }

    async fn priority_of(&self, entity_type: EntityType, id: &EntityId) -> Result<Priority> {
        Ok(self
            .store
            .get_including_stale(entity_type, id)
            .await?
            .map_or_else(|| entity_type.default_priority(), |cached| cached.meta.priority))
    }

    async fn apply_create(&self, temp: &TempId, data: &EntityData) -> Result<ApplyOutcome> {
        let entity_type = data.entity_type();
        if let Some(permanent) = self.store.lookup_mapping(temp).await? {
            tracing::debug!("{temp} already created as {permanent}");
            return Ok(ApplyOutcome::Applied);
        }
        let data = match self.resolve_payload(data).await? {
            Resolved::Ready(data) => data,
            Resolved::Waiting(_) => return Ok(ApplyOutcome::Deferred),
            Resolved::Orphaned(other) => return Ok(orphaned(&other)),
        };

        let record = match self.gateway.create(entity_type, &data).await {
            Ok(record) => record,
            Err(error) => return Ok(self.failed(error)),
        };
        let priority = self.priority_of(entity_type, &temp.clone().into()).await?;
        let replacement = self.store.replace_temporary(temp, &record, priority).await?;
        tracing::debug!(
            "Created {entity_type} {temp} as {} ({} references, {} queued mutations remapped)",
            record.id,
            replacement.references_updated,
            replacement.mutations_remapped
        );
        Ok(ApplyOutcome::Applied)
    }

    async fn apply_update(&self, id: &EntityId, data: &EntityData) -> Result<ApplyOutcome> {
        let entity_type = data.entity_type();
        let target = match self.resolve_id(id).await? {
            Resolved::Ready(target) => target,
            Resolved::Waiting(_) => return Ok(ApplyOutcome::Deferred),
            Resolved::Orphaned(temp) => return Ok(orphaned(&temp)),
        };
        let data = match self.resolve_payload(data).await? {
            Resolved::Ready(data) => data,
            Resolved::Waiting(_) => return Ok(ApplyOutcome::Deferred),
            Resolved::Orphaned(other) => return Ok(orphaned(&other)),
        };

        let data = match self.merge_with_server(entity_type, &target, data).await? {
            Ok(data) => data,
            Err(error) => return Ok(self.failed(error)),
        };

        let record = match self.gateway.update(entity_type, &target, &data).await {
            Ok(record) => record,
            Err(error) => return Ok(self.failed(error)),
        };
        let priority = self.priority_of(entity_type, &record.id).await?;
        self.store.put(&record, priority).await?;
        Ok(ApplyOutcome::Applied)
    }

    /// Fold units only the server holds into an outgoing merge-unit payload.
    ///
    /// Updates replace the whole server record, so the server copy is read
    /// first and merged unit by unit; otherwise days recorded elsewhere
    /// would be overwritten.
    async fn merge_with_server(
        &self,
        entity_type: EntityType,
        target: &str,
        data: EntityData,
    ) -> Result<std::result::Result<EntityData, RemoteError>> {
        let local = match data {
            EntityData::Worker(local) if entity_type.has_merge_units() => local,
            other => return Ok(Ok(other)),
        };

        let server = match self.gateway.list(entity_type, &ListFilter::by_id(target)).await {
            Ok(records) => records
                .into_iter()
                .find(|record| record.id.as_permanent() == Some(target)),
            Err(error) => return Ok(Err(error)),
        };
        let Some(Record {
            data: EntityData::Worker(server),
            ..
        }) = server
        else {
            return Ok(Ok(EntityData::Worker(local)));
        };

        let (merged, conflicts) = merge_worker_for_push(&local, &server);
        self.record_unit_conflicts(entity_type, target, &conflicts)
            .await?;
        if merged.timesheet.len() > local.timesheet.len() {
            tracing::debug!(
                "Kept {} server-only days of worker {target}",
                merged.timesheet.len() - local.timesheet.len()
            );
        }
        Ok(Ok(EntityData::Worker(merged)))
    }

    async fn apply_delete(&self, entity_type: EntityType, id: &EntityId) -> Result<ApplyOutcome> {
        let target = match self.resolve_id(id).await? {
            Resolved::Ready(target) => target,
            Resolved::Waiting(_) => return Ok(ApplyOutcome::Deferred),
            // The server never saw it; nothing left to delete
            Resolved::Orphaned(_) => return Ok(ApplyOutcome::Applied),
        };

        match self.gateway.delete(entity_type, &target).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {
                tracing::debug!("{entity_type} {target} was already gone");
            }
            Err(error) => return Ok(self.failed(error)),
        }
        self.store
            .delete(entity_type, &EntityId::permanent(target))
            .await?;
        Ok(ApplyOutcome::Applied)
    }

    fn failed(&self, error: RemoteError) -> ApplyOutcome {
        self.note_network(&error);
        ApplyOutcome::Failed(error)
    }
}

fn orphaned(temp: &TempId) -> ApplyOutcome {
    ApplyOutcome::Orphaned(format!("{temp} was never created on the server"))
}

impl<G: RemoteGateway, A: AuditSink> MutationSink for ReconciliationController<G, A> {
    async fn apply(&self, mutation: &Mutation) -> Result<ApplyOutcome> {
        tracing::debug!(
            "Applying {} {} {} ({})",
            mutation.operation().as_str(),
            mutation.entity_type(),
            mutation.intent.entity_id(),
            mutation.id
        );

        let outcome = match &mutation.intent {
            MutationIntent::Create { temp_id, data } => self.apply_create(temp_id, data).await?,
            MutationIntent::Update { id, data } => self.apply_update(id, data).await?,
            MutationIntent::Delete { id, entity_type } => {
                self.apply_delete(*entity_type, id).await?
            }
        };

        let detail = format!("{} {}", mutation.operation().as_str(), mutation.intent.entity_id());
        match &outcome {
            ApplyOutcome::Applied => self.audit.record_access(&AuditEvent::new(
                AuditAction::Sync,
                mutation.entity_type(),
                &detail,
            )),
            ApplyOutcome::Failed(_) | ApplyOutcome::Orphaned(_) => self.audit.record_access(
                &AuditEvent::new(AuditAction::Sync, mutation.entity_type(), &detail).failed(),
            ),
            ApplyOutcome::Deferred => {}
        }
        Ok(outcome)
    }
}

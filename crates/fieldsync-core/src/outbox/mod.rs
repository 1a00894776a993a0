//! Durable mutation outbox.
//!
//! Pending writes are replayed in global FIFO order. A pass works on the
//! snapshot taken when it starts; mutations enqueued meanwhile wait for the
//! next pass. Passes never overlap: a drain requested while one is running
//! is skipped, not queued.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::Notify;

use crate::connectivity::Connectivity;
use crate::error::Result;
use crate::gateway::RemoteError;
use crate::models::{
    CachedRecord, EntityId, EntityType, FailedMutation, FailureReason, Mutation, MutationIntent,
    Priority, Record,
};
use crate::services::LocalStore;
use crate::util::unix_millis_now;

/// Retry bound used when the configuration does not override it
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// What applying one mutation achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The remote accepted it; remove from the queue
    Applied,
    /// Not attempted this round (waits on an unresolved temporary id)
    Deferred,
    /// The remote call failed
    Failed(RemoteError),
    /// Can never be applied (its temporary target was abandoned)
    Orphaned(String),
}

/// Applies queued mutations; implemented by the reconciliation controller.
///
/// An `Err` is a local failure: the pass stops and the mutation stays
/// queued untouched.
pub trait MutationSink: Send + Sync {
    fn apply(&self, mutation: &Mutation) -> impl Future<Output = Result<ApplyOutcome>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    AlreadyDraining,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrainReport {
    pub applied: usize,
    pub deferred: usize,
    pub retried: usize,
    /// Mutations dropped during this pass
    pub failed: Vec<FailedMutation>,
    /// Connectivity dropped mid-pass; the rest of the snapshot was left alone
    pub interrupted: bool,
    pub skipped: Option<SkipReason>,
}

impl DrainReport {
    pub const fn skipped(reason: SkipReason) -> Self {
        Self {
            applied: 0,
            deferred: 0,
            retried: 0,
            failed: Vec::new(),
            interrupted: false,
            skipped: Some(reason),
        }
    }

    pub const fn ran(&self) -> bool {
        self.skipped.is_none()
    }

    pub fn attempted(&self) -> usize {
        self.applied + self.retried + self.failed.len()
    }
}

/// Handle over the queued mutations of one device.
pub struct Outbox {
    store: LocalStore,
    connectivity: Connectivity,
    draining: AtomicBool,
    max_retries: u32,
    enqueued: Notify,
}

impl Outbox {
    pub fn new(store: LocalStore, connectivity: Connectivity, max_retries: u32) -> Self {
        Self {
            store,
            connectivity,
            draining: AtomicBool::new(false),
            max_retries: max_retries.max(1),
            enqueued: Notify::new(),
        }
    }

    /// Append a mutation; durable before this returns.
    pub async fn enqueue(&self, intent: &MutationIntent) -> Result<Mutation> {
        let mutation = self.store.append_mutation(intent).await?;
        self.announce(&mutation);
        Ok(mutation)
    }

    /// Write a local record and queue `intent` atomically.
    pub async fn put_and_enqueue(
        &self,
        record: &Record,
        priority: Priority,
        intent: &MutationIntent,
    ) -> Result<CachedRecord> {
        let (stored, mutation) = self.store.put_and_queue(record, priority, intent).await?;
        self.announce(&mutation);
        Ok(stored)
    }

    /// Delete a local record and queue `intent` atomically.
    pub async fn delete_and_enqueue(
        &self,
        entity_type: EntityType,
        id: &EntityId,
        intent: &MutationIntent,
    ) -> Result<Mutation> {
        let mutation = self.store.delete_and_queue(entity_type, id, intent).await?;
        self.announce(&mutation);
        Ok(mutation)
    }

    fn announce(&self, mutation: &Mutation) {
        tracing::debug!(
            "Queued {} {} {} as {}",
            mutation.operation().as_str(),
            mutation.entity_type(),
            mutation.intent.entity_id(),
            mutation.id
        );
        self.enqueued.notify_one();
    }

    pub async fn peek_all(&self) -> Result<Vec<Mutation>> {
        self.store.pending_mutations().await
    }

    pub async fn depth(&self) -> Result<usize> {
        self.store.outbox_depth().await
    }

    /// Discard every pending mutation without applying it.
    pub async fn clear(&self) -> Result<u64> {
        let cleared = self.store.clear_outbox().await?;
        if cleared > 0 {
            tracing::warn!("Discarded {cleared} pending mutations");
        }
        Ok(cleared)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Signalled whenever a mutation is enqueued
    pub const fn enqueued(&self) -> &Notify {
        &self.enqueued
    }

    /// Claim the drain slot.
    ///
    /// Fails without side effects when offline or when a pass is running.
    pub fn begin_drain(&self) -> std::result::Result<DrainPass<'_>, SkipReason> {
        if !self.connectivity.is_online() {
            return Err(SkipReason::Offline);
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SkipReason::AlreadyDraining);
        }
        Ok(DrainPass { outbox: self })
    }

    /// Claim the slot and run one pass.
    pub async fn drain<S: MutationSink>(&self, sink: &S) -> Result<DrainReport> {
        match self.begin_drain() {
            Ok(pass) => pass.run(sink).await,
            Err(reason) => {
                tracing::debug!("Drain skipped: {reason:?}");
                Ok(DrainReport::skipped(reason))
            }
        }
    }

    async fn fail(
        &self,
        mutation: Mutation,
        reason: FailureReason,
        error: String,
    ) -> Result<FailedMutation> {
        tracing::error!(
            "Dropping {} {} {} ({}): {error}",
            mutation.operation().as_str(),
            mutation.entity_type(),
            mutation.intent.entity_id(),
            reason.as_str()
        );
        let failed = FailedMutation {
            mutation,
            reason,
            error,
            failed_at: unix_millis_now(),
        };
        self.store.dead_letter(&failed).await?;
        Ok(failed)
    }
}

/// An exclusive drain slot; released on drop.
pub struct DrainPass<'a> {
    outbox: &'a Outbox,
}

impl DrainPass<'_> {
    /// Apply the queue snapshot in FIFO order.
    pub async fn run<S: MutationSink>(self, sink: &S) -> Result<DrainReport> {
        let outbox = self.outbox;
        let snapshot = outbox.store.pending_mutations().await?;
        let mut report = DrainReport::default();

        for mutation in snapshot {
            if !outbox.connectivity.is_online() {
                report.interrupted = true;
                tracing::info!("Connectivity lost; stopping drain pass");
                break;
            }

            match sink.apply(&mutation).await? {
                ApplyOutcome::Applied => {
                    outbox.store.remove_mutation(mutation.id).await?;
                    report.applied += 1;
                }
                ApplyOutcome::Deferred => {
                    tracing::debug!("Deferred {}", mutation.id);
                    report.deferred += 1;
                }
                ApplyOutcome::Orphaned(detail) => {
                    report
                        .failed
                        .push(outbox.fail(mutation, FailureReason::Orphaned, detail).await?);
                }
                ApplyOutcome::Failed(error) if !error.is_retryable() => {
                    let detail = error.to_string();
                    report
                        .failed
                        .push(outbox.fail(mutation, FailureReason::Rejected, detail).await?);
                }
                ApplyOutcome::Failed(error) => {
                    let attempts = mutation.retry_count.saturating_add(1);
                    if attempts >= outbox.max_retries {
                        let mut mutation = mutation;
                        mutation.retry_count = attempts;
                        report.failed.push(
                            outbox
                                .fail(mutation, FailureReason::RetriesExhausted, error.to_string())
                                .await?,
                        );
                    } else {
                        tracing::warn!(
                            "Mutation {} failed (attempt {attempts}/{}): {error}",
                            mutation.id,
                            outbox.max_retries
                        );
                        outbox.store.set_retry_count(mutation.id, attempts).await?;
                        report.retried += 1;
                    }
                }
            }
        }

        if report.attempted() > 0 || report.deferred > 0 {
            tracing::info!(
                applied = report.applied,
                deferred = report.deferred,
                retried = report.retried,
                failed = report.failed.len(),
                "Drain pass finished"
            );
        }
        Ok(report)
    }
}

impl Drop for DrainPass<'_> {
    fn drop(&mut self) {
        self.outbox.draining.store(false, Ordering::Release);
    }
}

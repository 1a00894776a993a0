//! Shared local store wrapper used by the outbox, controller and entity services.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use libsql::Connection;
use tokio::sync::Mutex;

use crate::db::{
    Database, LibSqlConflictRepository, LibSqlOutboxRepository, LibSqlRecordRepository,
    NewConflict, OutboxRepository, RecordFilter, RecordRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    CachedRecord, EntityId, EntityType, FailedMutation, Mutation, MutationId, MutationIntent,
    Priority, Record, SyncConflict, TempId,
};
use crate::util::unix_millis_now;

/// Outcome of [`LocalStore::replace_temporary`]
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    pub record: CachedRecord,
    /// Other cached records whose references were rewritten
    pub references_updated: usize,
    /// Queued mutations whose target or payload was rewritten
    pub mutations_remapped: usize,
}

/// Thread-safe handle over the durable local store.
///
/// All mutating calls are committed before they return. Storage-layer
/// failures surface as [`Error::StorageUnavailable`] and flip the
/// `storage_degraded` flag until the next successful write.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    degraded: Arc<AtomicBool>,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&db_path).await?;
        Ok(Self::from_database(db, Some(db_path)))
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::from_database(db, None))
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn classify(error: Error) -> Error {
        if error.is_storage_failure() && !matches!(error, Error::StorageUnavailable(_)) {
            Error::StorageUnavailable(error.to_string())
        } else {
            error
        }
    }

    fn read<T>(result: Result<T>) -> Result<T> {
        result.map_err(Self::classify)
    }

    fn write<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!("Local store recovered");
                }
                Ok(value)
            }
            Err(error) => {
                let error = Self::classify(error);
                if matches!(error, Error::StorageUnavailable(_)) {
                    self.degraded.store(true, Ordering::Relaxed);
                    tracing::warn!("Local store write failed: {error}");
                }
                Err(error)
            }
        }
    }

    async fn begin(&self, conn: &Connection) -> Result<()> {
        match conn.execute("BEGIN TRANSACTION", ()).await {
            Ok(_) => Ok(()),
            Err(error) => self.write(Err(error.into())),
        }
    }

    /// Commit on success, roll back otherwise.
    async fn finish<T>(&self, conn: &Connection, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                if let Err(error) = conn.execute("COMMIT", ()).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return self.write(Err(error.into()));
                }
                self.write(Ok(value))
            }
            Err(error) => {
                conn.execute("ROLLBACK", ()).await.ok();
                self.write(Err(error))
            }
        }
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Fetch a record; expired records read as absent.
    pub async fn get(&self, entity_type: EntityType, id: &EntityId) -> Result<Option<CachedRecord>> {
        let now = unix_millis_now();
        Ok(self
            .get_including_stale(entity_type, id)
            .await?
            .filter(|cached| !cached.meta.is_expired(now)))
    }

    /// Fetch a record even if its TTL has passed.
    pub async fn get_including_stale(
        &self,
        entity_type: EntityType,
        id: &EntityId,
    ) -> Result<Option<CachedRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        Self::read(repo.get(entity_type, id).await)
    }

    /// All records whose printed id is `key`, whatever their id kind.
    pub async fn find_by_key(&self, entity_type: EntityType, key: &str) -> Result<Vec<CachedRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        Self::read(repo.find_by_key(entity_type, key).await)
    }

    /// Upsert a record with an explicit priority.
    pub async fn put(&self, record: &Record, priority: Priority) -> Result<CachedRecord> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        self.write(repo.upsert(record, priority, unix_millis_now()).await)
    }

    /// Refresh cache timestamps of an unchanged record.
    pub async fn touch(&self, entity_type: EntityType, id: &EntityId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        self.write(repo.touch(entity_type, id, unix_millis_now()).await)
    }

    pub async fn delete(&self, entity_type: EntityType, id: &EntityId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        self.write(repo.delete(entity_type, id).await)
    }

    pub async fn query(&self, entity_type: EntityType, filter: &RecordFilter) -> Result<Vec<CachedRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        Self::read(repo.query(entity_type, filter, unix_millis_now()).await)
    }

    /// Remove every record whose TTL has passed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        let purged = self.write(repo.purge_expired(unix_millis_now()).await)?;
        if purged > 0 {
            tracing::info!("Purged {purged} expired records");
        }
        Ok(purged)
    }

    /// Swap a temporary record for its server-confirmed version.
    ///
    /// One transaction: insert the permanent record, delete the temporary
    /// one, rewrite references held by other records and queued mutations,
    /// and remember the id mapping.
    pub async fn replace_temporary(
        &self,
        temp: &TempId,
        record: &Record,
        priority: Priority,
    ) -> Result<Replacement> {
        let Some(permanent) = record.id.as_permanent() else {
            return Err(Error::InvalidInput(format!(
                "cannot replace {temp} with temporary id {}",
                record.id
            )));
        };

        let db = self.db.lock().await;
        let conn = db.connection();
        self.begin(conn).await?;
        let result = Self::replace_in_transaction(conn, temp, permanent, record, priority).await;
        self.finish(conn, result).await
    }

    async fn replace_in_transaction(
        conn: &Connection,
        temp: &TempId,
        permanent: &str,
        record: &Record,
        priority: Priority,
    ) -> Result<Replacement> {
        let now = unix_millis_now();
        let records = LibSqlRecordRepository::new(conn);
        let outbox = LibSqlOutboxRepository::new(conn);

        let stored = records.upsert(record, priority, now).await?;
        records
            .delete(temp.entity_type, &EntityId::Temporary(temp.clone()))
            .await?;

        let dependents = records.referencing(temp).await?;
        let references_updated = dependents.len();
        for mut dependent in dependents {
            dependent.record.data.remap_reference(temp, permanent);
            records
                .upsert(&dependent.record, dependent.meta.priority, now)
                .await?;
        }

        let mutations_remapped = outbox.remap(temp, permanent).await?;
        records.save_mapping(temp, permanent, now).await?;

        Ok(Replacement {
            record: stored,
            references_updated,
            mutations_remapped,
        })
    }

    /// Permanent id a temporary id was resolved to, if any.
    pub async fn lookup_mapping(&self, temp: &TempId) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        Self::read(repo.lookup_mapping(temp).await)
    }

    // ------------------------------------------------------------------
    // Outbox
    // ------------------------------------------------------------------

    /// Upsert a local record and queue its mutation in one transaction.
    pub async fn put_and_queue(
        &self,
        record: &Record,
        priority: Priority,
        intent: &MutationIntent,
    ) -> Result<(CachedRecord, Mutation)> {
        let db = self.db.lock().await;
        let conn = db.connection();
        self.begin(conn).await?;
        let now = unix_millis_now();
        let result = async {
            let stored = LibSqlRecordRepository::new(conn)
                .upsert(record, priority, now)
                .await?;
            let mutation = LibSqlOutboxRepository::new(conn).append(intent, now).await?;
            Ok::<_, Error>((stored, mutation))
        }
        .await;
        self.finish(conn, result).await
    }

    /// Delete a local record and queue its mutation in one transaction.
    pub async fn delete_and_queue(
        &self,
        entity_type: EntityType,
        id: &EntityId,
        intent: &MutationIntent,
    ) -> Result<Mutation> {
        let db = self.db.lock().await;
        let conn = db.connection();
        self.begin(conn).await?;
        let result = async {
            LibSqlRecordRepository::new(conn).delete(entity_type, id).await?;
            LibSqlOutboxRepository::new(conn)
                .append(intent, unix_millis_now())
                .await
        }
        .await;
        self.finish(conn, result).await
    }

    /// Forget a record the server never saw, along with its queued mutations.
    pub async fn discard_unsynced(&self, temp: &TempId) -> Result<u64> {
        let db = self.db.lock().await;
        let conn = db.connection();
        self.begin(conn).await?;
        let result = async {
            LibSqlRecordRepository::new(conn)
                .delete(temp.entity_type, &EntityId::Temporary(temp.clone()))
                .await?;
            LibSqlOutboxRepository::new(conn).cancel_for(temp).await
        }
        .await;
        self.finish(conn, result).await
    }

    pub async fn append_mutation(&self, intent: &MutationIntent) -> Result<Mutation> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        self.write(repo.append(intent, unix_millis_now()).await)
    }

    pub async fn pending_mutations(&self) -> Result<Vec<Mutation>> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        Self::read(repo.pending().await)
    }

    pub async fn outbox_depth(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        Self::read(repo.count().await)
    }

    pub async fn remove_mutation(&self, id: MutationId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        self.write(repo.remove(id).await)
    }

    pub async fn set_retry_count(&self, id: MutationId, retry_count: u32) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        self.write(repo.set_retry_count(id, retry_count).await)
    }

    pub async fn clear_outbox(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        self.write(repo.clear().await)
    }

    pub async fn has_pending_create(&self, temp: &TempId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        Self::read(repo.has_pending_create(temp).await)
    }

    /// Move a mutation from the outbox to the failed list.
    pub async fn dead_letter(&self, failed: &FailedMutation) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let repo = LibSqlOutboxRepository::new(conn);

        self.begin(conn).await?;
        let result = async {
            repo.insert_failed(failed).await?;
            repo.remove(failed.mutation.id).await?;
            Ok::<_, Error>(())
        }
        .await;
        self.finish(conn, result).await
    }

    pub async fn failed_mutations(&self, limit: usize) -> Result<Vec<FailedMutation>> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        Self::read(repo.list_failed(limit).await)
    }

    /// Every dead-lettered mutation of one entity type.
    pub async fn failed_mutations_for(&self, entity_type: EntityType) -> Result<Vec<FailedMutation>> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        Self::read(repo.list_failed_for(entity_type).await)
    }

    pub async fn failed_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        Self::read(repo.count_failed().await)
    }

    pub async fn clear_failed(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        self.write(repo.clear_failed().await)
    }

    // ------------------------------------------------------------------
    // Conflict log
    // ------------------------------------------------------------------

    pub async fn record_conflict(&self, conflict: &NewConflict<'_>) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlConflictRepository::new(db.connection());
        self.write(repo.record(conflict, unix_millis_now()).await)
    }

    /// Most recently resolved merge conflicts first.
    pub async fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        let repo = LibSqlConflictRepository::new(db.connection());
        Self::read(repo.list(limit).await)
    }
}

//! Record cache repository implementation

use libsql::{Connection, Row};

use super::params::{int, nullable_int, opt_int, opt_text, parse_column, text};
use crate::error::{Error, Result};
use crate::models::{
    CacheMetadata, CachedRecord, EntityData, EntityId, EntityType, IdKind, Priority, Record,
    TempId,
};

const RECORD_COLUMNS: &str =
    "entity_type, id_kind, id, data, updated_at, priority, last_updated, expires_at, version";

/// Simple predicates for [`RecordRepository::query`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub status: Option<String>,
    pub priority: Option<Priority>,
    /// Owning record (e.g. a job's customer)
    pub owner: Option<EntityId>,
    /// Return records whose `expires_at` has passed
    pub include_expired: bool,
    pub limit: Option<usize>,
}

impl RecordFilter {
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn owned_by(mut self, owner: EntityId) -> Self {
        self.owner = Some(owner);
        self
    }

    #[must_use]
    pub const fn including_expired(mut self) -> Self {
        self.include_expired = true;
        self
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether the filter narrows the collection at all
    pub const fn is_unfiltered(&self) -> bool {
        self.status.is_none() && self.priority.is_none() && self.owner.is_none()
    }
}

/// Trait for record cache operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Fetch a record regardless of expiry
    async fn get(&self, entity_type: EntityType, id: &EntityId) -> Result<Option<CachedRecord>>;

    /// Fetch records of any id kind whose key matches `key`
    async fn find_by_key(&self, entity_type: EntityType, key: &str) -> Result<Vec<CachedRecord>>;

    /// Insert or overwrite a record, bumping its version
    async fn upsert(&self, record: &Record, priority: Priority, now: i64) -> Result<CachedRecord>;

    /// Refresh `last_updated`/`expires_at` without touching data or version
    async fn touch(&self, entity_type: EntityType, id: &EntityId, now: i64) -> Result<bool>;

    /// Remove a record
    async fn delete(&self, entity_type: EntityType, id: &EntityId) -> Result<bool>;

    /// List records matching the filter, newest first
    async fn query(
        &self,
        entity_type: EntityType,
        filter: &RecordFilter,
        now: i64,
    ) -> Result<Vec<CachedRecord>>;

    /// Delete every record whose expiry has passed
    async fn purge_expired(&self, now: i64) -> Result<u64>;

    /// Records whose fields may reference `temp`
    async fn referencing(&self, temp: &TempId) -> Result<Vec<CachedRecord>>;

    /// Remember which permanent id a temporary id resolved to
    async fn save_mapping(&self, temp: &TempId, permanent: &str, now: i64) -> Result<()>;

    /// Look up the permanent id for a temporary id
    async fn lookup_mapping(&self, temp: &TempId) -> Result<Option<String>>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a cached record from a database row
    fn parse_record(row: &Row) -> Result<CachedRecord> {
        let entity_type: EntityType = parse_column(&row.get::<String>(0)?, "entity_type")?;
        let kind: IdKind = parse_column(&row.get::<String>(1)?, "id_kind")?;
        let key: String = row.get(2)?;
        let id = EntityId::from_storage(kind, &key).map_err(Error::Database)?;
        let data: EntityData = serde_json::from_str(&row.get::<String>(3)?)?;
        if data.entity_type() != entity_type {
            return Err(Error::Database(format!(
                "record {key} stored as {entity_type} holds {} data",
                data.entity_type()
            )));
        }

        Ok(CachedRecord {
            record: Record {
                id,
                updated_at: row.get(4)?,
                data,
            },
            meta: CacheMetadata {
                priority: parse_column(&row.get::<String>(5)?, "priority")?,
                last_updated: row.get(6)?,
                expires_at: nullable_int(row, 7)?,
                version: row.get(8)?,
            },
        })
    }

    async fn collect(&self, sql: &str, params: Vec<libsql::Value>) -> Result<Vec<CachedRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    /// Temporary records stay pinned until reconciled
    fn expiry_for(id: &EntityId, priority: Priority, now: i64) -> Option<i64> {
        if id.is_temporary() {
            None
        } else {
            Some(priority.expires_at(now))
        }
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn get(&self, entity_type: EntityType, id: &EntityId) -> Result<Option<CachedRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE entity_type = ? AND id_kind = ? AND id = ?"
        );
        let mut records = self
            .collect(
                &sql,
                vec![
                    text(entity_type.as_str()),
                    text(id.kind().as_str()),
                    text(id.key()),
                ],
            )
            .await?;
        Ok(records.pop())
    }

    async fn find_by_key(&self, entity_type: EntityType, key: &str) -> Result<Vec<CachedRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE entity_type = ? AND id = ? ORDER BY id_kind ASC"
        );
        self.collect(&sql, vec![text(entity_type.as_str()), text(key.trim())])
            .await
    }

    async fn upsert(&self, record: &Record, priority: Priority, now: i64) -> Result<CachedRecord> {
        let data = serde_json::to_string(&record.data)?;
        let owner = record.data.owner();
        let expires_at = Self::expiry_for(&record.id, priority, now);

        let mut rows = self
            .conn
            .query(
                "INSERT INTO records (
                    entity_type, id_kind, id, data, updated_at, status, owner_kind, owner_id,
                    priority, last_updated, expires_at, version
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
                 ON CONFLICT(entity_type, id_kind, id) DO UPDATE SET
                    data = excluded.data,
                    updated_at = excluded.updated_at,
                    status = excluded.status,
                    owner_kind = excluded.owner_kind,
                    owner_id = excluded.owner_id,
                    priority = excluded.priority,
                    last_updated = excluded.last_updated,
                    expires_at = excluded.expires_at,
                    version = records.version + 1
                 RETURNING version",
                vec![
                    text(record.entity_type().as_str()),
                    text(record.id.kind().as_str()),
                    text(record.id.key()),
                    text(data),
                    int(record.updated_at),
                    opt_text(record.data.status()),
                    opt_text(owner.map(|owner| owner.kind().as_str())),
                    opt_text(owner.map(EntityId::key)),
                    text(priority.as_str()),
                    int(now),
                    opt_int(expires_at),
                ],
            )
            .await?;

        let version: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => return Err(Error::Database("upsert returned no version".to_string())),
        };

        Ok(CachedRecord {
            record: record.clone(),
            meta: CacheMetadata {
                last_updated: now,
                priority,
                expires_at,
                version,
            },
        })
    }

    async fn touch(&self, entity_type: EntityType, id: &EntityId, now: i64) -> Result<bool> {
        let Some(existing) = self.get(entity_type, id).await? else {
            return Ok(false);
        };
        let expires_at = Self::expiry_for(id, existing.meta.priority, now);

        let rows = self
            .conn
            .execute(
                "UPDATE records SET last_updated = ?, expires_at = ?
                 WHERE entity_type = ? AND id_kind = ? AND id = ?",
                vec![
                    int(now),
                    opt_int(expires_at),
                    text(entity_type.as_str()),
                    text(id.kind().as_str()),
                    text(id.key()),
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn delete(&self, entity_type: EntityType, id: &EntityId) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM records WHERE entity_type = ? AND id_kind = ? AND id = ?",
                vec![
                    text(entity_type.as_str()),
                    text(id.kind().as_str()),
                    text(id.key()),
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn query(
        &self,
        entity_type: EntityType,
        filter: &RecordFilter,
        now: i64,
    ) -> Result<Vec<CachedRecord>> {
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE entity_type = ?");
        let mut params = vec![text(entity_type.as_str())];

        if let Some(status) = &filter.status {
            sql.push_str(" AND status = ?");
            params.push(text(status.as_str()));
        }
        if let Some(priority) = filter.priority {
            sql.push_str(" AND priority = ?");
            params.push(text(priority.as_str()));
        }
        if let Some(owner) = &filter.owner {
            sql.push_str(" AND owner_kind = ? AND owner_id = ?");
            params.push(text(owner.kind().as_str()));
            params.push(text(owner.key()));
        }
        if !filter.include_expired {
            sql.push_str(" AND (expires_at IS NULL OR expires_at > ?)");
            params.push(int(now));
        }

        sql.push_str(" ORDER BY updated_at DESC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            params.push(int(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        self.collect(&sql, params).await
    }

    async fn purge_expired(&self, now: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM records WHERE expires_at IS NOT NULL AND expires_at <= ?",
                vec![int(now)],
            )
            .await?;
        Ok(rows)
    }

    async fn referencing(&self, temp: &TempId) -> Result<Vec<CachedRecord>> {
        // Prefilter on the random suffix; callers remap precisely
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE instr(data, ?) > 0");
        let candidates = self.collect(&sql, vec![text(temp.suffix.as_str())]).await?;
        Ok(candidates
            .into_iter()
            .filter(|cached| cached.record.data.temporary_references().contains(&temp))
            .collect())
    }

    async fn save_mapping(&self, temp: &TempId, permanent: &str, now: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO id_mappings (temp_id, entity_type, permanent_id, resolved_at)
                 VALUES (?, ?, ?, ?)",
                vec![
                    text(temp.to_string()),
                    text(temp.entity_type.as_str()),
                    text(permanent),
                    int(now),
                ],
            )
            .await?;
        Ok(())
    }

    async fn lookup_mapping(&self, temp: &TempId) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT permanent_id FROM id_mappings WHERE temp_id = ?",
                vec![text(temp.to_string())],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Customer, CustomerStatus, Job};
    use pretty_assertions::assert_eq;

    const NOW: i64 = 1_700_000_000_000;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn customer(id: EntityId, name: &str) -> Record {
        Record::new(id, NOW, EntityData::Customer(Customer::new(name)))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_and_get() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let record = customer(EntityId::permanent("cust_1"), "Acme");
        let stored = repo.upsert(&record, Priority::Important, NOW).await.unwrap();
        assert_eq!(stored.meta.version, 1);
        assert_eq!(
            stored.meta.expires_at,
            Some(NOW + Priority::Important.ttl().num_milliseconds())
        );

        let fetched = repo
            .get(EntityType::Customer, &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, stored);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_bumps_version() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let record = customer(EntityId::permanent("cust_1"), "Acme");
        repo.upsert(&record, Priority::Normal, NOW).await.unwrap();
        let second = repo.upsert(&record, Priority::Critical, NOW + 1).await.unwrap();

        assert_eq!(second.meta.version, 2);
        assert_eq!(second.meta.priority, Priority::Critical);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_temporary_records_do_not_expire() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let temp = TempId::from_parts(EntityType::Customer, 1, "abc");
        let stored = repo
            .upsert(&customer(temp.into(), "Draft"), Priority::Normal, NOW)
            .await
            .unwrap();
        assert_eq!(stored.meta.expires_at, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_temp_and_permanent_keys_do_not_collide() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let temp = TempId::from_parts(EntityType::Customer, 1, "abc");
        let lookalike = EntityId::permanent(temp.to_string());
        repo.upsert(&customer(temp.clone().into(), "Temp"), Priority::Normal, NOW)
            .await
            .unwrap();
        repo.upsert(&customer(lookalike.clone(), "Server"), Priority::Normal, NOW)
            .await
            .unwrap();

        let by_key = repo
            .find_by_key(EntityType::Customer, &temp.to_string())
            .await
            .unwrap();
        assert_eq!(by_key.len(), 2);

        repo.delete(EntityType::Customer, &lookalike).await.unwrap();
        assert!(repo
            .get(EntityType::Customer, &EntityId::from(temp))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_query_filters_and_expiry() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let mut inactive = Customer::new("Gone Ltd");
        inactive.status = CustomerStatus::Inactive;
        repo.upsert(
            &Record::new(
                EntityId::permanent("cust_2"),
                NOW,
                EntityData::Customer(inactive),
            ),
            Priority::Normal,
            NOW,
        )
        .await
        .unwrap();
        repo.upsert(
            &customer(EntityId::permanent("cust_1"), "Acme"),
            Priority::Critical,
            NOW,
        )
        .await
        .unwrap();

        let active = repo
            .query(
                EntityType::Customer,
                &RecordFilter::default().with_status("active"),
                NOW,
            )
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].record.id, EntityId::permanent("cust_1"));

        // Seven hours later the normal-tier record has expired
        let later = NOW + 7 * 3_600_000;
        let fresh = repo
            .query(EntityType::Customer, &RecordFilter::default(), later)
            .await
            .unwrap();
        assert_eq!(fresh.len(), 1);

        let stale = repo
            .query(
                EntityType::Customer,
                &RecordFilter::default().including_expired(),
                later,
            )
            .await
            .unwrap();
        assert_eq!(stale.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_query_by_owner() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let owner = EntityId::permanent("cust_1");
        for (id, customer_id) in [("job_1", owner.clone()), ("job_2", EntityId::permanent("cust_2"))] {
            repo.upsert(
                &Record::new(
                    EntityId::permanent(id),
                    NOW,
                    EntityData::Job(Job::new("Fix", customer_id)),
                ),
                Priority::Critical,
                NOW,
            )
            .await
            .unwrap();
        }

        let jobs = repo
            .query(EntityType::Job, &RecordFilter::default().owned_by(owner), NOW)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].record.id, EntityId::permanent("job_1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_purge_expired_is_idempotent() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        repo.upsert(
            &customer(EntityId::permanent("cust_1"), "Acme"),
            Priority::Normal,
            NOW,
        )
        .await
        .unwrap();
        let temp = TempId::from_parts(EntityType::Customer, 1, "abc");
        repo.upsert(&customer(temp.into(), "Draft"), Priority::Normal, NOW)
            .await
            .unwrap();

        let later = NOW + Priority::Normal.ttl().num_milliseconds();
        assert_eq!(repo.purge_expired(later).await.unwrap(), 1);
        assert_eq!(repo.purge_expired(later).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_touch_keeps_version() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let record = customer(EntityId::permanent("cust_1"), "Acme");
        repo.upsert(&record, Priority::Normal, NOW).await.unwrap();
        assert!(repo
            .touch(EntityType::Customer, &record.id, NOW + 10)
            .await
            .unwrap());

        let fetched = repo
            .get(EntityType::Customer, &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.meta.version, 1);
        assert_eq!(fetched.meta.last_updated, NOW + 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_referencing_and_mappings() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let temp = TempId::from_parts(EntityType::Customer, 1, "zz9");
        repo.upsert(
            &Record::new(
                EntityId::permanent("job_1"),
                NOW,
                EntityData::Job(Job::new("Fix", temp.clone().into())),
            ),
            Priority::Critical,
            NOW,
        )
        .await
        .unwrap();

        let referencing = repo.referencing(&temp).await.unwrap();
        assert_eq!(referencing.len(), 1);

        assert_eq!(repo.lookup_mapping(&temp).await.unwrap(), None);
        repo.save_mapping(&temp, "cust_42", NOW).await.unwrap();
        assert_eq!(
            repo.lookup_mapping(&temp).await.unwrap().as_deref(),
            Some("cust_42")
        );
    }
}

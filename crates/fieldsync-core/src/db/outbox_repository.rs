//! Outbox persistence

use libsql::{Connection, Row};

use super::params::{int, parse_column, text};
use crate::error::{Error, Result};
use crate::models::{
    EntityType, FailedMutation, Mutation, MutationId, MutationIntent, Operation, TempId,
};

const OUTBOX_COLUMNS: &str = "id, intent, timestamp, retry_count";

/// Trait for outbox storage operations (async)
#[allow(async_fn_in_trait)]
pub trait OutboxRepository {
    /// Append a mutation and return it with its queue id
    async fn append(&self, intent: &MutationIntent, now: i64) -> Result<Mutation>;

    /// All pending mutations in insertion order
    async fn pending(&self) -> Result<Vec<Mutation>>;

    /// Number of pending mutations
    async fn count(&self) -> Result<usize>;

    /// Remove a mutation after it was applied or dropped
    async fn remove(&self, id: MutationId) -> Result<bool>;

    /// Persist a new retry count
    async fn set_retry_count(&self, id: MutationId, retry_count: u32) -> Result<()>;

    /// Discard every pending mutation
    async fn clear(&self) -> Result<u64>;

    /// Rewrite queued mutations that target or reference `temp`
    async fn remap(&self, temp: &TempId, permanent: &str) -> Result<usize>;

    /// Whether a create for `temp` is still queued
    async fn has_pending_create(&self, temp: &TempId) -> Result<bool>;

    /// Remove every queued mutation that targets `temp`
    async fn cancel_for(&self, temp: &TempId) -> Result<u64>;

    /// Keep a permanently failed mutation for inspection
    async fn insert_failed(&self, failed: &FailedMutation) -> Result<()>;

    /// Most recent permanently failed mutations
    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedMutation>>;

    /// Every permanently failed mutation of one entity type
    async fn list_failed_for(&self, entity_type: EntityType) -> Result<Vec<FailedMutation>>;

    /// Number of permanently failed mutations
    async fn count_failed(&self) -> Result<usize>;

    /// Forget permanently failed mutations
    async fn clear_failed(&self) -> Result<u64>;
}

/// libSQL implementation of `OutboxRepository`
pub struct LibSqlOutboxRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_failed(row: &Row) -> Result<FailedMutation> {
        Ok(FailedMutation {
            mutation: Self::parse_mutation(row)?,
            reason: parse_column(&row.get::<String>(4)?, "reason")?,
            error: row.get(5)?,
            failed_at: row.get(6)?,
        })
    }

    fn parse_mutation(row: &Row) -> Result<Mutation> {
        let intent: MutationIntent = serde_json::from_str(&row.get::<String>(1)?)?;
        let retry_count: i64 = row.get(3)?;
        Ok(Mutation {
            id: MutationId(row.get(0)?),
            intent,
            timestamp: row.get(2)?,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
        })
    }

    async fn count_table(&self, table: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(&format!("SELECT COUNT(*) FROM {table}"), ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl OutboxRepository for LibSqlOutboxRepository<'_> {
    async fn append(&self, intent: &MutationIntent, now: i64) -> Result<Mutation> {
        let target = intent.entity_id();
        let mut rows = self
            .conn
            .query(
                "INSERT INTO outbox (operation, entity_type, entity_kind, entity_id, intent, timestamp, retry_count)
                 VALUES (?, ?, ?, ?, ?, ?, 0)
                 RETURNING id",
                vec![
                    text(intent.operation().as_str()),
                    text(intent.entity_type().as_str()),
                    text(target.kind().as_str()),
                    text(target.key()),
                    text(serde_json::to_string(intent)?),
                    int(now),
                ],
            )
            .await?;

        let id: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => return Err(Error::Database("outbox insert returned no id".to_string())),
        };

        Ok(Mutation {
            id: MutationId(id),
            intent: intent.clone(),
            timestamp: now,
            retry_count: 0,
        })
    }

    async fn pending(&self) -> Result<Vec<Mutation>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {OUTBOX_COLUMNS} FROM outbox ORDER BY id ASC"),
                (),
            )
            .await?;

        let mut mutations = Vec::new();
        while let Some(row) = rows.next().await? {
            mutations.push(Self::parse_mutation(&row)?);
        }
        Ok(mutations)
    }

    async fn count(&self) -> Result<usize> {
        self.count_table("outbox").await
    }

    async fn remove(&self, id: MutationId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM outbox WHERE id = ?", vec![int(id.0)])
            .await?;
        Ok(rows > 0)
    }

    async fn set_retry_count(&self, id: MutationId, retry_count: u32) -> Result<()> {
        self.conn
            .execute(
                "UPDATE outbox SET retry_count = ? WHERE id = ?",
                vec![int(i64::from(retry_count)), int(id.0)],
            )
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<u64> {
        Ok(self.conn.execute("DELETE FROM outbox", ()).await?)
    }

    async fn remap(&self, temp: &TempId, permanent: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {OUTBOX_COLUMNS} FROM outbox WHERE instr(intent, ?) > 0 ORDER BY id ASC"
                ),
                vec![text(temp.suffix.as_str())],
            )
            .await?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await? {
            candidates.push(Self::parse_mutation(&row)?);
        }
        drop(rows);

        let mut remapped = 0;
        for mut mutation in candidates {
            if !mutation.intent.remap(temp, permanent) {
                continue;
            }
            let target = mutation.intent.entity_id();
            self.conn
                .execute(
                    "UPDATE outbox SET entity_kind = ?, entity_id = ?, intent = ? WHERE id = ?",
                    vec![
                        text(target.kind().as_str()),
                        text(target.key()),
                        text(serde_json::to_string(&mutation.intent)?),
                        int(mutation.id.0),
                    ],
                )
                .await?;
            remapped += 1;
        }
        Ok(remapped)
    }

    async fn has_pending_create(&self, temp: &TempId) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM outbox
                    WHERE operation = ? AND entity_kind = 'temp' AND entity_id = ?
                 )",
                vec![text(Operation::Create.as_str()), text(temp.to_string())],
            )
            .await?;
        Ok(match rows.next().await? {
            Some(row) => row.get::<i32>(0)? != 0,
            None => false,
        })
    }

    async fn cancel_for(&self, temp: &TempId) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "DELETE FROM outbox WHERE entity_kind = 'temp' AND entity_id = ?",
                vec![text(temp.to_string())],
            )
            .await?)
    }

    async fn insert_failed(&self, failed: &FailedMutation) -> Result<()> {
        let mutation = &failed.mutation;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO failed_mutations (
                    id, operation, entity_type, entity_id, intent, timestamp, retry_count,
                    reason, error, failed_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    int(mutation.id.0),
                    text(mutation.operation().as_str()),
                    text(mutation.entity_type().as_str()),
                    text(mutation.intent.entity_id().key()),
                    text(serde_json::to_string(&mutation.intent)?),
                    int(mutation.timestamp),
                    int(i64::from(mutation.retry_count)),
                    text(failed.reason.as_str()),
                    text(failed.error.as_str()),
                    int(failed.failed_at),
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<FailedMutation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, intent, timestamp, retry_count, reason, error, failed_at
                 FROM failed_mutations
                 ORDER BY failed_at DESC, id DESC
                 LIMIT ?",
                vec![int(i64::try_from(limit).unwrap_or(i64::MAX))],
            )
            .await?;

        let mut failed = Vec::new();
        while let Some(row) = rows.next().await? {
            failed.push(Self::parse_failed(&row)?);
        }
        Ok(failed)
    }

    async fn list_failed_for(&self, entity_type: EntityType) -> Result<Vec<FailedMutation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, intent, timestamp, retry_count, reason, error, failed_at
                 FROM failed_mutations
                 WHERE entity_type = ?
                 ORDER BY id",
                vec![text(entity_type.as_str())],
            )
            .await?;

        let mut failed = Vec::new();
        while let Some(row) = rows.next().await? {
            failed.push(Self::parse_failed(&row)?);
        }
        Ok(failed)
    }

    async fn count_failed(&self) -> Result<usize> {
        self.count_table("failed_mutations").await
    }

    async fn clear_failed(&self) -> Result<u64> {
        Ok(self.conn.execute("DELETE FROM failed_mutations", ()).await?)
    }
}

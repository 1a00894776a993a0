//! Merge conflict log

use libsql::Connection;

use super::params::{int, nullable_int, opt_int, text};
use crate::error::Result;
use crate::models::SyncConflict;

/// A conflict about to be logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflict<'a> {
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub unit_key: &'a str,
    pub local_modified_at: Option<i64>,
    pub incoming_modified_at: Option<i64>,
    pub resolution: &'a str,
}

/// libSQL access to the `sync_conflicts` table
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn record(&self, conflict: &NewConflict<'_>, resolved_at: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts (
                    entity_type, entity_id, unit_key, local_modified_at, incoming_modified_at,
                    resolution, resolved_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?)",
                vec![
                    text(conflict.entity_type),
                    text(conflict.entity_id),
                    text(conflict.unit_key),
                    opt_int(conflict.local_modified_at),
                    opt_int(conflict.incoming_modified_at),
                    text(conflict.resolution),
                    int(resolved_at),
                ],
            )
            .await?;
        Ok(())
    }

    /// Most recently resolved conflicts first
    pub async fn list(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity_type, entity_id, unit_key, local_modified_at,
                        incoming_modified_at, resolution, resolved_at
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?",
                vec![int(i64::try_from(limit).unwrap_or(i64::MAX))],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(SyncConflict {
                id: row.get(0)?,
                entity_type: row.get(1)?,
                entity_id: row.get(2)?,
                unit_key: row.get(3)?,
                local_modified_at: nullable_int(&row, 4)?,
                incoming_modified_at: nullable_int(&row, 5)?,
                resolution: row.get(6)?,
                resolved_at: row.get(7)?,
            });
        }
        Ok(conflicts)
    }
}

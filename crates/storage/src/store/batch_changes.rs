#![forbid(unsafe_code)]

use super::support::text_col;
use super::{NewBatchChange, StoreError};
use bc_core::{BatchChange, NamespaceKind};
use rusqlite::{Connection, OptionalExtension, params};

pub(super) fn insert(
    conn: &Connection,
    batch_change: &NewBatchChange,
) -> Result<BatchChange, StoreError> {
    if batch_change.name.trim().is_empty() || batch_change.namespace_name.trim().is_empty() {
        return Err(StoreError::InvalidInput(
            "batch change name and namespace must not be empty",
        ));
    }
    conn.execute(
        "INSERT INTO batch_changes(name, namespace_name, namespace_kind, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            batch_change.name,
            batch_change.namespace_name,
            batch_change.namespace_kind.as_str(),
            batch_change.created_at_ms
        ],
    )?;
    Ok(BatchChange {
        id: conn.last_insert_rowid(),
        name: batch_change.name.clone(),
        namespace_name: batch_change.namespace_name.clone(),
        namespace_kind: batch_change.namespace_kind,
        closed_at_ms: None,
        created_at_ms: batch_change.created_at_ms,
    })
}

pub(super) fn get(conn: &Connection, id: i64) -> Result<Option<BatchChange>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, name, namespace_name, namespace_kind, closed_at_ms, created_at_ms \
             FROM batch_changes WHERE id=?1",
            params![id],
            |row| {
                Ok(BatchChange {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    namespace_name: row.get(2)?,
                    namespace_kind: text_col(row, 3, NamespaceKind::parse)?,
                    closed_at_ms: row.get(4)?,
                    created_at_ms: row.get(5)?,
                })
            },
        )
        .optional()?)
}

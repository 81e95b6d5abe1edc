#![forbid(unsafe_code)]

use super::StoreError;
use super::support::json_col;
use bc_core::ChangesetEvent;
use rusqlite::{Connection, params};

/// Inserts new events and refreshes the payload of known ones. Events are
/// identified by `(changeset_id, kind, key)`.
pub(super) fn upsert(
    conn: &Connection,
    events: &[ChangesetEvent],
    now_ms: i64,
) -> Result<(), StoreError> {
    if events.is_empty() {
        return Ok(());
    }
    let mut stmt = conn.prepare_cached(
        "INSERT INTO changeset_events(changeset_id, kind, key, item_json, created_at_ms, updated_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(changeset_id, kind, key) DO UPDATE SET \
           item_json=excluded.item_json, updated_at_ms=excluded.updated_at_ms",
    )?;
    for event in events {
        let item_json = serde_json::to_string(&event.item)?;
        stmt.execute(params![
            event.changeset_id,
            event.kind,
            event.key,
            item_json,
            event.created_at_ms,
            now_ms
        ])?;
    }
    Ok(())
}

pub(super) fn list(
    conn: &Connection,
    changeset_id: i64,
) -> Result<Vec<ChangesetEvent>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT changeset_id, kind, key, created_at_ms, item_json \
         FROM changeset_events WHERE changeset_id=?1 \
         ORDER BY created_at_ms ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![changeset_id], |row| {
        Ok(ChangesetEvent {
            changeset_id: row.get(0)?,
            kind: row.get(1)?,
            key: row.get(2)?,
            created_at_ms: row.get(3)?,
            item: json_col(row, 4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#![forbid(unsafe_code)]

use super::{NewWebhookJob, StoreError, WebhookJobRow};
use rusqlite::{Connection, params};

pub(super) fn enqueue(conn: &Connection, job: &NewWebhookJob) -> Result<i64, StoreError> {
    if job.event_type.trim().is_empty() {
        return Err(StoreError::InvalidInput("webhook event_type must not be empty"));
    }
    conn.execute(
        "INSERT INTO webhook_jobs(event_type, changeset_id, payload_json, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            job.event_type,
            job.changeset_id,
            job.payload_json,
            job.created_at_ms
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(super) fn list(conn: &Connection, changeset_id: i64) -> Result<Vec<WebhookJobRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, event_type, changeset_id, payload_json, created_at_ms \
         FROM webhook_jobs WHERE changeset_id=?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![changeset_id], |row| {
        Ok(WebhookJobRow {
            id: row.get(0)?,
            event_type: row.get(1)?,
            changeset_id: row.get(2)?,
            payload_json: row.get(3)?,
            created_at_ms: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

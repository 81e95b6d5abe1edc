#![forbid(unsafe_code)]

use super::support::text_col;
use super::{NewRepo, StoreError};
use bc_core::{ExternalServiceType, Repo};
use rusqlite::{Connection, OptionalExtension, params};

pub(super) fn insert(conn: &Connection, repo: &NewRepo) -> Result<Repo, StoreError> {
    if repo.name.trim().is_empty() {
        return Err(StoreError::InvalidInput("repo name must not be empty"));
    }
    conn.execute(
        "INSERT INTO repos(name, external_service_type, clone_url, archived, created_at_ms, updated_at_ms) \
         VALUES (?1, ?2, ?3, 0, ?4, ?4)",
        params![
            repo.name,
            repo.external_service_type.as_str(),
            repo.clone_url,
            repo.created_at_ms
        ],
    )?;
    Ok(Repo {
        id: conn.last_insert_rowid(),
        name: repo.name.clone(),
        external_service_type: repo.external_service_type,
        clone_url: repo.clone_url.clone(),
        archived: false,
        created_at_ms: repo.created_at_ms,
        updated_at_ms: repo.created_at_ms,
    })
}

pub(super) fn get(conn: &Connection, id: i64) -> Result<Option<Repo>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, name, external_service_type, clone_url, archived, created_at_ms, updated_at_ms \
             FROM repos WHERE id=?1",
            params![id],
            |row| {
                Ok(Repo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    external_service_type: text_col(row, 2, ExternalServiceType::parse)?,
                    clone_url: row.get(3)?,
                    archived: row.get(4)?,
                    created_at_ms: row.get(5)?,
                    updated_at_ms: row.get(6)?,
                })
            },
        )
        .optional()?)
}

pub(super) fn update_archived(
    conn: &Connection,
    id: i64,
    archived: bool,
    now_ms: i64,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE repos SET archived=?2, updated_at_ms=?3 WHERE id=?1",
        params![id, archived, now_ms],
    )?;
    if changed != 1 {
        return Err(StoreError::UnknownId);
    }
    Ok(())
}

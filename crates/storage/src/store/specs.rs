#![forbid(unsafe_code)]

use super::StoreError;
use super::support::text_col;
use bc_core::{ChangesetSpec, CommitAuthor, PublishedValue};
use rusqlite::{Connection, OptionalExtension, params};

pub(super) fn insert(conn: &Connection, spec: &ChangesetSpec) -> Result<ChangesetSpec, StoreError> {
    if spec.head_ref.trim().is_empty() {
        return Err(StoreError::InvalidInput("spec head_ref must not be empty"));
    }
    conn.execute(
        "INSERT INTO changeset_specs(repo_id, title, body, base_ref, base_rev, head_ref, diff, \
         commit_message, commit_author_name, commit_author_email, published, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            spec.repo_id,
            spec.title,
            spec.body,
            spec.base_ref,
            spec.base_rev,
            spec.head_ref,
            spec.diff,
            spec.commit_message,
            spec.commit_author.name,
            spec.commit_author.email,
            spec.published.as_str(),
            spec.created_at_ms
        ],
    )?;
    Ok(ChangesetSpec {
        id: conn.last_insert_rowid(),
        ..spec.clone()
    })
}

pub(super) fn get(conn: &Connection, id: i64) -> Result<Option<ChangesetSpec>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, repo_id, title, body, base_ref, base_rev, head_ref, diff, commit_message, \
             commit_author_name, commit_author_email, published, created_at_ms \
             FROM changeset_specs WHERE id=?1",
            params![id],
            |row| {
                Ok(ChangesetSpec {
                    id: row.get(0)?,
                    repo_id: row.get(1)?,
                    title: row.get(2)?,
                    body: row.get(3)?,
                    base_ref: row.get(4)?,
                    base_rev: row.get(5)?,
                    head_ref: row.get(6)?,
                    diff: row.get(7)?,
                    commit_message: row.get(8)?,
                    commit_author: CommitAuthor {
                        name: row.get(9)?,
                        email: row.get(10)?,
                    },
                    published: text_col(row, 11, |raw| PublishedValue::parse(Some(raw)))?,
                    created_at_ms: row.get(12)?,
                })
            },
        )
        .optional()?)
}

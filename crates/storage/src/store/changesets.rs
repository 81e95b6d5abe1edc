#![forbid(unsafe_code)]

use super::support::{json_col, opt_json_col, opt_text_col, text_col};
use super::{GetChangesetOpts, StoreError};
use bc_core::{
    Changeset, CheckState, ExternalServiceType, ExternalState, PublicationState, ReconcilerState,
    ReviewState, UiPublicationState,
};
use rusqlite::{Connection, OptionalExtension, params};

pub(super) const CHANGESET_COLUMNS: &str = "id, repo_id, created_at_ms, updated_at_ms, metadata_json, \
     batch_changes_json, external_id, external_service_type, external_branch, external_fork_namespace, \
     external_deleted_at_ms, external_updated_at_ms, external_state, external_review_state, \
     external_check_state, commit_verified_sha, owned_by_batch_change_id, current_spec_id, \
     previous_spec_id, publication_state, ui_publication_state, closing, detached_at_ms, \
     failure_message, previous_failure_message, sync_error_message, reconciler_state, num_failures, \
     num_resets";

pub(super) fn changeset_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Changeset> {
    Ok(Changeset {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        created_at_ms: row.get(2)?,
        updated_at_ms: row.get(3)?,
        metadata: opt_json_col(row, 4)?,
        batch_changes: json_col(row, 5)?,
        external_id: row.get(6)?,
        external_service_type: text_col(row, 7, ExternalServiceType::parse)?,
        external_branch: row.get(8)?,
        external_fork_namespace: row.get(9)?,
        external_deleted_at_ms: row.get(10)?,
        external_updated_at_ms: row.get(11)?,
        external_state: opt_text_col(row, 12, ExternalState::parse)?,
        external_review_state: opt_text_col(row, 13, ReviewState::parse)?,
        external_check_state: opt_text_col(row, 14, CheckState::parse)?,
        commit_verified_sha: row.get(15)?,
        owned_by_batch_change_id: row.get(16)?,
        current_spec_id: row.get(17)?,
        previous_spec_id: row.get(18)?,
        publication_state: text_col(row, 19, PublicationState::parse)?,
        ui_publication_state: opt_text_col(row, 20, UiPublicationState::parse)?,
        closing: row.get(21)?,
        detached_at_ms: row.get(22)?,
        failure_message: row.get(23)?,
        previous_failure_message: row.get(24)?,
        sync_error_message: row.get(25)?,
        reconciler_state: text_col(row, 26, ReconcilerState::parse)?,
        num_failures: row.get(27)?,
        num_resets: row.get(28)?,
    })
}

fn metadata_json(changeset: &Changeset) -> Result<Option<String>, StoreError> {
    Ok(changeset
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?)
}

pub(super) fn insert(
    conn: &Connection,
    changeset: &Changeset,
    now_ms: i64,
) -> Result<Changeset, StoreError> {
    let metadata = metadata_json(changeset)?;
    let batch_changes = serde_json::to_string(&changeset.batch_changes)?;
    conn.execute(
        "INSERT INTO changesets(repo_id, created_at_ms, updated_at_ms, metadata_json, batch_changes_json, \
         external_id, external_service_type, external_branch, external_fork_namespace, \
         external_deleted_at_ms, external_updated_at_ms, external_state, external_review_state, \
         external_check_state, commit_verified_sha, owned_by_batch_change_id, current_spec_id, \
         previous_spec_id, publication_state, ui_publication_state, closing, detached_at_ms, \
         failure_message, previous_failure_message, sync_error_message, reconciler_state, \
         num_failures, num_resets) \
         VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
         ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
        params![
            changeset.repo_id,
            now_ms,
            metadata,
            batch_changes,
            changeset.external_id,
            changeset.external_service_type.as_str(),
            changeset.external_branch,
            changeset.external_fork_namespace,
            changeset.external_deleted_at_ms,
            changeset.external_updated_at_ms,
            changeset.external_state.map(ExternalState::as_str),
            changeset.external_review_state.map(ReviewState::as_str),
            changeset.external_check_state.map(CheckState::as_str),
            changeset.commit_verified_sha,
            changeset.owned_by_batch_change_id,
            changeset.current_spec_id,
            changeset.previous_spec_id,
            changeset.publication_state.as_str(),
            changeset.ui_publication_state.map(UiPublicationState::as_str),
            changeset.closing,
            changeset.detached_at_ms,
            changeset.failure_message,
            changeset.previous_failure_message,
            changeset.sync_error_message,
            changeset.reconciler_state.as_str(),
            changeset.num_failures,
            changeset.num_resets,
        ],
    )?;
    Ok(Changeset {
        id: conn.last_insert_rowid(),
        created_at_ms: now_ms,
        updated_at_ms: now_ms,
        ..changeset.clone()
    })
}

pub(super) fn get(conn: &Connection, id: i64) -> Result<Option<Changeset>, StoreError> {
    let sql = format!("SELECT {CHANGESET_COLUMNS} FROM changesets WHERE id=?1");
    Ok(conn
        .query_row(&sql, params![id], changeset_from_row)
        .optional()?)
}

pub(super) fn get_by_branch(
    conn: &Connection,
    opts: &GetChangesetOpts,
) -> Result<Option<Changeset>, StoreError> {
    let sql = format!(
        "SELECT {CHANGESET_COLUMNS} FROM changesets \
         WHERE external_service_type=?1 AND repo_id=?2 AND external_branch=?3 \
         ORDER BY id ASC LIMIT 1"
    );
    Ok(conn
        .query_row(
            &sql,
            params![
                opts.external_service_type.as_str(),
                opts.repo_id,
                opts.external_branch
            ],
            changeset_from_row,
        )
        .optional()?)
}

pub(super) fn update(
    conn: &Connection,
    changeset: &Changeset,
    now_ms: i64,
) -> Result<(), StoreError> {
    let metadata = metadata_json(changeset)?;
    let batch_changes = serde_json::to_string(&changeset.batch_changes)?;
    let changed = conn.execute(
        "UPDATE changesets SET updated_at_ms=?2, metadata_json=?3, batch_changes_json=?4, \
         external_id=?5, external_service_type=?6, external_branch=?7, external_fork_namespace=?8, \
         external_deleted_at_ms=?9, external_updated_at_ms=?10, external_state=?11, \
         external_review_state=?12, external_check_state=?13, commit_verified_sha=?14, \
         owned_by_batch_change_id=?15, current_spec_id=?16, previous_spec_id=?17, \
         publication_state=?18, ui_publication_state=?19, closing=?20, detached_at_ms=?21, \
         failure_message=?22, previous_failure_message=?23, sync_error_message=?24 \
         WHERE id=?1",
        params![
            changeset.id,
            now_ms,
            metadata,
            batch_changes,
            changeset.external_id,
            changeset.external_service_type.as_str(),
            changeset.external_branch,
            changeset.external_fork_namespace,
            changeset.external_deleted_at_ms,
            changeset.external_updated_at_ms,
            changeset.external_state.map(ExternalState::as_str),
            changeset.external_review_state.map(ReviewState::as_str),
            changeset.external_check_state.map(CheckState::as_str),
            changeset.commit_verified_sha,
            changeset.owned_by_batch_change_id,
            changeset.current_spec_id,
            changeset.previous_spec_id,
            changeset.publication_state.as_str(),
            changeset.ui_publication_state.map(UiPublicationState::as_str),
            changeset.closing,
            changeset.detached_at_ms,
            changeset.failure_message,
            changeset.previous_failure_message,
            changeset.sync_error_message,
        ],
    )?;
    if changed != 1 {
        return Err(StoreError::UnknownId);
    }
    Ok(())
}

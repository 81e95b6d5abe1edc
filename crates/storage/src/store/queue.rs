#![forbid(unsafe_code)]

//! Lease-based work queue over the `changesets` table.
//!
//! A changeset is handed to at most one worker at a time: dequeuing moves it
//! to `PROCESSING` with a lease (`claim_expires_at_ms`) that the worker keeps
//! alive through heartbeats. Only the lease holder can complete or fail it;
//! the resetter requeues rows whose lease expired.

use super::changesets::{CHANGESET_COLUMNS, changeset_from_row};
use super::support::text_col;
use super::{
    DequeueRequest, MarkErroredRequest, QueueCounts, ResetStalledResult, SqliteStore, StoreError,
};
use bc_core::{Changeset, ReconcilerState};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

const STALLED_FAILURE_MESSAGE: &str = "failed to process: lease expired too many times";

fn lease_expiry(now_ms: i64, ttl_ms: u64) -> i64 {
    now_ms.saturating_add(ttl_ms.min(i64::MAX as u64) as i64)
}

fn not_claimable(conn: &Connection, changeset_id: i64) -> StoreError {
    let state = conn
        .query_row(
            "SELECT reconciler_state FROM changesets WHERE id=?1",
            params![changeset_id],
            |row| row.get::<_, String>(0),
        )
        .optional();
    match state {
        Ok(Some(state)) => StoreError::NotClaimable {
            changeset_id,
            state,
        },
        Ok(None) => StoreError::UnknownId,
        Err(err) => StoreError::Sql(err),
    }
}

impl SqliteStore {
    /// Puts a changeset back into the queue, rotating its failure message
    /// and resetting the retry counters. A changeset that is currently being
    /// processed cannot be re-enqueued.
    pub fn enqueue_changeset(&mut self, changeset_id: i64, now_ms: i64) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE changesets SET reconciler_state='QUEUED', num_failures=0, num_resets=0, \
             non_retryable=0, previous_failure_message=failure_message, failure_message=NULL, \
             sync_error_message=NULL, worker_id=NULL, claim_expires_at_ms=NULL, process_after_ms=NULL, updated_at_ms=?2 \
             WHERE id=?1 AND reconciler_state != 'PROCESSING'",
            params![changeset_id, now_ms],
        )?;
        if changed != 1 {
            return Err(not_claimable(&self.conn, changeset_id));
        }
        Ok(())
    }

    /// Claims the oldest ready changeset. Errored changesets are ready once
    /// their backoff has elapsed.
    pub fn dequeue_changeset(
        &mut self,
        request: &DequeueRequest,
    ) -> Result<Option<Changeset>, StoreError> {
        if request.worker_id.trim().is_empty() {
            return Err(StoreError::InvalidInput("worker_id must not be empty"));
        }
        let claim_expires_at_ms = lease_expiry(request.now_ms, request.lease_ttl_ms);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<i64> = tx
            .query_row(
                "SELECT id FROM changesets \
                 WHERE reconciler_state='QUEUED' \
                    OR (reconciler_state='ERRORED' AND COALESCE(process_after_ms, 0) <= ?1) \
                 ORDER BY updated_at_ms ASC, id ASC LIMIT 1",
                params![request.now_ms],
                |row| row.get(0),
            )
            .optional()?;
        let Some(changeset_id) = candidate else {
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE changesets SET reconciler_state='PROCESSING', worker_id=?2, \
             claim_expires_at_ms=?3, started_at_ms=?4, finished_at_ms=NULL \
             WHERE id=?1 AND reconciler_state IN ('QUEUED', 'ERRORED')",
            params![
                changeset_id,
                request.worker_id,
                claim_expires_at_ms,
                request.now_ms
            ],
        )?;
        if changed != 1 {
            return Err(not_claimable(&tx, changeset_id));
        }

        let sql = format!("SELECT {CHANGESET_COLUMNS} FROM changesets WHERE id=?1");
        let changeset = tx.query_row(&sql, params![changeset_id], changeset_from_row)?;
        tx.commit()?;
        Ok(Some(changeset))
    }

    /// Extends the lease of a changeset held by `worker_id`.
    pub fn heartbeat_changeset(
        &mut self,
        changeset_id: i64,
        worker_id: &str,
        now_ms: i64,
        lease_ttl_ms: u64,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE changesets SET claim_expires_at_ms=?3 \
             WHERE id=?1 AND worker_id=?2 AND reconciler_state='PROCESSING'",
            params![changeset_id, worker_id, lease_expiry(now_ms, lease_ttl_ms)],
        )?;
        if changed != 1 {
            return Err(not_claimable(&self.conn, changeset_id));
        }
        Ok(())
    }

    pub fn mark_changeset_complete(
        &mut self,
        changeset_id: i64,
        worker_id: &str,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE changesets SET reconciler_state='COMPLETED', worker_id=NULL, non_retryable=0, \
             claim_expires_at_ms=NULL, process_after_ms=NULL, finished_at_ms=?3 \
             WHERE id=?1 AND worker_id=?2 AND reconciler_state='PROCESSING'",
            params![changeset_id, worker_id, now_ms],
        )?;
        if changed != 1 {
            return Err(not_claimable(&self.conn, changeset_id));
        }
        Ok(())
    }

    /// Records a failed attempt. Returns `Failed` once the retry budget is
    /// spent, `Errored` otherwise.
    pub fn mark_changeset_errored(
        &mut self,
        request: &MarkErroredRequest,
    ) -> Result<ReconcilerState, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(i64, Option<String>, String)> = tx
            .query_row(
                "SELECT num_failures, worker_id, reconciler_state FROM changesets WHERE id=?1",
                params![request.changeset_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((num_failures, holder, state)) = current else {
            return Err(StoreError::UnknownId);
        };
        if state != ReconcilerState::Processing.as_str()
            || holder.as_deref() != Some(request.worker_id.as_str())
        {
            return Err(StoreError::NotClaimable {
                changeset_id: request.changeset_id,
                state,
            });
        }

        let num_failures = num_failures + 1;
        let next_state = if num_failures >= request.max_num_retries {
            ReconcilerState::Failed
        } else {
            ReconcilerState::Errored
        };
        let process_after_ms = match next_state {
            ReconcilerState::Errored => Some(lease_expiry(request.now_ms, request.retry_after_ms)),
            _ => None,
        };

        tx.execute(
            "UPDATE changesets SET reconciler_state=?2, num_failures=?3, failure_message=?4, \
             worker_id=NULL, claim_expires_at_ms=NULL, process_after_ms=?5, finished_at_ms=?6, \
             non_retryable=?7 WHERE id=?1",
            params![
                request.changeset_id,
                next_state.as_str(),
                num_failures,
                request.failure_message,
                process_after_ms,
                request.now_ms,
                request.non_retryable
            ],
        )?;
        tx.commit()?;
        Ok(next_state)
    }

    /// Requeues processing changesets whose lease expired. A changeset that
    /// stalls `max_num_resets` times is marked failed.
    pub fn reset_stalled_changesets(
        &mut self,
        now_ms: i64,
        max_num_resets: i64,
    ) -> Result<ResetStalledResult, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stalled = {
            let mut stmt = tx.prepare(
                "SELECT id, num_resets FROM changesets \
                 WHERE reconciler_state='PROCESSING' \
                   AND (claim_expires_at_ms IS NULL OR claim_expires_at_ms <= ?1) \
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![now_ms], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut result = ResetStalledResult::default();
        for (changeset_id, num_resets) in stalled {
            let num_resets = num_resets + 1;
            if num_resets >= max_num_resets {
                tx.execute(
                    "UPDATE changesets SET reconciler_state='FAILED', num_resets=?2, failure_message=?3, \
                     worker_id=NULL, claim_expires_at_ms=NULL, finished_at_ms=?4 WHERE id=?1",
                    params![changeset_id, num_resets, STALLED_FAILURE_MESSAGE, now_ms],
                )?;
                result.failed.push(changeset_id);
            } else {
                tx.execute(
                    "UPDATE changesets SET reconciler_state='QUEUED', num_resets=?2, \
                     worker_id=NULL, claim_expires_at_ms=NULL WHERE id=?1",
                    params![changeset_id, num_resets],
                )?;
                result.requeued.push(changeset_id);
            }
        }

        tx.commit()?;
        Ok(result)
    }

    /// Whether the last recorded failure of the changeset was one that
    /// retrying cannot fix.
    pub fn last_failure_non_retryable(&self, changeset_id: i64) -> Result<bool, StoreError> {
        self.conn
            .query_row(
                "SELECT non_retryable FROM changesets WHERE id=?1",
                params![changeset_id],
                |row| row.get::<_, bool>(0),
            )
            .optional()?
            .ok_or(StoreError::UnknownId)
    }

    pub fn queue_counts(&self) -> Result<QueueCounts, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT reconciler_state, COUNT(*) FROM changesets GROUP BY reconciler_state",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                text_col(row, 0, ReconcilerState::parse)?,
                row.get::<_, i64>(1)?,
            ))
        })?;
        let mut counts = QueueCounts::default();
        for row in rows {
            let (state, count) = row?;
            counts.add(state, count);
        }
        Ok(counts)
    }
}

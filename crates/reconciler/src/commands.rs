#![forbid(unsafe_code)]

use bc_core::{ChangesetSpec, Delta, Operation, determine_plan};
use bc_reconciler::{Clock, SystemClock};
use bc_storage::{SqliteStore, Store, StoreError};
use serde::Serialize;
use serde_json::json;
use tracing::info;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Debug, Serialize)]
struct PlanReport {
    changeset_id: i64,
    ops: Vec<Operation>,
    delta: Delta,
}

fn load_spec(store: &dyn Store, id: Option<i64>) -> Result<Option<ChangesetSpec>, StoreError> {
    id.map(|id| store.get_changeset_spec(id))
        .transpose()
        .map(Option::flatten)
}

pub(crate) fn plan(store: &SqliteStore, changeset_id: i64) -> CommandResult {
    let changeset = store
        .get_changeset(changeset_id)?
        .ok_or(StoreError::UnknownId)?;
    let previous = load_spec(store, changeset.previous_spec_id)?;
    let current = load_spec(store, changeset.current_spec_id)?;
    let plan = determine_plan(previous.as_ref(), current.as_ref(), None, &changeset)?;

    let report = PlanReport {
        changeset_id,
        ops: plan.ops.execution_order(),
        delta: plan.delta,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub(crate) fn stats(store: &SqliteStore) -> CommandResult {
    let counts = store.queue_counts()?;
    let out = json!({
        "scheduled": counts.scheduled,
        "queued": counts.queued,
        "processing": counts.processing,
        "errored": counts.errored,
        "failed": counts.failed,
        "completed": counts.completed,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

pub(crate) fn enqueue(store: &mut SqliteStore, changeset_id: i64, force: bool) -> CommandResult {
    if !force && store.last_failure_non_retryable(changeset_id)? {
        return Err(format!(
            "changeset {changeset_id} failed with an error retrying cannot fix; \
             pass --force to enqueue it anyway"
        )
        .into());
    }
    store.enqueue_changeset(changeset_id, SystemClock.now_ms())?;
    info!(changeset_id, "enqueued changeset");
    Ok(())
}

pub(crate) fn reset_stalled(store: &mut SqliteStore, max_num_resets: i64) -> CommandResult {
    let result = store.reset_stalled_changesets(SystemClock.now_ms(), max_num_resets)?;
    let out = json!({
        "requeued": result.requeued,
        "failed": result.failed,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

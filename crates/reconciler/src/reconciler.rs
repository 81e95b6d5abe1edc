#![forbid(unsafe_code)]

use crate::clock::{Clock, SystemClock};
use crate::errors::ReconcileError;
use crate::executor::{Execution, execute_plan};
use crate::sources::{CommitCreator, Sourcer};
use bc_core::{Changeset, ChangesetSpec, determine_plan};
use bc_storage::{SqliteStore, Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

pub const DEFAULT_SLEEP_BEFORE_SYNC: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct ReconcilerOptions {
    pub clock: Arc<dyn Clock>,
    /// Skips the pause of `SLEEP` operations. Tests set this.
    pub skip_delays: bool,
    /// How long `SLEEP` waits so the code host settles before a sync.
    pub sleep_before_sync: Duration,
    /// Fail pushes whose commit could not be re-created as a signed commit.
    pub reject_unverified_commit: bool,
    /// Base URL used for batch change backlinks.
    pub external_url: String,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            skip_delays: false,
            sleep_before_sync: DEFAULT_SLEEP_BEFORE_SYNC,
            reject_unverified_commit: false,
            external_url: String::new(),
        }
    }
}

/// Brings one changeset on the code host in line with its spec.
pub struct Reconciler {
    sourcer: Arc<dyn Sourcer>,
    commits: Arc<dyn CommitCreator>,
    options: ReconcilerOptions,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        sourcer: Arc<dyn Sourcer>,
        commits: Arc<dyn CommitCreator>,
        options: ReconcilerOptions,
    ) -> Self {
        Self {
            sourcer,
            commits,
            options,
        }
    }

    pub fn options(&self) -> &ReconcilerOptions {
        &self.options
    }

    /// Plans and executes one reconciliation of `changeset`.
    ///
    /// The code host is talked to without holding a transaction; the outcome
    /// is written afterwards in one short immediate transaction, so other
    /// workers and lease heartbeats are never blocked on host I/O. The
    /// changeset is persisted even when execution fails, so partial progress
    /// (a pushed branch, a created changeset) is not lost. The webhook for
    /// the outcome is enqueued after that transaction resolved. An execution
    /// error takes precedence over a persistence error.
    #[instrument(skip_all, fields(changeset_id = changeset.id))]
    pub fn handle(
        &self,
        store: &mut SqliteStore,
        mut changeset: Changeset,
    ) -> Result<(), ReconcileError> {
        let now_ms = self.options.clock.now_ms();
        changeset.previous_failure_message = changeset.failure_message.take();

        let previous = load_spec(&*store, changeset.previous_spec_id)?;
        let current = load_spec(&*store, changeset.current_spec_id)?;

        let plan = determine_plan(previous.as_ref(), current.as_ref(), None, &changeset)?;
        info!(ops = ?plan.ops.execution_order(), "planned operations");

        let execution = execute_plan(
            &*store,
            self.sourcer.as_ref(),
            self.commits.as_ref(),
            &self.options,
            plan,
        );

        let persisted = persist(store, &execution, now_ms);
        if let Err(err) = &persisted {
            error!(error = %err, "persisting reconciliation");
        }

        if let Some(webhook) = execution.webhook {
            webhook.fire(&*store, now_ms);
        }

        execution.result?;
        persisted?;
        Ok(())
    }
}

fn persist(store: &mut SqliteStore, execution: &Execution, now_ms: i64) -> Result<(), StoreError> {
    let tx = store.transaction()?;
    execution.persist(&tx, now_ms)?;
    tx.commit()
}

fn load_spec(store: &dyn Store, id: Option<i64>) -> Result<Option<ChangesetSpec>, StoreError> {
    match id {
        Some(id) => store.get_changeset_spec(id),
        None => Ok(None),
    }
}

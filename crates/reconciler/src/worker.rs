#![forbid(unsafe_code)]

//! Worker pool draining the changeset queue.
//!
//! Every worker thread owns its own sqlite connection. While a changeset is
//! being reconciled a scoped heartbeat thread keeps its lease alive; a
//! separate resetter requeues changesets whose lease ran out because their
//! worker died.

use crate::reconciler::Reconciler;
use bc_storage::{DequeueRequest, MarkErroredRequest, SqliteStore, StoreError};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    pub num_workers: usize,
    /// Pause after finding the queue empty.
    pub poll_interval: Duration,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub reset_interval: Duration,
    /// Failed attempts before a changeset is given up on.
    pub max_num_retries: i64,
    /// Expired leases before a changeset is given up on.
    pub max_num_resets: i64,
    /// Grows linearly with the number of failed attempts.
    pub retry_backoff: Duration,
    pub worker_id_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 5,
            poll_interval: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
            reset_interval: Duration::from_secs(60),
            max_num_retries: 60,
            max_num_resets: 60,
            retry_backoff: Duration::from_secs(5),
            worker_id_prefix: "reconciler".to_string(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[derive(Debug)]
pub struct WorkerPool {
    storage_dir: PathBuf,
    reconciler: Reconciler,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        storage_dir: impl Into<PathBuf>,
        reconciler: Reconciler,
        config: WorkerConfig,
    ) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            reconciler,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the flag makes every thread of [`WorkerPool::run`] stop after
    /// its current changeset.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn now_ms(&self) -> i64 {
        self.reconciler.options().clock.now_ms()
    }

    /// Runs the workers and the resetter until shutdown is requested.
    pub fn run(&self) -> Result<(), StoreError> {
        // Fail fast on an unusable store before spawning anything.
        drop(SqliteStore::open(&self.storage_dir)?);
        info!(
            workers = self.config.num_workers,
            storage_dir = %self.storage_dir.display(),
            "starting reconciler workers"
        );

        thread::scope(|scope| {
            for n in 0..self.config.num_workers {
                let worker_id = format!("{}-{n}", self.config.worker_id_prefix);
                scope.spawn(move || self.run_worker(&worker_id));
            }
            scope.spawn(|| self.run_resetter());
        });

        info!("reconciler workers stopped");
        Ok(())
    }

    fn run_worker(&self, worker_id: &str) {
        let mut store = match SqliteStore::open(&self.storage_dir) {
            Ok(store) => store,
            Err(err) => {
                error!(worker_id, error = %err, "opening store");
                return;
            }
        };
        while !self.shutting_down() {
            match self.process_next(&mut store, worker_id) {
                Ok(true) => {}
                Ok(false) => self.pause(self.config.poll_interval),
                Err(err) => {
                    error!(worker_id, error = %err, "processing queue");
                    self.pause(self.config.poll_interval);
                }
            }
        }
    }

    fn run_resetter(&self) {
        let mut store = match SqliteStore::open(&self.storage_dir) {
            Ok(store) => store,
            Err(err) => {
                error!(error = %err, "opening store for resetter");
                return;
            }
        };
        while !self.shutting_down() {
            match store.reset_stalled_changesets(self.now_ms(), self.config.max_num_resets) {
                Ok(result) if !result.requeued.is_empty() || !result.failed.is_empty() => {
                    info!(
                        requeued = ?result.requeued,
                        failed = ?result.failed,
                        "reset stalled changesets"
                    );
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "resetting stalled changesets"),
            }
            self.pause(self.config.reset_interval);
        }
    }

    /// Sleeps up to `duration`, returning early on shutdown.
    fn pause(&self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() && !self.shutting_down() {
            let step = remaining.min(SHUTDOWN_CHECK_INTERVAL);
            thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }

    /// Claims and reconciles one changeset. Returns `false` when nothing was
    /// ready to be claimed.
    ///
    /// Every failure goes through the queue's retry accounting. Whether it
    /// is worth retrying at all is recorded alongside for callers deciding
    /// on a re-enqueue.
    pub fn process_next(
        &self,
        store: &mut SqliteStore,
        worker_id: &str,
    ) -> Result<bool, StoreError> {
        let request = DequeueRequest {
            worker_id: worker_id.to_string(),
            now_ms: self.now_ms(),
            lease_ttl_ms: duration_ms(self.config.lease_ttl),
        };
        let Some(changeset) = store.dequeue_changeset(&request)? else {
            return Ok(false);
        };
        let changeset_id = changeset.id;
        let num_failures = changeset.num_failures;
        debug!(worker_id, changeset_id, "claimed changeset");

        let lease_store = SqliteStore::open(&self.storage_dir)?;
        let result = thread::scope(|scope| {
            let (stop_tx, stop_rx) = mpsc::channel::<()>();
            scope.spawn(move || self.keep_lease(lease_store, changeset_id, worker_id, stop_rx));
            let result = self.reconciler.handle(store, changeset);
            drop(stop_tx);
            result
        });

        let now_ms = self.now_ms();
        match result {
            Ok(()) => {
                store.mark_changeset_complete(changeset_id, worker_id, now_ms)?;
                debug!(worker_id, changeset_id, "reconciled changeset");
            }
            Err(err) => {
                let non_retryable = err.is_non_retryable();
                let attempts = u32::try_from(num_failures.saturating_add(1)).unwrap_or(u32::MAX);
                let state = store.mark_changeset_errored(&MarkErroredRequest {
                    changeset_id,
                    worker_id: worker_id.to_string(),
                    failure_message: err.to_string(),
                    now_ms,
                    max_num_retries: self.config.max_num_retries,
                    retry_after_ms: duration_ms(self.config.retry_backoff.saturating_mul(attempts)),
                    non_retryable,
                })?;
                warn!(
                    worker_id,
                    changeset_id,
                    code = err.code(),
                    non_retryable,
                    state = state.as_str(),
                    error = %err,
                    "reconciling changeset failed"
                );
            }
        }
        Ok(true)
    }

    /// Renews the lease every heartbeat interval until `stop` disconnects.
    /// A busy database only skips one renewal; a lease taken over by the
    /// resetter ends the loop.
    fn keep_lease(
        &self,
        mut store: SqliteStore,
        changeset_id: i64,
        worker_id: &str,
        stop: Receiver<()>,
    ) {
        let lease_ttl_ms = duration_ms(self.config.lease_ttl);
        loop {
            match stop.recv_timeout(self.config.heartbeat_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }
            match store.heartbeat_changeset(changeset_id, worker_id, self.now_ms(), lease_ttl_ms) {
                Ok(()) => {}
                Err(err @ (StoreError::NotClaimable { .. } | StoreError::UnknownId)) => {
                    warn!(worker_id, changeset_id, error = %err, "lost changeset lease");
                    return;
                }
                Err(err) => {
                    warn!(worker_id, changeset_id, error = %err, "renewing changeset lease");
                }
            }
        }
    }
}

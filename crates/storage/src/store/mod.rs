#![forbid(unsafe_code)]

mod batch_changes;
mod changesets;
mod error;
mod events;
mod queue;
mod repos;
mod requests;
mod specs;
mod support;
mod webhooks;

pub use error::StoreError;
pub use requests::*;

use bc_core::{BatchChange, Changeset, ChangesetEvent, ChangesetSpec, Repo};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE_NAME: &str = "batches.db";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join(DB_FILE_NAME);
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        support::migrate_sqlite_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Starts an immediate transaction, taking the write lock up front so a
    /// commit by another connection cannot invalidate its snapshot. Dropping
    /// the handle without calling [`StoreTx::commit`] rolls it back.
    ///
    /// Keep these short: other connections wait on the lock.
    pub fn transaction(&mut self) -> Result<StoreTx<'_>, StoreError> {
        Ok(StoreTx {
            tx: self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)?,
        })
    }
}

/// A store handle scoped to one sqlite transaction.
#[derive(Debug)]
pub struct StoreTx<'a> {
    tx: Transaction<'a>,
}

impl StoreTx<'_> {
    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback()?;
        Ok(())
    }
}

mod sealed {
    pub trait Sealed {
        fn conn(&self) -> &rusqlite::Connection;
    }
}

impl sealed::Sealed for SqliteStore {
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl sealed::Sealed for StoreTx<'_> {
    fn conn(&self) -> &Connection {
        &self.tx
    }
}

/// Row access shared by [`SqliteStore`] and [`StoreTx`].
pub trait Store: sealed::Sealed {
    fn insert_repo(&self, repo: &NewRepo) -> Result<Repo, StoreError> {
        repos::insert(self.conn(), repo)
    }

    fn get_repo(&self, id: i64) -> Result<Option<Repo>, StoreError> {
        repos::get(self.conn(), id)
    }

    fn update_repo_archived(&self, id: i64, archived: bool, now_ms: i64) -> Result<(), StoreError> {
        repos::update_archived(self.conn(), id, archived, now_ms)
    }

    fn insert_batch_change(
        &self,
        batch_change: &NewBatchChange,
    ) -> Result<BatchChange, StoreError> {
        batch_changes::insert(self.conn(), batch_change)
    }

    fn get_batch_change(&self, id: i64) -> Result<Option<BatchChange>, StoreError> {
        batch_changes::get(self.conn(), id)
    }

    /// Inserts a new spec version; `spec.id` is ignored and assigned.
    fn insert_changeset_spec(&self, spec: &ChangesetSpec) -> Result<ChangesetSpec, StoreError> {
        specs::insert(self.conn(), spec)
    }

    fn get_changeset_spec(&self, id: i64) -> Result<Option<ChangesetSpec>, StoreError> {
        specs::get(self.conn(), id)
    }

    /// Inserts a changeset; `changeset.id` is ignored and assigned.
    fn insert_changeset(
        &self,
        changeset: &Changeset,
        now_ms: i64,
    ) -> Result<Changeset, StoreError> {
        changesets::insert(self.conn(), changeset, now_ms)
    }

    fn get_changeset(&self, id: i64) -> Result<Option<Changeset>, StoreError> {
        changesets::get(self.conn(), id)
    }

    fn get_changeset_by_branch(
        &self,
        opts: &GetChangesetOpts,
    ) -> Result<Option<Changeset>, StoreError> {
        changesets::get_by_branch(self.conn(), opts)
    }

    /// Persists everything except the work-queue columns.
    fn update_changeset(&self, changeset: &Changeset, now_ms: i64) -> Result<(), StoreError> {
        changesets::update(self.conn(), changeset, now_ms)
    }

    fn upsert_changeset_events(
        &self,
        events: &[ChangesetEvent],
        now_ms: i64,
    ) -> Result<(), StoreError> {
        events::upsert(self.conn(), events, now_ms)
    }

    fn list_changeset_events(&self, changeset_id: i64) -> Result<Vec<ChangesetEvent>, StoreError> {
        events::list(self.conn(), changeset_id)
    }

    fn enqueue_webhook(&self, job: &NewWebhookJob) -> Result<i64, StoreError> {
        webhooks::enqueue(self.conn(), job)
    }

    fn list_webhook_jobs(&self, changeset_id: i64) -> Result<Vec<WebhookJobRow>, StoreError> {
        webhooks::list(self.conn(), changeset_id)
    }
}

impl Store for SqliteStore {}
impl Store for StoreTx<'_> {}

#![forbid(unsafe_code)]

//! Runs a [`Plan`] against the code host.
//!
//! Operations run strictly in execution order and stop at the first error.
//! Each operation that talks to the host leaves behind the webhook that
//! describes its outcome; the last one assigned is returned to the caller
//! even when a later step fails, so failures are still announced.
//!
//! The executor only reads from the store. Everything it decided is carried
//! out in [`Execution`] and written by [`Execution::persist`], so no database
//! lock is held while the code host is being talked to.

use crate::body::decorate_body;
use crate::errors::{ReconcileError, SigningError};
use crate::reconciler::ReconcilerOptions;
use crate::sources::{
    AuthStrategy, ChangesetSource, CommitCreator, CommitRequest, CommitResponse, HostChangeset,
    SourceError, Sourcer, SourcerError,
};
use crate::webhooks::{PendingWebhook, WebhookEvent};
use bc_core::metadata::ensure_ref_prefix;
use bc_core::{
    Changeset, ChangesetEvent, ChangesetSpec, ExternalState, Operation, Operations, Plan,
    PublicationState, Repo, changeset_events, set_derived_state,
};
use bc_storage::{GetChangesetOpts, Store, StoreError};
use std::rc::Rc;
use tracing::{debug, warn};

/// What an execution left behind. `changeset` carries every in-memory
/// change made before `result` was decided and must be persisted either way.
#[derive(Debug)]
pub struct Execution {
    pub changeset: Changeset,
    /// Timeline events derived from the final changeset.
    pub events: Vec<ChangesetEvent>,
    /// Set when the host reported the remote repo as archived.
    pub archived_repo_id: Option<i64>,
    pub webhook: Option<PendingWebhook>,
    pub result: Result<(), ReconcileError>,
}

impl Execution {
    /// Writes the changeset, its events and the archived flag. Callers run
    /// this inside one transaction.
    pub fn persist(&self, store: &dyn Store, now_ms: i64) -> Result<(), StoreError> {
        if let Some(repo_id) = self.archived_repo_id {
            store.update_repo_archived(repo_id, true, now_ms)?;
        }
        store.update_changeset(&self.changeset, now_ms)?;
        store.upsert_changeset_events(&self.events, now_ms)
    }
}

pub fn execute_plan(
    store: &dyn Store,
    sourcer: &dyn Sourcer,
    commits: &dyn CommitCreator,
    options: &ReconcilerOptions,
    plan: Plan,
) -> Execution {
    let Plan {
        ops,
        changeset,
        spec,
        ..
    } = plan;
    let mut executor = Executor {
        store,
        sourcer,
        commits,
        options,
        changeset,
        spec,
        target_repo: None,
        source: None,
        remote: None,
        archived_repo_id: None,
        events: Vec::new(),
    };

    let mut webhook = None;
    let ops_result = executor.run_ops(&ops, &mut webhook);
    let refresh_result = executor.refresh_derived_state();
    let result = ops_result.and(refresh_result);
    if result.is_ok() {
        executor.changeset.previous_failure_message = None;
    }

    Execution {
        changeset: executor.changeset,
        events: executor.events,
        archived_repo_id: executor.archived_repo_id,
        webhook,
        result,
    }
}

struct Executor<'a> {
    store: &'a dyn Store,
    sourcer: &'a dyn Sourcer,
    commits: &'a dyn CommitCreator,
    options: &'a ReconcilerOptions,
    changeset: Changeset,
    spec: Option<ChangesetSpec>,

    /// The repo the changeset is opened against.
    target_repo: Option<Repo>,
    /// Built on first use, then reused for the rest of the run.
    source: Option<Rc<dyn ChangesetSource>>,
    /// The repo pushes go to. Resolved through the source on first use.
    remote: Option<Repo>,
    archived_repo_id: Option<i64>,
    events: Vec<ChangesetEvent>,
}

impl Executor<'_> {
    fn now_ms(&self) -> i64 {
        self.options.clock.now_ms()
    }

    fn run_ops(
        &mut self,
        ops: &Operations,
        webhook: &mut Option<PendingWebhook>,
    ) -> Result<(), ReconcileError> {
        let order = ops.execution_order();
        if order.is_empty() {
            return Ok(());
        }

        let repo_id = self.changeset.repo_id;
        let target = self
            .store
            .get_repo(repo_id)?
            .ok_or(ReconcileError::RepoNotFound(repo_id))?;
        self.target_repo = Some(target);

        // A plain push still gets announced as an update.
        let push_only = ops.contains(Operation::Push)
            && !ops.contains(Operation::Publish)
            && !ops.contains(Operation::Update);

        for op in order {
            debug!(changeset_id = self.changeset.id, op = %op, "executing operation");
            match op {
                Operation::Sync => self.sync_changeset()?,
                Operation::Import => self.import_changeset()?,
                Operation::Push => self.push_changeset(push_only, webhook)?,
                Operation::Publish => self.publish_changeset(false, webhook)?,
                Operation::PublishDraft => self.publish_changeset(true, webhook)?,
                Operation::Reopen => self.reopen_changeset(webhook)?,
                Operation::Update => self.update_changeset(webhook)?,
                Operation::Undraft => self.undraft_changeset(webhook)?,
                Operation::Close => self.close_changeset(webhook)?,
                Operation::Sleep => self.sleep(),
                Operation::Detach => self.detach_changeset(),
                Operation::Archive => self.archive_changeset(),
                Operation::Reattach => self.reattach_changeset(),
            }
        }
        Ok(())
    }

    fn refresh_derived_state(&mut self) -> Result<(), ReconcileError> {
        let repo_id = self.changeset.repo_id;
        let repo_archived = self.archived_repo_id == Some(repo_id)
            || self.store.get_repo(repo_id)?.is_some_and(|repo| repo.archived);
        let events = changeset_events(&self.changeset);
        set_derived_state(&mut self.changeset, &events, repo_archived);
        self.events = events;
        Ok(())
    }

    fn webhook(&self, event: WebhookEvent) -> Option<PendingWebhook> {
        Some(PendingWebhook::new(event, self.changeset.id))
    }

    fn target_repo(&self) -> Result<&Repo, ReconcileError> {
        self.target_repo
            .as_ref()
            .ok_or(ReconcileError::RepoNotFound(self.changeset.repo_id))
    }

    fn spec(&self, op: Operation) -> Result<&ChangesetSpec, ReconcileError> {
        self.spec.as_ref().ok_or(ReconcileError::MissingSpec(op))
    }

    fn changeset_source(&mut self) -> Result<Rc<dyn ChangesetSource>, ReconcileError> {
        if let Some(source) = &self.source {
            return Ok(Rc::clone(source));
        }
        let target = self.target_repo()?;
        let source: Rc<dyn ChangesetSource> = Rc::from(self.sourcer.for_changeset(
            &self.changeset,
            target,
            AuthStrategy::UserCredential,
        )?);
        self.source = Some(Rc::clone(&source));
        Ok(source)
    }

    fn remote_repo(&mut self) -> Result<Repo, ReconcileError> {
        if let Some(remote) = &self.remote {
            return Ok(remote.clone());
        }
        let source = self.changeset_source()?;
        let remote = source
            .remote_repo(self.target_repo()?, &self.changeset)
            .map_err(|err| ReconcileError::host("getting remote repo", err))?;
        self.remote = Some(remote.clone());
        Ok(remote)
    }

    /// The host view carrying the spec's desired attributes.
    fn spec_changeset(
        &self,
        op: Operation,
        remote: Repo,
        body: Option<String>,
    ) -> Result<HostChangeset, ReconcileError> {
        let spec = self.spec(op)?;
        Ok(HostChangeset {
            title: spec.title.clone(),
            body: body.unwrap_or_else(|| spec.body.clone()),
            base_ref: spec.base_ref.clone(),
            head_ref: spec.head_ref.clone(),
            remote_repo: remote,
            target_repo: self.target_repo()?.clone(),
            changeset: self.changeset.clone(),
        })
    }

    fn decorated_body(&self, op: Operation) -> Result<String, ReconcileError> {
        let spec = self.spec(op)?;
        decorate_body(
            self.store,
            &self.changeset,
            &spec.body,
            &self.options.external_url,
        )
        .map_err(|source| ReconcileError::Decorate {
            changeset_id: self.changeset.id,
            source,
        })
    }

    fn push_changeset(
        &mut self,
        push_only: bool,
        webhook: &mut Option<PendingWebhook>,
    ) -> Result<(), ReconcileError> {
        *webhook = if push_only {
            self.webhook(WebhookEvent::UpdateError)
        } else {
            None
        };

        let spec = self.spec(Operation::Push)?.clone();
        let existing = self.store.get_changeset_by_branch(&GetChangesetOpts {
            external_service_type: self.changeset.external_service_type,
            repo_id: self.changeset.repo_id,
            external_branch: ensure_ref_prefix(&spec.head_ref),
        })?;
        if existing.is_some_and(|other| other.id != self.changeset.id) {
            return Err(ReconcileError::PublishSameBranch);
        }

        let source = self.changeset_source()?;
        let remote = self.remote_repo()?;
        // Nothing can be pushed to an archived repo; skip the network round trip.
        if remote.archived {
            return Err(ReconcileError::PushToArchivedRepo);
        }

        let push = source
            .push_config(&remote)
            .map_err(|err| ReconcileError::host("getting push config", err))?;
        let request =
            source.build_commit_request(self.target_repo()?, &self.changeset, &spec, push);

        let response = match self.commits.create_commit_from_patch(&request) {
            Ok(response) => response,
            Err(err) => {
                if source.is_archived_push_error(&err.combined_output) {
                    self.handle_archived_repo(&remote);
                    return Err(ReconcileError::PushToArchivedRepo);
                }
                if err.patch_does_not_apply() {
                    return Err(ReconcileError::PatchDoesNotApply(err));
                }
                return Err(ReconcileError::PushCommit(err));
            }
        };

        if let Some(changelist_id) = response.changelist_id.as_deref().filter(|id| !id.is_empty()) {
            self.changeset.external_id = changelist_id.to_string();
        }

        self.sign_commit(&response, &remote, &request)?;

        if push_only {
            *webhook = self.webhook(WebhookEvent::Update);
        }
        Ok(())
    }

    /// Re-creates the pushed commit through the host's signing app, when one
    /// is configured.
    fn sign_commit(
        &mut self,
        response: &CommitResponse,
        remote: &Repo,
        request: &CommitRequest,
    ) -> Result<(), SigningError> {
        if !self.changeset.external_service_type.supports_commit_signing() {
            return Ok(());
        }
        let reject_unverified = self.options.reject_unverified_commit;

        let signing = match self
            .sourcer
            .for_changeset(&self.changeset, remote, AuthStrategy::SigningApp)
        {
            Ok(source) => source,
            Err(SourcerError::NoSigningAppConfigured) => {
                if reject_unverified {
                    return Err(SigningError::NoSigningApp);
                }
                return Ok(());
            }
            Err(err) => {
                if reject_unverified {
                    return Err(SigningError::Sourcer(err));
                }
                warn!(
                    changeset_id = self.changeset.id,
                    error = %err,
                    "failed to get signing source"
                );
                return Ok(());
            }
        };

        let commit = match signing.duplicate_commit(request, remote, &response.rev) {
            Ok(commit) => commit,
            Err(err) => {
                if reject_unverified {
                    return Err(SigningError::Duplicate(err));
                }
                warn!(changeset_id = self.changeset.id, error = %err, "failed to sign commit");
                return Ok(());
            }
        };

        if commit.verified {
            self.changeset.commit_verified_sha = Some(commit.sha);
        } else if reject_unverified {
            return Err(SigningError::Unverified { sha: commit.sha });
        } else {
            warn!(
                changeset_id = self.changeset.id,
                commit = %commit.sha,
                "commit created with signing app was not signed"
            );
        }
        Ok(())
    }

    fn publish_changeset(
        &mut self,
        as_draft: bool,
        webhook: &mut Option<PendingWebhook>,
    ) -> Result<(), ReconcileError> {
        // Until the host answers it is unknown whether anything was created.
        *webhook = self.webhook(WebhookEvent::UpdateError);
        let op = if as_draft {
            Operation::PublishDraft
        } else {
            Operation::Publish
        };

        let body = self.decorated_body(op)?;
        let source = self.changeset_source()?;
        let remote = self.remote_repo()?;
        let mut cs = self.spec_changeset(op, remote, Some(body))?;

        let created = if as_draft {
            source
                .create_draft_changeset(&mut cs)
                .map_err(|err| ReconcileError::host("creating draft changeset", err))
        } else {
            source
                .create_changeset(&mut cs)
                .map_err(|err| ReconcileError::host("creating changeset", err))
        };
        let exists = match created {
            Ok(exists) => exists,
            Err(err) => {
                self.changeset = cs.changeset;
                return Err(err);
            }
        };

        let outdated = exists && cs.is_outdated();
        if outdated {
            if let Err(err) = source.update_changeset(&mut cs) {
                self.changeset = cs.changeset;
                return Err(ReconcileError::host("updating changeset", err));
            }
        }

        self.changeset = cs.changeset;
        self.changeset.publication_state = PublicationState::Published;

        *webhook = if outdated {
            self.webhook(WebhookEvent::Update)
        } else {
            self.webhook(WebhookEvent::Publish)
        };
        Ok(())
    }

    fn update_changeset(
        &mut self,
        webhook: &mut Option<PendingWebhook>,
    ) -> Result<(), ReconcileError> {
        *webhook = self.webhook(WebhookEvent::UpdateError);

        let body = self.decorated_body(Operation::Update)?;
        let source = self.changeset_source()?;
        let remote = self.remote_repo()?;
        let mut cs = self.spec_changeset(Operation::Update, remote.clone(), Some(body))?;

        let updated = source.update_changeset(&mut cs);
        self.changeset = cs.changeset;
        match updated {
            Ok(()) => {}
            Err(SourceError::Archived) => self.handle_archived_repo(&remote),
            Err(err) => return Err(ReconcileError::host("updating changeset", err)),
        }

        *webhook = self.webhook(WebhookEvent::Update);
        Ok(())
    }

    fn reopen_changeset(
        &mut self,
        webhook: &mut Option<PendingWebhook>,
    ) -> Result<(), ReconcileError> {
        *webhook = self.webhook(WebhookEvent::UpdateError);

        let source = self.changeset_source()?;
        let remote = self.remote_repo()?;
        let mut cs = self.spec_changeset(Operation::Reopen, remote, None)?;
        let reopened = source.reopen_changeset(&mut cs);
        self.changeset = cs.changeset;
        reopened.map_err(|err| ReconcileError::host("reopening changeset", err))?;

        *webhook = self.webhook(WebhookEvent::Update);
        Ok(())
    }

    fn undraft_changeset(
        &mut self,
        webhook: &mut Option<PendingWebhook>,
    ) -> Result<(), ReconcileError> {
        *webhook = self.webhook(WebhookEvent::UpdateError);

        let source = self.changeset_source()?;
        let remote = self.remote_repo()?;
        let mut cs = self.spec_changeset(Operation::Undraft, remote, None)?;
        let undrafted = source.undraft_changeset(&mut cs);
        self.changeset = cs.changeset;
        undrafted.map_err(|err| ReconcileError::host("undrafting changeset", err))?;

        *webhook = self.webhook(WebhookEvent::Update);
        Ok(())
    }

    /// Closes the changeset if it is open or draft on the host; anything
    /// else is left alone without a webhook.
    fn close_changeset(
        &mut self,
        webhook: &mut Option<PendingWebhook>,
    ) -> Result<(), ReconcileError> {
        self.changeset.closing = false;
        if !self.changeset.closeable() {
            *webhook = None;
            return Ok(());
        }
        *webhook = self.webhook(WebhookEvent::UpdateError);

        let source = self.changeset_source()?;
        let remote = self.remote_repo()?;
        let mut cs = HostChangeset::bare(
            self.changeset.clone(),
            remote,
            self.target_repo()?.clone(),
        );
        let closed = source.close_changeset(&mut cs);
        self.changeset = cs.changeset;
        closed.map_err(|err| ReconcileError::host("closing changeset", err))?;

        *webhook = self.webhook(WebhookEvent::Close);
        Ok(())
    }

    fn load_changeset(&mut self) -> Result<(), ReconcileError> {
        let source = self.changeset_source()?;
        let remote = self.remote_repo()?;
        let mut cs = HostChangeset::bare(
            self.changeset.clone(),
            remote,
            self.target_repo()?.clone(),
        );
        let loaded = source.load_changeset(&mut cs);
        self.changeset = cs.changeset;
        loaded.map_err(|err| ReconcileError::host("loading changeset", err))
    }

    /// Loads the changeset; a changeset gone from the host is marked
    /// deleted. Returns whether it was found.
    fn load_or_mark_deleted(&mut self) -> Result<bool, ReconcileError> {
        match self.load_changeset() {
            Ok(()) => Ok(true),
            Err(ReconcileError::Source {
                source: SourceError::NotFound,
                ..
            }) => {
                if !self.changeset.is_deleted() {
                    let now_ms = self.now_ms();
                    self.changeset.set_deleted(now_ms);
                }
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn sync_changeset(&mut self) -> Result<(), ReconcileError> {
        self.load_or_mark_deleted()?;
        Ok(())
    }

    fn import_changeset(&mut self) -> Result<(), ReconcileError> {
        if self.load_or_mark_deleted()? {
            self.changeset.publication_state = PublicationState::Published;
        }
        Ok(())
    }

    fn sleep(&self) {
        if !self.options.skip_delays {
            std::thread::sleep(self.options.sleep_before_sync);
        }
    }

    fn detach_changeset(&mut self) {
        let detached = self
            .changeset
            .batch_changes
            .iter()
            .filter(|assoc| assoc.detach)
            .map(|assoc| assoc.batch_change_id)
            .collect::<Vec<_>>();
        for batch_change_id in detached {
            self.changeset.remove_batch_change(batch_change_id);
        }
        // Still attached elsewhere means not detached.
        if self.changeset.batch_changes.is_empty() {
            self.changeset.detached_at_ms = Some(self.now_ms());
        }
    }

    fn archive_changeset(&mut self) {
        for assoc in &mut self.changeset.batch_changes {
            if assoc.archive {
                assoc.is_archived = true;
                assoc.archive = false;
            }
        }
    }

    fn reattach_changeset(&mut self) {
        self.changeset.detached_at_ms = None;
    }

    /// Records that the remote repo is archived and freezes the changeset as
    /// read-only.
    fn handle_archived_repo(&mut self, remote: &Repo) {
        self.archived_repo_id = Some(remote.id);
        if let Some(cached) = self.remote.as_mut() {
            cached.archived = true;
        }
        if let Some(target) = self.target_repo.as_mut().filter(|target| target.id == remote.id) {
            target.archived = true;
        }
        self.changeset.external_state = Some(ExternalState::ReadOnly);
    }
}

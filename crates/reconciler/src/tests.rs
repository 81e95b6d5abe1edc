#![forbid(unsafe_code)]

use crate::clock::{Clock, FixedClock};
use crate::errors::{ReconcileError, SigningError};
use crate::reconciler::{Reconciler, ReconcilerOptions};
use crate::sources::{
    AuthStrategy, ChangesetSource, CommitCreator, CommitError, CommitRequest, CommitResponse,
    HostChangeset, PushConfig, SignedCommit, SourceError, Sourcer, SourcerError,
};
use crate::worker::{WorkerConfig, WorkerPool};
use bc_core::metadata::{Actor, GitHubPullRequest, GitHubPullRequestState};
use bc_core::{
    BatchChangeAssoc, Changeset, ChangesetMetadata, ChangesetSpec, CommitAuthor,
    ExternalServiceType, ExternalState, NamespaceKind, PublicationState, PublishedValue,
    ReconcilerState, Repo,
};
use bc_storage::{NewBatchChange, NewRepo, SqliteStore, Store};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const NOW: i64 = 1_700_000_000_000;

#[derive(Debug, Default)]
struct Script {
    calls: Vec<&'static str>,
    bodies: Vec<String>,
    create_error: Option<SourceError>,
    /// Title of a pull request already open on the branch when creating.
    existing_title: Option<&'static str>,
    update_error: Option<SourceError>,
    load_error: Option<SourceError>,
    /// Metadata handed out by the next load.
    load_metadata: Option<ChangesetMetadata>,
    commit_error: Option<CommitError>,
    remote_archived: bool,
    /// `None` means no signing app is configured.
    signing_verified: Option<bool>,
}

fn pull_request(title: &str, body: &str, base_ref: &str) -> ChangesetMetadata {
    ChangesetMetadata::GitHub(GitHubPullRequest {
        number: 101,
        title: title.to_string(),
        body: body.to_string(),
        url: "https://github.com/acme/api/pull/101".to_string(),
        state: GitHubPullRequestState::Open,
        is_draft: false,
        head_ref_name: "bump-deps".to_string(),
        base_ref_name: base_ref.to_string(),
        head_ref_oid: "c0ffee".to_string(),
        author: Actor {
            login: "ada".to_string(),
            ..Actor::default()
        },
        timeline: Vec::new(),
        checks: Vec::new(),
        updated_at_ms: NOW,
    })
}

/// One fake code host serving as sourcer, source and commit service.
#[derive(Clone, Debug, Default)]
struct FakeHost(Arc<Mutex<Script>>);

impl FakeHost {
    fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.0.lock().expect("script lock"));
    }

    fn record(&self, call: &'static str) {
        self.script(|s| s.calls.push(call));
    }

    fn calls(&self) -> Vec<&'static str> {
        self.0.lock().expect("script lock").calls.clone()
    }

    fn bodies(&self) -> Vec<String> {
        self.0.lock().expect("script lock").bodies.clone()
    }
}

impl ChangesetSource for FakeHost {
    fn service_type(&self) -> ExternalServiceType {
        ExternalServiceType::GitHub
    }

    fn create_changeset(&self, cs: &mut HostChangeset) -> Result<bool, SourceError> {
        self.record("create");
        let body = cs.body.clone();
        self.script(|s| s.bodies.push(body));
        if let Some(err) = self.0.lock().expect("script lock").create_error.take() {
            return Err(err);
        }
        let existing = self.0.lock().expect("script lock").existing_title.take();
        if let Some(title) = existing {
            let metadata = pull_request(title, &cs.body, &cs.base_ref);
            cs.set_metadata(metadata);
            return Ok(true);
        }
        cs.changeset.external_id = "101".to_string();
        cs.changeset.external_state = Some(ExternalState::Open);
        Ok(false)
    }

    fn create_draft_changeset(&self, cs: &mut HostChangeset) -> Result<bool, SourceError> {
        self.record("create_draft");
        cs.changeset.external_id = "101".to_string();
        cs.changeset.external_state = Some(ExternalState::Draft);
        Ok(false)
    }

    fn undraft_changeset(&self, cs: &mut HostChangeset) -> Result<(), SourceError> {
        self.record("undraft");
        cs.changeset.external_state = Some(ExternalState::Open);
        Ok(())
    }

    fn update_changeset(&self, cs: &mut HostChangeset) -> Result<(), SourceError> {
        self.record("update");
        let body = cs.body.clone();
        self.script(|s| s.bodies.push(body));
        match self.0.lock().expect("script lock").update_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reopen_changeset(&self, cs: &mut HostChangeset) -> Result<(), SourceError> {
        self.record("reopen");
        cs.changeset.external_state = Some(ExternalState::Open);
        Ok(())
    }

    fn close_changeset(&self, cs: &mut HostChangeset) -> Result<(), SourceError> {
        self.record("close");
        cs.changeset.external_state = Some(ExternalState::Closed);
        Ok(())
    }

    fn load_changeset(&self, cs: &mut HostChangeset) -> Result<(), SourceError> {
        self.record("load");
        let (error, metadata) = {
            let mut script = self.0.lock().expect("script lock");
            (script.load_error.take(), script.load_metadata.take())
        };
        if let Some(err) = error {
            return Err(err);
        }
        if let Some(metadata) = metadata {
            cs.set_metadata(metadata);
        }
        Ok(())
    }

    fn push_config(&self, remote: &Repo) -> Result<PushConfig, SourceError> {
        Ok(PushConfig {
            remote_url: remote.clone_url.clone(),
            ..PushConfig::default()
        })
    }

    fn is_archived_push_error(&self, combined_output: &str) -> bool {
        combined_output.contains("This repository was archived")
    }

    fn remote_repo(&self, target: &Repo, _changeset: &Changeset) -> Result<Repo, SourceError> {
        let mut remote = target.clone();
        remote.archived |= self.0.lock().expect("script lock").remote_archived;
        Ok(remote)
    }

    fn duplicate_commit(
        &self,
        _request: &CommitRequest,
        _remote: &Repo,
        _rev: &str,
    ) -> Result<SignedCommit, SourceError> {
        self.record("duplicate");
        let verified = self
            .0
            .lock()
            .expect("script lock")
            .signing_verified
            .unwrap_or(false);
        Ok(SignedCommit {
            sha: "5e1f5e1f".to_string(),
            verified,
        })
    }
}

impl Sourcer for FakeHost {
    fn for_changeset(
        &self,
        _changeset: &Changeset,
        _repo: &Repo,
        strategy: AuthStrategy,
    ) -> Result<Box<dyn ChangesetSource>, SourcerError> {
        if strategy == AuthStrategy::SigningApp
            && self.0.lock().expect("script lock").signing_verified.is_none()
        {
            return Err(SourcerError::NoSigningAppConfigured);
        }
        Ok(Box::new(self.clone()))
    }
}

impl CommitCreator for FakeHost {
    fn create_commit_from_patch(
        &self,
        request: &CommitRequest,
    ) -> Result<CommitResponse, CommitError> {
        self.record("commit");
        assert_eq!(request.target_ref, "refs/heads/bump-deps");
        if let Some(err) = self.0.lock().expect("script lock").commit_error.take() {
            return Err(err);
        }
        Ok(CommitResponse {
            rev: "c0ffee".to_string(),
            changelist_id: None,
        })
    }
}

/// Commits from a second connection before pushing, the way other workers
/// and lease heartbeats write while a reconciliation talks to the host.
#[derive(Debug)]
struct ConcurrentWriter {
    dir: PathBuf,
    host: FakeHost,
    /// Lease to renew as `(changeset_id, worker_id)`.
    lease: Option<(i64, &'static str)>,
}

impl CommitCreator for ConcurrentWriter {
    fn create_commit_from_patch(
        &self,
        request: &CommitRequest,
    ) -> Result<CommitResponse, CommitError> {
        let mut sibling = SqliteStore::open(&self.dir).expect("open sibling store");
        sibling
            .insert_repo(&NewRepo {
                name: "github.com/acme/web".to_string(),
                external_service_type: ExternalServiceType::GitHub,
                clone_url: "https://github.com/acme/web.git".to_string(),
                created_at_ms: NOW,
            })
            .expect("sibling write");
        if let Some((changeset_id, worker_id)) = self.lease {
            sibling
                .heartbeat_changeset(changeset_id, worker_id, NOW, 60_000)
                .expect("heartbeat while reconciling");
        }
        self.host.create_commit_from_patch(request)
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    store: SqliteStore,
    host: FakeHost,
    clock: Arc<FixedClock>,
    repo_id: i64,
    batch_change_id: i64,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SqliteStore::open(dir.path()).expect("open store");
        let repo_id = store
            .insert_repo(&NewRepo {
                name: "github.com/acme/api".to_string(),
                external_service_type: ExternalServiceType::GitHub,
                clone_url: "https://github.com/acme/api.git".to_string(),
                created_at_ms: NOW,
            })
            .expect("insert repo")
            .id;
        let batch_change_id = store
            .insert_batch_change(&NewBatchChange {
                name: "bump-deps".to_string(),
                namespace_name: "acme".to_string(),
                namespace_kind: NamespaceKind::Organization,
                created_at_ms: NOW,
            })
            .expect("insert batch change")
            .id;
        Self {
            dir,
            store,
            host: FakeHost::default(),
            clock: Arc::new(FixedClock::new(NOW)),
            repo_id,
            batch_change_id,
        }
    }

    fn options(&self) -> ReconcilerOptions {
        let clock: Arc<dyn Clock> = self.clock.clone();
        ReconcilerOptions {
            clock,
            skip_delays: true,
            external_url: "https://sg.example.com".to_string(),
            ..ReconcilerOptions::default()
        }
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::new(self.host.clone()),
            Arc::new(self.host.clone()),
            self.options(),
        )
    }

    fn spec(&self, published: PublishedValue, diff: &str) -> ChangesetSpec {
        self.titled_spec(published, diff, "Bump deps")
    }

    fn titled_spec(&self, published: PublishedValue, diff: &str, title: &str) -> ChangesetSpec {
        self.store
            .insert_changeset_spec(&ChangesetSpec {
                repo_id: self.repo_id,
                title: title.to_string(),
                body: "Keeps dependencies fresh.".to_string(),
                base_ref: "refs/heads/main".to_string(),
                base_rev: "abc123".to_string(),
                head_ref: "refs/heads/bump-deps".to_string(),
                diff: diff.to_string(),
                commit_message: "bump deps".to_string(),
                commit_author: CommitAuthor {
                    name: "Ada".to_string(),
                    email: "ada@example.com".to_string(),
                },
                published,
                ..ChangesetSpec::default()
            })
            .expect("insert spec")
    }

    /// An unpublished changeset owned by the batch change, wanting to be
    /// published.
    fn unpublished_changeset(&self) -> Changeset {
        let spec = self.spec(PublishedValue::Bool(true), "diff-1");
        let mut changeset = Changeset::new(self.repo_id, ExternalServiceType::GitHub);
        changeset.owned_by_batch_change_id = Some(self.batch_change_id);
        changeset.batch_changes = vec![BatchChangeAssoc::new(self.batch_change_id)];
        changeset.current_spec_id = Some(spec.id);
        self.store
            .insert_changeset(&changeset, NOW)
            .expect("insert changeset")
    }

    /// A published, open changeset whose new spec only changes the diff.
    fn published_with_new_diff(&self) -> Changeset {
        let previous = self.spec(PublishedValue::Bool(true), "diff-1");
        let current = self.spec(PublishedValue::Bool(true), "diff-2");
        self.published(&previous, &current, ExternalState::Open)
    }

    fn published(
        &self,
        previous: &ChangesetSpec,
        current: &ChangesetSpec,
        state: ExternalState,
    ) -> Changeset {
        let mut changeset = Changeset::new(self.repo_id, ExternalServiceType::GitHub);
        changeset.owned_by_batch_change_id = Some(self.batch_change_id);
        changeset.batch_changes = vec![BatchChangeAssoc::new(self.batch_change_id)];
        changeset.previous_spec_id = Some(previous.id);
        changeset.current_spec_id = Some(current.id);
        changeset.publication_state = PublicationState::Published;
        changeset.external_state = Some(state);
        changeset.external_id = "101".to_string();
        changeset.external_branch = "refs/heads/bump-deps".to_string();
        self.store
            .insert_changeset(&changeset, NOW)
            .expect("insert changeset")
    }

    fn reload(&self, id: i64) -> Changeset {
        self.store
            .get_changeset(id)
            .expect("get changeset")
            .expect("changeset exists")
    }

    fn webhook_events(&self, changeset_id: i64) -> Vec<String> {
        self.store
            .list_webhook_jobs(changeset_id)
            .expect("list webhooks")
            .into_iter()
            .map(|job| job.event_type)
            .collect()
    }
}

#[test]
fn publish_pushes_creates_and_announces() {
    let mut fx = Fixture::new();
    let changeset = fx.unpublished_changeset();
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert_eq!(fx.host.calls(), vec!["commit", "create"]);
    let bodies = fx.host.bodies();
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].starts_with("Keeps dependencies fresh.\n\n"));
    assert!(bodies[0].contains(
        "(https://sg.example.com/organizations/acme/batch-changes/bump-deps)"
    ));

    let stored = fx.reload(id);
    assert_eq!(stored.publication_state, PublicationState::Published);
    assert_eq!(stored.external_id, "101");
    assert_eq!(stored.external_state, Some(ExternalState::Open));
    assert_eq!(stored.previous_failure_message, None);
    assert_eq!(fx.webhook_events(id), vec!["changeset:publish"]);
}

#[test]
fn failed_publish_is_persisted_and_reported() {
    let mut fx = Fixture::new();
    fx.host
        .script(|s| s.create_error = Some(SourceError::Api("rate limited".to_string())));
    let mut changeset = fx.unpublished_changeset();
    changeset.failure_message = Some("earlier failure".to_string());
    let id = changeset.id;

    let err = fx
        .reconciler()
        .handle(&mut fx.store, changeset)
        .expect_err("create fails");

    assert!(matches!(
        err,
        ReconcileError::Source {
            source: SourceError::Api(_),
            ..
        }
    ));
    assert!(!err.is_non_retryable());
    assert_eq!(fx.webhook_events(id), vec!["changeset:update_error"]);

    let stored = fx.reload(id);
    assert_eq!(stored.publication_state, PublicationState::Unpublished);
    // The failure of the earlier attempt is kept around on failure.
    assert_eq!(
        stored.previous_failure_message.as_deref(),
        Some("earlier failure")
    );
    assert_eq!(stored.failure_message, None);
}

#[test]
fn push_to_archived_remote_fails_before_committing() {
    let mut fx = Fixture::new();
    fx.host.script(|s| s.remote_archived = true);
    let changeset = fx.unpublished_changeset();
    let id = changeset.id;

    let err = fx
        .reconciler()
        .handle(&mut fx.store, changeset)
        .expect_err("archived remote");

    assert!(matches!(err, ReconcileError::PushToArchivedRepo));
    assert!(err.is_non_retryable());
    assert!(fx.host.calls().is_empty());
    assert!(fx.webhook_events(id).is_empty());
}

#[test]
fn push_rejected_as_archived_marks_repo_read_only() {
    let mut fx = Fixture::new();
    fx.host.script(|s| {
        s.commit_error = Some(CommitError {
            repository_name: "acme/api".to_string(),
            internal_error: "exit status 1".to_string(),
            command: "git push".to_string(),
            combined_output: "ERROR: This repository was archived so it is read-only.".to_string(),
        });
    });
    let changeset = fx.unpublished_changeset();
    let id = changeset.id;

    let err = fx
        .reconciler()
        .handle(&mut fx.store, changeset)
        .expect_err("archived push");

    assert!(matches!(err, ReconcileError::PushToArchivedRepo));
    let repo = fx
        .store
        .get_repo(fx.repo_id)
        .expect("get repo")
        .expect("repo exists");
    assert!(repo.archived);
    assert_eq!(fx.reload(id).external_state, Some(ExternalState::ReadOnly));
}

#[test]
fn patch_that_does_not_apply_is_not_retried() {
    let mut fx = Fixture::new();
    fx.host.script(|s| {
        s.commit_error = Some(CommitError {
            repository_name: "acme/api".to_string(),
            internal_error: "exit status 1".to_string(),
            command: "git apply --cached".to_string(),
            combined_output: "error: patch failed: go.mod:3\nerror: go.mod: patch does not apply"
                .to_string(),
        });
    });
    let changeset = fx.unpublished_changeset();

    let err = fx
        .reconciler()
        .handle(&mut fx.store, changeset)
        .expect_err("patch conflict");

    assert!(matches!(err, ReconcileError::PatchDoesNotApply(_)));
    assert!(err.is_non_retryable());
    assert_eq!(fx.host.calls(), vec!["commit"]);
}

#[test]
fn branch_taken_by_another_changeset_is_rejected() {
    let mut fx = Fixture::new();
    let mut other = Changeset::new(fx.repo_id, ExternalServiceType::GitHub);
    other.external_branch = "refs/heads/bump-deps".to_string();
    fx.store
        .insert_changeset(&other, NOW)
        .expect("insert other changeset");
    let changeset = fx.unpublished_changeset();

    let err = fx
        .reconciler()
        .handle(&mut fx.store, changeset)
        .expect_err("same branch");

    assert!(matches!(err, ReconcileError::PublishSameBranch));
    assert!(err.is_non_retryable());
    assert!(fx.host.calls().is_empty());
}

#[test]
fn pushing_a_new_commit_resyncs_and_announces_an_update() {
    let mut fx = Fixture::new();
    let changeset = fx.published_with_new_diff();
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert_eq!(fx.host.calls(), vec!["commit", "load"]);
    assert_eq!(fx.webhook_events(id), vec!["changeset:update"]);
    assert_eq!(fx.reload(id).external_deleted_at_ms, None);
}

#[test]
fn changeset_gone_from_host_is_marked_deleted() {
    let mut fx = Fixture::new();
    fx.host.script(|s| s.load_error = Some(SourceError::NotFound));
    let changeset = fx.published_with_new_diff();
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("not found is not an error");

    let stored = fx.reload(id);
    assert_eq!(stored.external_deleted_at_ms, Some(NOW));
    assert_eq!(stored.external_state, Some(ExternalState::Deleted));
}

#[test]
fn verified_signed_commit_is_recorded() {
    let mut fx = Fixture::new();
    fx.host.script(|s| s.signing_verified = Some(true));
    let changeset = fx.unpublished_changeset();
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert_eq!(fx.host.calls(), vec!["commit", "duplicate", "create"]);
    assert_eq!(fx.reload(id).commit_verified_sha.as_deref(), Some("5e1f5e1f"));
}

#[test]
fn unverified_commit_fails_only_when_rejecting() {
    let mut fx = Fixture::new();
    fx.host.script(|s| s.signing_verified = Some(false));
    let changeset = fx.unpublished_changeset();
    let reconciler = Reconciler::new(
        Arc::new(fx.host.clone()),
        Arc::new(fx.host.clone()),
        ReconcilerOptions {
            reject_unverified_commit: true,
            ..fx.options()
        },
    );

    let err = reconciler
        .handle(&mut fx.store, changeset)
        .expect_err("unverified commit");
    assert!(matches!(
        err,
        ReconcileError::AfterCommit(SigningError::Unverified { .. })
    ));

    let changeset = fx.unpublished_changeset();
    let id = changeset.id;
    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("unverified commit tolerated");
    assert_eq!(fx.reload(id).commit_verified_sha, None);
}

#[test]
fn closing_an_already_closed_changeset_is_a_no_op() {
    let mut fx = Fixture::new();
    let mut changeset = fx.published_with_new_diff();
    changeset.closing = true;
    changeset.external_state = Some(ExternalState::Closed);
    fx.store
        .update_changeset(&changeset, NOW)
        .expect("update changeset");
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert!(fx.host.calls().is_empty());
    assert!(fx.webhook_events(id).is_empty());
    assert!(!fx.reload(id).closing);
}

#[test]
fn closing_an_open_changeset_announces_close() {
    let mut fx = Fixture::new();
    let mut changeset = fx.published_with_new_diff();
    changeset.closing = true;
    fx.store
        .update_changeset(&changeset, NOW)
        .expect("update changeset");
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert_eq!(fx.host.calls(), vec!["close"]);
    assert_eq!(fx.webhook_events(id), vec!["changeset:close"]);
    let stored = fx.reload(id);
    assert!(!stored.closing);
    assert_eq!(stored.external_state, Some(ExternalState::Closed));
}

#[test]
fn detaching_the_last_batch_change_stamps_detached_at() {
    let mut fx = Fixture::new();
    let mut changeset = fx.published_with_new_diff();
    assert!(changeset.detach(fx.batch_change_id));
    fx.store
        .update_changeset(&changeset, NOW)
        .expect("update changeset");
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    let stored = fx.reload(id);
    assert!(stored.batch_changes.is_empty());
    assert_eq!(stored.detached_at_ms, Some(NOW));
    assert!(fx.host.calls().is_empty());
    assert!(fx.webhook_events(id).is_empty());
}

#[test]
fn existing_outdated_changeset_is_updated_instead() {
    let mut fx = Fixture::new();
    fx.host.script(|s| s.existing_title = Some("Old title"));
    let changeset = fx.unpublished_changeset();
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert_eq!(fx.host.calls(), vec!["commit", "create", "update"]);
    assert_eq!(fx.webhook_events(id), vec!["changeset:update"]);
    let stored = fx.reload(id);
    assert_eq!(stored.publication_state, PublicationState::Published);
    assert_eq!(stored.external_id, "101");
    assert_eq!(stored.external_state, Some(ExternalState::Open));
}

#[test]
fn existing_up_to_date_changeset_is_announced_as_published() {
    let mut fx = Fixture::new();
    fx.host.script(|s| s.existing_title = Some("Bump deps"));
    let changeset = fx.unpublished_changeset();
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert_eq!(fx.host.calls(), vec!["commit", "create"]);
    assert_eq!(fx.webhook_events(id), vec!["changeset:publish"]);
    assert_eq!(fx.reload(id).publication_state, PublicationState::Published);
}

#[test]
fn draft_spec_publishes_a_draft() {
    let mut fx = Fixture::new();
    let spec = fx.spec(PublishedValue::Draft, "diff-1");
    let mut changeset = Changeset::new(fx.repo_id, ExternalServiceType::GitHub);
    changeset.owned_by_batch_change_id = Some(fx.batch_change_id);
    changeset.batch_changes = vec![BatchChangeAssoc::new(fx.batch_change_id)];
    changeset.current_spec_id = Some(spec.id);
    let changeset = fx
        .store
        .insert_changeset(&changeset, NOW)
        .expect("insert changeset");
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert_eq!(fx.host.calls(), vec!["commit", "create_draft"]);
    assert_eq!(fx.webhook_events(id), vec!["changeset:publish"]);
    let stored = fx.reload(id);
    assert_eq!(stored.publication_state, PublicationState::Published);
    assert_eq!(stored.external_state, Some(ExternalState::Draft));
}

#[test]
fn draft_turned_published_is_undrafted() {
    let mut fx = Fixture::new();
    let previous = fx.spec(PublishedValue::Draft, "diff-1");
    let current = fx.spec(PublishedValue::Bool(true), "diff-1");
    let changeset = fx.published(&previous, &current, ExternalState::Draft);
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert_eq!(fx.host.calls(), vec!["undraft"]);
    assert_eq!(fx.webhook_events(id), vec!["changeset:update"]);
    assert_eq!(fx.reload(id).external_state, Some(ExternalState::Open));
}

#[test]
fn closed_changeset_still_attached_is_reopened() {
    let mut fx = Fixture::new();
    let previous = fx.spec(PublishedValue::Bool(true), "diff-1");
    let current = fx.spec(PublishedValue::Bool(true), "diff-1");
    let changeset = fx.published(&previous, &current, ExternalState::Closed);
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert_eq!(fx.host.calls(), vec!["reopen"]);
    assert_eq!(fx.webhook_events(id), vec!["changeset:update"]);
    assert_eq!(fx.reload(id).external_state, Some(ExternalState::Open));
}

#[test]
fn update_against_archived_repo_marks_it_read_only() {
    let mut fx = Fixture::new();
    fx.host.script(|s| s.update_error = Some(SourceError::Archived));
    let previous = fx.spec(PublishedValue::Bool(true), "diff-1");
    let current = fx.titled_spec(PublishedValue::Bool(true), "diff-1", "Bump all deps");
    let changeset = fx.published(&previous, &current, ExternalState::Open);
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("archived repo is handled");

    assert_eq!(fx.host.calls(), vec!["update"]);
    assert_eq!(fx.webhook_events(id), vec!["changeset:update"]);
    assert_eq!(fx.reload(id).external_state, Some(ExternalState::ReadOnly));
    let repo = fx
        .store
        .get_repo(fx.repo_id)
        .expect("get repo")
        .expect("repo exists");
    assert!(repo.archived);
}

/// A tracked changeset that is not owned by any batch change.
fn imported_changeset(fx: &Fixture) -> Changeset {
    let mut changeset = Changeset::new(fx.repo_id, ExternalServiceType::GitHub);
    changeset.batch_changes = vec![BatchChangeAssoc::new(fx.batch_change_id)];
    changeset.external_id = "101".to_string();
    fx.store
        .insert_changeset(&changeset, NOW)
        .expect("insert changeset")
}

#[test]
fn import_loads_and_publishes_found_changeset() {
    let mut fx = Fixture::new();
    fx.host.script(|s| {
        s.load_metadata = Some(pull_request("Fix flaky test", "", "refs/heads/main"));
    });
    let changeset = imported_changeset(&fx);
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert_eq!(fx.host.calls(), vec!["load"]);
    assert!(fx.webhook_events(id).is_empty());
    let stored = fx.reload(id);
    assert_eq!(stored.publication_state, PublicationState::Published);
    assert_eq!(stored.external_state, Some(ExternalState::Open));
    assert_eq!(stored.external_branch, "refs/heads/bump-deps");
}

#[test]
fn import_of_missing_changeset_marks_it_deleted() {
    let mut fx = Fixture::new();
    fx.host.script(|s| s.load_error = Some(SourceError::NotFound));
    let changeset = imported_changeset(&fx);
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("not found is not an error");

    let stored = fx.reload(id);
    assert_eq!(stored.publication_state, PublicationState::Unpublished);
    assert_eq!(stored.external_deleted_at_ms, Some(NOW));
    assert_eq!(stored.external_state, Some(ExternalState::Deleted));
}

#[test]
fn archiving_marks_the_association_archived() {
    let mut fx = Fixture::new();
    let mut changeset = fx.published_with_new_diff();
    assert!(changeset.archive(fx.batch_change_id));
    fx.store
        .update_changeset(&changeset, NOW)
        .expect("update changeset");
    let id = changeset.id;

    fx.reconciler()
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    let stored = fx.reload(id);
    assert!(stored.archived_in(fx.batch_change_id));
    assert!(!stored.batch_changes[0].archive);
    assert!(fx.host.calls().is_empty());
    assert!(fx.webhook_events(id).is_empty());
}

#[test]
fn writes_by_other_connections_do_not_break_reconciliation() {
    let mut fx = Fixture::new();
    let changeset = fx.unpublished_changeset();
    let id = changeset.id;
    let reconciler = Reconciler::new(
        Arc::new(fx.host.clone()),
        Arc::new(ConcurrentWriter {
            dir: fx.dir.path().to_path_buf(),
            host: fx.host.clone(),
            lease: None,
        }),
        fx.options(),
    );

    reconciler
        .handle(&mut fx.store, changeset)
        .expect("reconcile");

    assert_eq!(fx.host.calls(), vec!["commit", "create"]);
    assert_eq!(fx.webhook_events(id), vec!["changeset:publish"]);
    let stored = fx.reload(id);
    assert_eq!(stored.publication_state, PublicationState::Published);
    assert_eq!(stored.external_id, "101");
}

fn worker_pool(fx: &Fixture, reconciler: Reconciler) -> WorkerPool {
    WorkerPool::new(fx.dir.path(), reconciler, WorkerConfig::default())
}

#[test]
fn worker_completes_claimed_changeset() {
    let mut fx = Fixture::new();
    let id = fx.unpublished_changeset().id;
    let pool = worker_pool(&fx, fx.reconciler());

    assert!(pool.process_next(&mut fx.store, "w-1").expect("process"));
    assert!(!pool.process_next(&mut fx.store, "w-1").expect("empty queue"));

    let stored = fx.reload(id);
    assert_eq!(stored.reconciler_state, ReconcilerState::Completed);
    assert_eq!(stored.publication_state, PublicationState::Published);
}

#[test]
fn worker_lease_can_be_renewed_while_reconciling() {
    let mut fx = Fixture::new();
    let id = fx.unpublished_changeset().id;
    let reconciler = Reconciler::new(
        Arc::new(fx.host.clone()),
        Arc::new(ConcurrentWriter {
            dir: fx.dir.path().to_path_buf(),
            host: fx.host.clone(),
            lease: Some((id, "w-1")),
        }),
        fx.options(),
    );
    let pool = worker_pool(&fx, reconciler);

    assert!(pool.process_next(&mut fx.store, "w-1").expect("process"));

    let stored = fx.reload(id);
    assert_eq!(stored.reconciler_state, ReconcilerState::Completed);
    assert_eq!(stored.publication_state, PublicationState::Published);
}

#[test]
fn worker_retries_after_backoff() {
    let mut fx = Fixture::new();
    fx.host
        .script(|s| s.create_error = Some(SourceError::Api("bad gateway".to_string())));
    let id = fx.unpublished_changeset().id;
    let pool = worker_pool(&fx, fx.reconciler());

    assert!(pool.process_next(&mut fx.store, "w-1").expect("process"));
    let stored = fx.reload(id);
    assert_eq!(stored.reconciler_state, ReconcilerState::Errored);
    assert_eq!(stored.num_failures, 1);
    assert!(
        stored
            .failure_message
            .as_deref()
            .is_some_and(|msg| msg.contains("bad gateway"))
    );
    assert!(!fx.store.last_failure_non_retryable(id).expect("flag"));

    assert!(!pool.process_next(&mut fx.store, "w-1").expect("backing off"));
    fx.clock.advance(WorkerConfig::default().retry_backoff);
    assert!(pool.process_next(&mut fx.store, "w-1").expect("retry"));

    let stored = fx.reload(id);
    assert_eq!(stored.reconciler_state, ReconcilerState::Completed);
    assert_eq!(stored.publication_state, PublicationState::Published);
}

#[test]
fn worker_counts_non_retryable_failures_like_any_other() {
    let mut fx = Fixture::new();
    fx.host.script(|s| s.remote_archived = true);
    let id = fx.unpublished_changeset().id;
    let pool = worker_pool(&fx, fx.reconciler());

    assert!(pool.process_next(&mut fx.store, "w-1").expect("process"));

    let stored = fx.reload(id);
    assert_eq!(stored.reconciler_state, ReconcilerState::Errored);
    assert_eq!(stored.num_failures, 1);
    assert_eq!(
        stored.failure_message.as_deref(),
        Some("cannot push to an archived repo")
    );
    assert!(fx.store.last_failure_non_retryable(id).expect("flag"));
}

#![forbid(unsafe_code)]

//! Capabilities the reconciler consumes from code hosts and from the commit
//! service. Host clients live outside this crate and plug in through
//! [`Sourcer`] and [`CommitCreator`].

use bc_core::metadata::ensure_ref_prefix;
use bc_core::{Changeset, ChangesetMetadata, ChangesetSpec, ExternalServiceType, Repo};

/// How a source authenticates against its code host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Credentials of the user who applied the batch change, falling back to
    /// site credentials.
    UserCredential,
    /// A signing app configured for the code host. Used to re-create pushed
    /// commits as verified commits.
    SigningApp,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("changeset not found on code host")]
    NotFound,
    #[error("repository is archived")]
    Archived,
    #[error("{0} is not supported by this code host")]
    Unsupported(&'static str),
    #[error("{0}")]
    Api(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SourcerError {
    #[error("no credential available for repository {repo}")]
    MissingCredentials { repo: String },
    #[error("credential cannot push over ssh")]
    NoSshCredential,
    #[error("credential of type {credential_type} cannot push")]
    NoPushCredentials { credential_type: String },
    #[error("no signing app configured for this code host")]
    NoSigningAppConfigured,
    #[error("{0}")]
    Other(String),
}

/// Where and how to push a branch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushConfig {
    pub remote_url: String,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
}

/// A request to turn a patch into a commit on a branch and push it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRequest {
    pub repo: String,
    pub base_commit: String,
    pub patch: String,
    pub target_ref: String,
    pub unique_ref: bool,
    pub commit_message: String,
    pub author_name: String,
    pub author_email: String,
    pub push: Option<PushConfig>,
    /// Gerrit needs the change id in the commit trailer.
    pub gerrit_change_id: Option<String>,
}

impl CommitRequest {
    pub fn from_spec(target: &Repo, spec: &ChangesetSpec, push: PushConfig) -> Self {
        Self {
            repo: target.name.clone(),
            base_commit: spec.base_rev.clone(),
            patch: spec.diff.clone(),
            target_ref: ensure_ref_prefix(&spec.head_ref),
            unique_ref: false,
            commit_message: spec.commit_message.clone(),
            author_name: spec.commit_author.name.clone(),
            author_email: spec.commit_author.email.clone(),
            push: Some(push),
            gerrit_change_id: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitResponse {
    pub rev: String,
    /// Set by hosts that address changes by changelist (Perforce).
    pub changelist_id: Option<String>,
}

/// Failure reported by the commit service, with the output of the failing
/// git command.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error(
    "creating commit from patch for repository {repository_name:?}: {internal_error}\n```\n$ {command}\n{}\n```",
    .combined_output.trim()
)]
pub struct CommitError {
    pub repository_name: String,
    pub internal_error: String,
    pub command: String,
    pub combined_output: String,
}

impl CommitError {
    pub fn patch_does_not_apply(&self) -> bool {
        self.combined_output.contains("patch does not apply")
    }
}

/// A commit re-created through a signing app.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedCommit {
    pub sha: String,
    pub verified: bool,
}

/// The view of a changeset a source works on. Sources update `changeset`
/// in place (metadata, external id, branch).
#[derive(Clone, Debug)]
pub struct HostChangeset {
    pub title: String,
    pub body: String,
    pub base_ref: String,
    pub head_ref: String,
    pub remote_repo: Repo,
    pub target_repo: Repo,
    pub changeset: Changeset,
}

impl HostChangeset {
    /// A changeset view without desired attributes, for loads and closes.
    pub fn bare(changeset: Changeset, remote_repo: Repo, target_repo: Repo) -> Self {
        Self {
            title: String::new(),
            body: String::new(),
            base_ref: String::new(),
            head_ref: String::new(),
            remote_repo,
            target_repo,
            changeset,
        }
    }

    /// Stores freshly loaded host metadata on the changeset.
    pub fn set_metadata(&mut self, metadata: ChangesetMetadata) {
        self.changeset.external_id = metadata.external_id();
        if let Ok(head_ref) = metadata.head_ref() {
            self.changeset.external_branch = head_ref;
        }
        self.changeset.external_updated_at_ms = Some(metadata.updated_at_ms());
        self.changeset.metadata = Some(metadata);
    }

    /// Whether the host's title, body or base ref differ from the desired
    /// ones. A changeset without metadata is always outdated.
    pub fn is_outdated(&self) -> bool {
        match self.changeset.metadata.as_ref() {
            Some(metadata) => metadata.is_outdated(&self.title, &self.body, &self.base_ref),
            None => true,
        }
    }
}

/// One code host, authenticated for one changeset.
pub trait ChangesetSource {
    fn service_type(&self) -> ExternalServiceType;

    /// Opens the changeset. Returns `true` when it already existed.
    fn create_changeset(&self, cs: &mut HostChangeset) -> Result<bool, SourceError>;

    fn create_draft_changeset(&self, _cs: &mut HostChangeset) -> Result<bool, SourceError> {
        Err(SourceError::Unsupported("draft changesets"))
    }

    fn undraft_changeset(&self, _cs: &mut HostChangeset) -> Result<(), SourceError> {
        Err(SourceError::Unsupported("draft changesets"))
    }

    fn update_changeset(&self, cs: &mut HostChangeset) -> Result<(), SourceError>;
    fn reopen_changeset(&self, cs: &mut HostChangeset) -> Result<(), SourceError>;
    fn close_changeset(&self, cs: &mut HostChangeset) -> Result<(), SourceError>;
    fn load_changeset(&self, cs: &mut HostChangeset) -> Result<(), SourceError>;

    fn push_config(&self, remote: &Repo) -> Result<PushConfig, SourceError>;

    fn build_commit_request(
        &self,
        target: &Repo,
        _changeset: &Changeset,
        spec: &ChangesetSpec,
        push: PushConfig,
    ) -> CommitRequest {
        CommitRequest::from_spec(target, spec, push)
    }

    /// Recognises pushes rejected because the remote is archived.
    fn is_archived_push_error(&self, _combined_output: &str) -> bool {
        false
    }

    /// The repo to push to. Differs from `target` under fork workflows.
    fn remote_repo(&self, target: &Repo, _changeset: &Changeset) -> Result<Repo, SourceError> {
        Ok(target.clone())
    }

    /// Re-creates `rev` through the host API so it carries a signature.
    fn duplicate_commit(
        &self,
        _request: &CommitRequest,
        _remote: &Repo,
        _rev: &str,
    ) -> Result<SignedCommit, SourceError> {
        Err(SourceError::Unsupported("commit signing"))
    }
}

/// Builds authenticated sources.
pub trait Sourcer: Send + Sync {
    fn for_changeset(
        &self,
        changeset: &Changeset,
        repo: &Repo,
        strategy: AuthStrategy,
    ) -> Result<Box<dyn ChangesetSource>, SourcerError>;
}

/// Applies patches and pushes the resulting commits.
pub trait CommitCreator: Send + Sync {
    fn create_commit_from_patch(
        &self,
        request: &CommitRequest,
    ) -> Result<CommitResponse, CommitError>;
}

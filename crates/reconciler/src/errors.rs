#![forbid(unsafe_code)]

use crate::body::DecorateError;
use crate::sources::{CommitError, SourceError, SourcerError};
use bc_core::PlanError;
use bc_storage::StoreError;

/// Failure of the commit-signing step that runs after a push.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("no signing app configured to sign commit, rejecting unverified commit")]
    NoSigningApp,
    #[error("failed to get signing app for commit verification: {0}")]
    Sourcer(#[source] SourcerError),
    #[error("failed to duplicate commit: {0}")]
    Duplicate(#[source] SourceError),
    #[error("commit {sha} created with signing app was not signed, rejecting unverified commit")]
    Unverified { sha: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Another changeset already pushes to the same branch.
    #[error("cannot create changeset on the same branch in multiple batch changes")]
    PublishSameBranch,
    #[error("user does not have a valid credential for repository {repo:?}")]
    MissingCredentials { repo: String },
    #[error(
        "The used credential doesn't support SSH pushes, but the repo requires pushing over SSH."
    )]
    NoSshCredential,
    #[error("cannot use credentials of type {credential_type} to push commits")]
    NoPushCredentials { credential_type: String },
    #[error("cannot push to an archived repo")]
    PushToArchivedRepo,
    #[error("{0}")]
    PatchDoesNotApply(#[source] CommitError),
    #[error("{0}")]
    PushCommit(#[source] CommitError),
    #[error("failed to load repository {0}")]
    RepoNotFound(i64),
    #[error("operation {0} needs a changeset spec")]
    MissingSpec(bc_core::Operation),
    #[error("decorating body for changeset {changeset_id}: {source}")]
    Decorate {
        changeset_id: i64,
        #[source]
        source: DecorateError,
    },
    #[error("getting changeset source: {0}")]
    Sourcer(#[source] SourcerError),
    #[error("{context}: {source}")]
    Source {
        context: &'static str,
        #[source]
        source: SourceError,
    },
    #[error("running after commit routine: {0}")]
    AfterCommit(#[from] SigningError),
    #[error("planning: {0}")]
    Plan(#[from] PlanError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub(crate) fn host(context: &'static str, source: SourceError) -> Self {
        Self::Source { context, source }
    }

    /// Retrying the same reconciliation cannot fix these.
    pub fn is_non_retryable(&self) -> bool {
        matches!(
            self,
            Self::PublishSameBranch
                | Self::MissingCredentials { .. }
                | Self::NoSshCredential
                | Self::NoPushCredentials { .. }
                | Self::PushToArchivedRepo
                | Self::PatchDoesNotApply(_)
                | Self::Plan(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::PublishSameBranch => "PUBLISH_SAME_BRANCH",
            Self::MissingCredentials { .. } => "MISSING_CREDENTIALS",
            Self::NoSshCredential => "NO_SSH_CREDENTIAL",
            Self::NoPushCredentials { .. } => "NO_PUSH_CREDENTIALS",
            Self::PushToArchivedRepo => "ARCHIVED_REPO",
            Self::PatchDoesNotApply(_) => "PATCH_DOES_NOT_APPLY",
            Self::PushCommit(_) => "PUSH_COMMIT",
            Self::RepoNotFound(_) => "REPO_NOT_FOUND",
            Self::MissingSpec(_) => "MISSING_SPEC",
            Self::Decorate { .. } => "DECORATE_BODY",
            Self::Sourcer(_) => "SOURCER",
            Self::Source { .. } => "SOURCE",
            Self::AfterCommit(_) => "AFTER_COMMIT",
            Self::Plan(_) => "PLAN",
            Self::Store(_) => "STORE",
        }
    }
}

impl From<SourcerError> for ReconcileError {
    fn from(err: SourcerError) -> Self {
        match err {
            SourcerError::MissingCredentials { repo } => Self::MissingCredentials { repo },
            SourcerError::NoSshCredential => Self::NoSshCredential,
            SourcerError::NoPushCredentials { credential_type } => {
                Self::NoPushCredentials { credential_type }
            }
            other => Self::Sourcer(other),
        }
    }
}

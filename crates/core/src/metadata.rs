#![forbid(unsafe_code)]

//! Code-host specific changeset payloads.
//!
//! Each supported host has its own shape. Capabilities are answered per
//! variant; a host that has no notion of a capability answers with
//! [`Unsupported`] instead of an empty value.

use crate::changeset::{CheckState, ExternalState};
use crate::events::TimelineAction;
use crate::service::ExternalServiceType;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{capability} is not supported by {service}")]
pub struct Unsupported {
    pub capability: &'static str,
    pub service: ExternalServiceType,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// One entry of a host's activity timeline. `id` is the host's own stable
/// identifier and becomes the changeset event key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub id: String,
    pub action: TimelineAction,
    pub actor: String,
    pub at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub state: CheckState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GitHubPullRequestState {
    Open,
    Closed,
    Merged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubPullRequest {
    pub number: i64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub state: GitHubPullRequestState,
    #[serde(default)]
    pub is_draft: bool,
    pub head_ref_name: String,
    pub base_ref_name: String,
    pub head_ref_oid: String,
    pub author: Actor,
    #[serde(default)]
    pub timeline: Vec<TimelineItem>,
    #[serde(default)]
    pub checks: Vec<CheckRun>,
    pub updated_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitLabMergeRequestState {
    Opened,
    Closed,
    Locked,
    Merged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLabMergeRequest {
    pub iid: i64,
    pub title: String,
    pub description: String,
    pub web_url: String,
    pub state: GitLabMergeRequestState,
    #[serde(default)]
    pub work_in_progress: bool,
    pub source_branch: String,
    pub target_branch: String,
    pub diff_head_sha: String,
    pub author: Actor,
    #[serde(default)]
    pub timeline: Vec<TimelineItem>,
    #[serde(default)]
    pub pipelines: Vec<CheckRun>,
    pub updated_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BitbucketServerPullRequestState {
    Open,
    Declined,
    Merged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitbucketServerPullRequest {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub url: String,
    pub state: BitbucketServerPullRequestState,
    pub from_ref: String,
    pub to_ref: String,
    pub from_commit: String,
    pub author: Actor,
    #[serde(default)]
    pub timeline: Vec<TimelineItem>,
    #[serde(default)]
    pub build_statuses: Vec<CheckRun>,
    pub updated_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BitbucketCloudPullRequestState {
    Open,
    Declined,
    Superseded,
    Merged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitbucketCloudPullRequest {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub url: String,
    pub state: BitbucketCloudPullRequestState,
    pub source_branch: String,
    pub destination_branch: String,
    pub source_commit: String,
    pub author: Actor,
    #[serde(default)]
    pub timeline: Vec<TimelineItem>,
    #[serde(default)]
    pub statuses: Vec<CheckRun>,
    pub updated_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AzureDevOpsPullRequestStatus {
    Active,
    Abandoned,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureDevOpsPullRequest {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub url: String,
    pub status: AzureDevOpsPullRequestStatus,
    #[serde(default)]
    pub is_draft: bool,
    pub source_ref_name: String,
    pub target_ref_name: String,
    pub last_merge_source_commit: String,
    pub created_by: Actor,
    #[serde(default)]
    pub timeline: Vec<TimelineItem>,
    #[serde(default)]
    pub statuses: Vec<CheckRun>,
    pub updated_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GerritChangeStatus {
    New,
    Abandoned,
    Merged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GerritChange {
    pub change_id: String,
    pub number: i64,
    pub subject: String,
    /// Full commit message; Gerrit has no separate description.
    pub message: String,
    pub url: String,
    pub status: GerritChangeStatus,
    #[serde(default)]
    pub work_in_progress: bool,
    pub branch: String,
    pub owner: Actor,
    #[serde(default)]
    pub timeline: Vec<TimelineItem>,
    #[serde(default)]
    pub verified: Vec<CheckRun>,
    pub updated_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerforceChangelistState {
    Pending,
    Shelved,
    Submitted,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerforceChangelist {
    pub id: String,
    pub title: String,
    pub description: String,
    pub state: PerforceChangelistState,
    pub author: Actor,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "service")]
pub enum ChangesetMetadata {
    #[serde(rename = "github")]
    GitHub(GitHubPullRequest),
    #[serde(rename = "gitlab")]
    GitLab(GitLabMergeRequest),
    #[serde(rename = "bitbucketServer")]
    BitbucketServer(BitbucketServerPullRequest),
    #[serde(rename = "bitbucketCloud")]
    BitbucketCloud(BitbucketCloudPullRequest),
    #[serde(rename = "azuredevops")]
    AzureDevOps(AzureDevOpsPullRequest),
    #[serde(rename = "gerrit")]
    Gerrit(GerritChange),
    #[serde(rename = "perforce")]
    Perforce(PerforceChangelist),
}

impl ChangesetMetadata {
    pub fn service_type(&self) -> ExternalServiceType {
        match self {
            Self::GitHub(_) => ExternalServiceType::GitHub,
            Self::GitLab(_) => ExternalServiceType::GitLab,
            Self::BitbucketServer(_) => ExternalServiceType::BitbucketServer,
            Self::BitbucketCloud(_) => ExternalServiceType::BitbucketCloud,
            Self::AzureDevOps(_) => ExternalServiceType::AzureDevOps,
            Self::Gerrit(_) => ExternalServiceType::Gerrit,
            Self::Perforce(_) => ExternalServiceType::Perforce,
        }
    }

    /// The host's identifier for the changeset (PR number, change id, ...).
    pub fn external_id(&self) -> String {
        match self {
            Self::GitHub(pr) => pr.number.to_string(),
            Self::GitLab(mr) => mr.iid.to_string(),
            Self::BitbucketServer(pr) => pr.id.to_string(),
            Self::BitbucketCloud(pr) => pr.id.to_string(),
            Self::AzureDevOps(pr) => pr.id.to_string(),
            Self::Gerrit(change) => change.change_id.clone(),
            Self::Perforce(cl) => cl.id.clone(),
        }
    }

    fn unsupported(&self, capability: &'static str) -> Unsupported {
        Unsupported {
            capability,
            service: self.service_type(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::GitHub(pr) => &pr.title,
            Self::GitLab(mr) => &mr.title,
            Self::BitbucketServer(pr) => &pr.title,
            Self::BitbucketCloud(pr) => &pr.title,
            Self::AzureDevOps(pr) => &pr.title,
            Self::Gerrit(change) => &change.subject,
            Self::Perforce(cl) => &cl.title,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Self::GitHub(pr) => &pr.body,
            Self::GitLab(mr) => &mr.description,
            Self::BitbucketServer(pr) => &pr.description,
            Self::BitbucketCloud(pr) => &pr.description,
            Self::AzureDevOps(pr) => &pr.description,
            Self::Gerrit(change) => &change.message,
            Self::Perforce(cl) => &cl.description,
        }
    }

    pub fn url(&self) -> Result<&str, Unsupported> {
        match self {
            Self::GitHub(pr) => Ok(&pr.url),
            Self::GitLab(mr) => Ok(&mr.web_url),
            Self::BitbucketServer(pr) => Ok(&pr.url),
            Self::BitbucketCloud(pr) => Ok(&pr.url),
            Self::AzureDevOps(pr) => Ok(&pr.url),
            Self::Gerrit(change) => Ok(&change.url),
            Self::Perforce(_) => Err(self.unsupported("url")),
        }
    }

    pub fn head_ref(&self) -> Result<String, Unsupported> {
        match self {
            Self::GitHub(pr) => Ok(ensure_ref_prefix(&pr.head_ref_name)),
            Self::GitLab(mr) => Ok(ensure_ref_prefix(&mr.source_branch)),
            Self::BitbucketServer(pr) => Ok(ensure_ref_prefix(&pr.from_ref)),
            Self::BitbucketCloud(pr) => Ok(ensure_ref_prefix(&pr.source_branch)),
            Self::AzureDevOps(pr) => Ok(ensure_ref_prefix(&pr.source_ref_name)),
            Self::Gerrit(_) | Self::Perforce(_) => Err(self.unsupported("head ref")),
        }
    }

    pub fn base_ref(&self) -> Result<String, Unsupported> {
        match self {
            Self::GitHub(pr) => Ok(ensure_ref_prefix(&pr.base_ref_name)),
            Self::GitLab(mr) => Ok(ensure_ref_prefix(&mr.target_branch)),
            Self::BitbucketServer(pr) => Ok(ensure_ref_prefix(&pr.to_ref)),
            Self::BitbucketCloud(pr) => Ok(ensure_ref_prefix(&pr.destination_branch)),
            Self::AzureDevOps(pr) => Ok(ensure_ref_prefix(&pr.target_ref_name)),
            Self::Gerrit(change) => Ok(ensure_ref_prefix(&change.branch)),
            Self::Perforce(_) => Err(self.unsupported("base ref")),
        }
    }

    pub fn head_ref_oid(&self) -> Result<&str, Unsupported> {
        match self {
            Self::GitHub(pr) => Ok(&pr.head_ref_oid),
            Self::GitLab(mr) => Ok(&mr.diff_head_sha),
            Self::BitbucketServer(pr) => Ok(&pr.from_commit),
            Self::BitbucketCloud(pr) => Ok(&pr.source_commit),
            Self::AzureDevOps(pr) => Ok(&pr.last_merge_source_commit),
            Self::Gerrit(_) | Self::Perforce(_) => Err(self.unsupported("head ref oid")),
        }
    }

    fn author(&self) -> &Actor {
        match self {
            Self::GitHub(pr) => &pr.author,
            Self::GitLab(mr) => &mr.author,
            Self::BitbucketServer(pr) => &pr.author,
            Self::BitbucketCloud(pr) => &pr.author,
            Self::AzureDevOps(pr) => &pr.created_by,
            Self::Gerrit(change) => &change.owner,
            Self::Perforce(cl) => &cl.author,
        }
    }

    pub fn author_name(&self) -> &str {
        let author = self.author();
        author.name.as_deref().unwrap_or(&author.login)
    }

    pub fn author_email(&self) -> Option<&str> {
        self.author().email.as_deref()
    }

    pub fn updated_at_ms(&self) -> i64 {
        match self {
            Self::GitHub(pr) => pr.updated_at_ms,
            Self::GitLab(mr) => mr.updated_at_ms,
            Self::BitbucketServer(pr) => pr.updated_at_ms,
            Self::BitbucketCloud(pr) => pr.updated_at_ms,
            Self::AzureDevOps(pr) => pr.updated_at_ms,
            Self::Gerrit(change) => change.updated_at_ms,
            Self::Perforce(cl) => cl.updated_at_ms,
        }
    }

    /// The state the host reports right now, ignoring the timeline.
    pub fn external_state(&self) -> ExternalState {
        match self {
            Self::GitHub(pr) => match pr.state {
                GitHubPullRequestState::Open if pr.is_draft => ExternalState::Draft,
                GitHubPullRequestState::Open => ExternalState::Open,
                GitHubPullRequestState::Closed => ExternalState::Closed,
                GitHubPullRequestState::Merged => ExternalState::Merged,
            },
            Self::GitLab(mr) => match mr.state {
                GitLabMergeRequestState::Opened if mr.work_in_progress => ExternalState::Draft,
                GitLabMergeRequestState::Opened => ExternalState::Open,
                GitLabMergeRequestState::Closed | GitLabMergeRequestState::Locked => {
                    ExternalState::Closed
                }
                GitLabMergeRequestState::Merged => ExternalState::Merged,
            },
            Self::BitbucketServer(pr) => match pr.state {
                BitbucketServerPullRequestState::Open => ExternalState::Open,
                BitbucketServerPullRequestState::Declined => ExternalState::Closed,
                BitbucketServerPullRequestState::Merged => ExternalState::Merged,
            },
            Self::BitbucketCloud(pr) => match pr.state {
                BitbucketCloudPullRequestState::Open => ExternalState::Open,
                BitbucketCloudPullRequestState::Declined
                | BitbucketCloudPullRequestState::Superseded => ExternalState::Closed,
                BitbucketCloudPullRequestState::Merged => ExternalState::Merged,
            },
            Self::AzureDevOps(pr) => match pr.status {
                AzureDevOpsPullRequestStatus::Active if pr.is_draft => ExternalState::Draft,
                AzureDevOpsPullRequestStatus::Active => ExternalState::Open,
                AzureDevOpsPullRequestStatus::Abandoned => ExternalState::Closed,
                AzureDevOpsPullRequestStatus::Completed => ExternalState::Merged,
            },
            Self::Gerrit(change) => match change.status {
                GerritChangeStatus::New if change.work_in_progress => ExternalState::Draft,
                GerritChangeStatus::New => ExternalState::Open,
                GerritChangeStatus::Abandoned => ExternalState::Closed,
                GerritChangeStatus::Merged => ExternalState::Merged,
            },
            Self::Perforce(cl) => match cl.state {
                PerforceChangelistState::Pending | PerforceChangelistState::Shelved => {
                    ExternalState::Open
                }
                PerforceChangelistState::Submitted => ExternalState::Merged,
                PerforceChangelistState::Closed => ExternalState::Closed,
            },
        }
    }

    pub fn timeline(&self) -> Result<&[TimelineItem], Unsupported> {
        match self {
            Self::GitHub(pr) => Ok(&pr.timeline),
            Self::GitLab(mr) => Ok(&mr.timeline),
            Self::BitbucketServer(pr) => Ok(&pr.timeline),
            Self::BitbucketCloud(pr) => Ok(&pr.timeline),
            Self::AzureDevOps(pr) => Ok(&pr.timeline),
            Self::Gerrit(change) => Ok(&change.timeline),
            Self::Perforce(_) => Err(self.unsupported("timeline")),
        }
    }

    pub fn checks(&self) -> Result<&[CheckRun], Unsupported> {
        match self {
            Self::GitHub(pr) => Ok(&pr.checks),
            Self::GitLab(mr) => Ok(&mr.pipelines),
            Self::BitbucketServer(pr) => Ok(&pr.build_statuses),
            Self::BitbucketCloud(pr) => Ok(&pr.statuses),
            Self::AzureDevOps(pr) => Ok(&pr.statuses),
            Self::Gerrit(change) => Ok(&change.verified),
            Self::Perforce(_) => Err(self.unsupported("checks")),
        }
    }

    /// Reviews only exist on hosts with a review workflow.
    pub fn supports_reviews(&self) -> bool {
        !matches!(self, Self::Perforce(_))
    }

    /// True when the title, body or base ref on the host differ from the
    /// desired values.
    pub fn is_outdated(&self, title: &str, body: &str, base_ref: &str) -> bool {
        if self.title() != title || self.body() != body {
            return true;
        }
        match self.base_ref() {
            Ok(current) => current != ensure_ref_prefix(base_ref),
            Err(_) => false,
        }
    }
}

/// Normalises a branch name to a fully-qualified `refs/heads/` ref.
pub fn ensure_ref_prefix(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("refs/heads/{name}")
    }
}

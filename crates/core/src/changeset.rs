#![forbid(unsafe_code)]

use crate::metadata::ChangesetMetadata;
use crate::service::ExternalServiceType;
use serde::{Deserialize, Serialize};

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value.trim().to_ascii_uppercase().as_str() {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalState {
    Draft,
    Open,
    Closed,
    Merged,
    Deleted,
    ReadOnly,
}

text_enum!(ExternalState {
    Draft => "DRAFT",
    Open => "OPEN",
    Closed => "CLOSED",
    Merged => "MERGED",
    Deleted => "DELETED",
    ReadOnly => "READONLY",
});

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationState {
    #[default]
    Unpublished,
    Published,
}

text_enum!(PublicationState {
    Unpublished => "UNPUBLISHED",
    Published => "PUBLISHED",
});

/// Publication override set from the UI. Only consulted when the spec leaves
/// `published` unset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UiPublicationState {
    Unpublished,
    Draft,
    Published,
}

text_enum!(UiPublicationState {
    Unpublished => "UNPUBLISHED",
    Draft => "DRAFT",
    Published => "PUBLISHED",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Pending,
    Commented,
    Dismissed,
}

text_enum!(ReviewState {
    Approved => "APPROVED",
    ChangesRequested => "CHANGES_REQUESTED",
    Pending => "PENDING",
    Commented => "COMMENTED",
    Dismissed => "DISMISSED",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckState {
    Unknown,
    Pending,
    Passed,
    Failed,
}

text_enum!(CheckState {
    Unknown => "UNKNOWN",
    Pending => "PENDING",
    Passed => "PASSED",
    Failed => "FAILED",
});

/// Work-queue state of a changeset row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcilerState {
    Scheduled,
    #[default]
    Queued,
    Processing,
    Errored,
    Failed,
    Completed,
}

text_enum!(ReconcilerState {
    Scheduled => "SCHEDULED",
    Queued => "QUEUED",
    Processing => "PROCESSING",
    Errored => "ERRORED",
    Failed => "FAILED",
    Completed => "COMPLETED",
});

/// Display state shown to users, computed from the other state columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangesetState {
    Unpublished,
    Scheduled,
    Processing,
    Open,
    Draft,
    Closed,
    Merged,
    Deleted,
    ReadOnly,
    Retrying,
    Failed,
}

text_enum!(ChangesetState {
    Unpublished => "UNPUBLISHED",
    Scheduled => "SCHEDULED",
    Processing => "PROCESSING",
    Open => "OPEN",
    Draft => "DRAFT",
    Closed => "CLOSED",
    Merged => "MERGED",
    Deleted => "DELETED",
    ReadOnly => "READONLY",
    Retrying => "RETRYING",
    Failed => "FAILED",
});

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchChangeAssoc {
    pub batch_change_id: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub detach: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub archive: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_archived: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl BatchChangeAssoc {
    pub fn new(batch_change_id: i64) -> Self {
        Self {
            batch_change_id,
            ..Self::default()
        }
    }
}

/// One code change on one repository's code host, tracked by one or more
/// batch changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub id: i64,
    pub repo_id: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub metadata: Option<ChangesetMetadata>,
    pub batch_changes: Vec<BatchChangeAssoc>,
    pub external_id: String,
    pub external_service_type: ExternalServiceType,
    pub external_branch: String,
    pub external_fork_namespace: Option<String>,
    pub external_deleted_at_ms: Option<i64>,
    pub external_updated_at_ms: Option<i64>,
    pub external_state: Option<ExternalState>,
    pub external_review_state: Option<ReviewState>,
    pub external_check_state: Option<CheckState>,
    pub commit_verified_sha: Option<String>,
    /// The batch change that may push, publish and close this changeset.
    /// `None` means the changeset is only imported and tracked.
    pub owned_by_batch_change_id: Option<i64>,
    pub current_spec_id: Option<i64>,
    pub previous_spec_id: Option<i64>,
    pub publication_state: PublicationState,
    pub ui_publication_state: Option<UiPublicationState>,
    pub reconciler_state: ReconcilerState,
    pub failure_message: Option<String>,
    pub previous_failure_message: Option<String>,
    pub sync_error_message: Option<String>,
    pub num_failures: i64,
    pub num_resets: i64,
    /// Sticky close intent, cleared by the CLOSE operation.
    pub closing: bool,
    pub detached_at_ms: Option<i64>,
}

impl Changeset {
    pub fn new(repo_id: i64, external_service_type: ExternalServiceType) -> Self {
        Self {
            id: 0,
            repo_id,
            created_at_ms: 0,
            updated_at_ms: 0,
            metadata: None,
            batch_changes: Vec::new(),
            external_id: String::new(),
            external_service_type,
            external_branch: String::new(),
            external_fork_namespace: None,
            external_deleted_at_ms: None,
            external_updated_at_ms: None,
            external_state: None,
            external_review_state: None,
            external_check_state: None,
            commit_verified_sha: None,
            owned_by_batch_change_id: None,
            current_spec_id: None,
            previous_spec_id: None,
            publication_state: PublicationState::Unpublished,
            ui_publication_state: None,
            reconciler_state: ReconcilerState::Queued,
            failure_message: None,
            previous_failure_message: None,
            sync_error_message: None,
            num_failures: 0,
            num_resets: 0,
            closing: false,
            detached_at_ms: None,
        }
    }

    pub fn published(&self) -> bool {
        self.publication_state == PublicationState::Published
    }

    pub fn unpublished(&self) -> bool {
        self.publication_state == PublicationState::Unpublished
    }

    pub fn is_imported(&self) -> bool {
        self.owned_by_batch_change_id.is_none()
    }

    pub fn supports_draft(&self) -> bool {
        self.external_service_type.supports_draft()
    }

    /// Only changesets that are open or draft on the host can be closed.
    pub fn closeable(&self) -> bool {
        matches!(
            self.external_state,
            Some(ExternalState::Open | ExternalState::Draft)
        )
    }

    pub fn set_deleted(&mut self, now_ms: i64) {
        self.external_deleted_at_ms = Some(now_ms);
    }

    pub fn is_deleted(&self) -> bool {
        self.external_deleted_at_ms.is_some()
    }

    pub fn attached_to(&self, batch_change_id: i64) -> bool {
        self.batch_changes
            .iter()
            .any(|assoc| assoc.batch_change_id == batch_change_id)
    }

    /// Marks the batch change as to-be-detached. Returns false if it was not
    /// attached.
    pub fn detach(&mut self, batch_change_id: i64) -> bool {
        match self
            .batch_changes
            .iter_mut()
            .find(|assoc| assoc.batch_change_id == batch_change_id)
        {
            Some(assoc) => {
                assoc.detach = true;
                true
            }
            None => false,
        }
    }

    /// Marks the batch change as to-be-archived. Returns false if it was not
    /// attached or is already archived.
    pub fn archive(&mut self, batch_change_id: i64) -> bool {
        match self
            .batch_changes
            .iter_mut()
            .find(|assoc| assoc.batch_change_id == batch_change_id && !assoc.is_archived)
        {
            Some(assoc) => {
                assoc.archive = true;
                true
            }
            None => false,
        }
    }

    pub fn archived_in(&self, batch_change_id: i64) -> bool {
        self.batch_changes
            .iter()
            .any(|assoc| assoc.batch_change_id == batch_change_id && assoc.is_archived)
    }

    pub fn remove_batch_change(&mut self, batch_change_id: i64) {
        self.batch_changes
            .retain(|assoc| assoc.batch_change_id != batch_change_id);
    }

    pub fn state(&self) -> ChangesetState {
        match self.reconciler_state {
            ReconcilerState::Errored => return ChangesetState::Retrying,
            ReconcilerState::Failed => return ChangesetState::Failed,
            ReconcilerState::Scheduled => return ChangesetState::Scheduled,
            ReconcilerState::Queued | ReconcilerState::Processing
                if self.unpublished() && self.current_spec_id.is_some() =>
            {
                return ChangesetState::Processing;
            }
            ReconcilerState::Queued
            | ReconcilerState::Processing
            | ReconcilerState::Completed => {}
        }

        if self.unpublished() {
            return ChangesetState::Unpublished;
        }

        match self.external_state {
            Some(ExternalState::Draft) => ChangesetState::Draft,
            Some(ExternalState::Open) | None => ChangesetState::Open,
            Some(ExternalState::Closed) => ChangesetState::Closed,
            Some(ExternalState::Merged) => ChangesetState::Merged,
            Some(ExternalState::Deleted) => ChangesetState::Deleted,
            Some(ExternalState::ReadOnly) => ChangesetState::ReadOnly,
        }
    }
}

#![forbid(unsafe_code)]

use crate::changeset::{Changeset, ReviewState};
use crate::metadata::TimelineItem;
use crate::service::ExternalServiceType;
use serde::{Deserialize, Serialize};

/// What happened on the host, independent of which host reported it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineAction {
    Reviewed { state: ReviewState },
    ReviewDismissed,
    Commented,
    Closed,
    Reopened,
    Merged,
    ConvertedToDraft,
    ReadyForReview,
}

impl TimelineAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reviewed { .. } => "reviewed",
            Self::ReviewDismissed => "review_dismissed",
            Self::Commented => "commented",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::Merged => "merged",
            Self::ConvertedToDraft => "converted_to_draft",
            Self::ReadyForReview => "ready_for_review",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChangesetEventKind {
    pub service: ExternalServiceType,
    pub action: &'static str,
}

impl ChangesetEventKind {
    pub fn new(service: ExternalServiceType, action: TimelineAction) -> Self {
        Self {
            service,
            action: action.as_str(),
        }
    }

    /// Stable storage form, e.g. `github:reviewed`.
    pub fn to_key_string(self) -> String {
        format!("{}:{}", self.service.as_str(), self.action)
    }
}

/// A persisted timeline entry. Rows are unique per `(changeset_id, kind, key)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangesetEvent {
    pub changeset_id: i64,
    pub kind: String,
    pub key: String,
    pub created_at_ms: i64,
    pub item: TimelineItem,
}

impl ChangesetEvent {
    pub fn from_item(changeset_id: i64, service: ExternalServiceType, item: &TimelineItem) -> Self {
        Self {
            changeset_id,
            kind: ChangesetEventKind::new(service, item.action).to_key_string(),
            key: item.id.clone(),
            created_at_ms: item.at_ms,
            item: item.clone(),
        }
    }
}

/// Events reported by the changeset's metadata. Hosts without a timeline
/// and changesets that were never synced yield no events.
pub fn changeset_events(changeset: &Changeset) -> Vec<ChangesetEvent> {
    let Some(metadata) = changeset.metadata.as_ref() else {
        return Vec::new();
    };
    let Ok(timeline) = metadata.timeline() else {
        return Vec::new();
    };

    let service = metadata.service_type();
    let mut events = timeline
        .iter()
        .map(|item| ChangesetEvent::from_item(changeset.id, service, item))
        .collect::<Vec<_>>();
    events.sort_by(|a, b| {
        a.created_at_ms
            .cmp(&b.created_at_ms)
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| a.key.cmp(&b.key))
    });
    events.dedup_by(|a, b| a.kind == b.kind && a.key == b.key);
    events
}

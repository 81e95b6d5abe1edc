#![forbid(unsafe_code)]

use bc_core::{ExternalServiceType, NamespaceKind, ReconcilerState};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRepo {
    pub name: String,
    pub external_service_type: ExternalServiceType,
    pub clone_url: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBatchChange {
    pub name: String,
    pub namespace_name: String,
    pub namespace_kind: NamespaceKind,
    pub created_at_ms: i64,
}

/// Looks up the changeset pushed to a given branch of a given repo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetChangesetOpts {
    pub external_service_type: ExternalServiceType,
    pub repo_id: i64,
    pub external_branch: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewWebhookJob {
    pub event_type: String,
    pub changeset_id: i64,
    pub payload_json: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookJobRow {
    pub id: i64,
    pub event_type: String,
    pub changeset_id: i64,
    pub payload_json: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DequeueRequest {
    pub worker_id: String,
    pub now_ms: i64,
    pub lease_ttl_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkErroredRequest {
    pub changeset_id: i64,
    pub worker_id: String,
    pub failure_message: String,
    pub now_ms: i64,
    /// Once `num_failures` reaches this, the changeset is `FAILED`.
    pub max_num_retries: i64,
    /// Delay before an errored changeset may be dequeued again.
    pub retry_after_ms: u64,
    /// Retrying cannot fix the failure. Stored for whoever decides on
    /// re-enqueueing; the retry accounting above ignores it.
    pub non_retryable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResetStalledResult {
    pub requeued: Vec<i64>,
    pub failed: Vec<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub scheduled: i64,
    pub queued: i64,
    pub processing: i64,
    pub errored: i64,
    pub failed: i64,
    pub completed: i64,
}

impl QueueCounts {
    pub(super) fn add(&mut self, state: ReconcilerState, count: i64) {
        let slot = match state {
            ReconcilerState::Scheduled => &mut self.scheduled,
            ReconcilerState::Queued => &mut self.queued,
            ReconcilerState::Processing => &mut self.processing,
            ReconcilerState::Errored => &mut self.errored,
            ReconcilerState::Failed => &mut self.failed,
            ReconcilerState::Completed => &mut self.completed,
        };
        *slot += count;
    }

    pub fn total(&self) -> i64 {
        self.scheduled + self.queued + self.processing + self.errored + self.failed + self.completed
    }
}

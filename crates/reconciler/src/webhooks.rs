#![forbid(unsafe_code)]

use bc_storage::{NewWebhookJob, Store};
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WebhookEvent {
    Publish,
    Update,
    UpdateError,
    Close,
}

impl WebhookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "changeset:publish",
            Self::Update => "changeset:update",
            Self::UpdateError => "changeset:update_error",
            Self::Close => "changeset:close",
        }
    }
}

impl std::fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A webhook to enqueue once the reconciliation's transaction is resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingWebhook {
    pub event: WebhookEvent,
    pub changeset_id: i64,
}

impl PendingWebhook {
    pub fn new(event: WebhookEvent, changeset_id: i64) -> Self {
        Self {
            event,
            changeset_id,
        }
    }

    /// Enqueues the webhook. Failures are logged, never returned: the code
    /// host interaction the webhook reports already happened.
    pub fn fire(self, store: &dyn Store, now_ms: i64) {
        let payload = json!({
            "event": self.event.as_str(),
            "changeset_id": self.changeset_id,
            "enqueued_at": ts_ms_to_rfc3339(now_ms),
        });
        let job = NewWebhookJob {
            event_type: self.event.as_str().to_string(),
            changeset_id: self.changeset_id,
            payload_json: payload.to_string(),
            created_at_ms: now_ms,
        };
        if let Err(err) = store.enqueue_webhook(&job) {
            warn!(
                changeset_id = self.changeset_id,
                event = %self.event,
                error = %err,
                "failed to enqueue webhook"
            );
        }
    }
}

fn ts_ms_to_rfc3339(ts_ms: i64) -> String {
    let nanos = (ts_ms as i128) * 1_000_000i128;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_rendering_is_utc() {
        assert_eq!(ts_ms_to_rfc3339(0), "1970-01-01T00:00:00Z");
        assert_eq!(ts_ms_to_rfc3339(86_400_000), "1970-01-02T00:00:00Z");
    }
}

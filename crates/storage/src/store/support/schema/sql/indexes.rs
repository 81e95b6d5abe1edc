#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE INDEX IF NOT EXISTS idx_changesets_queue ON changesets(reconciler_state, process_after_ms, id);
        CREATE INDEX IF NOT EXISTS idx_changesets_branch ON changesets(external_service_type, repo_id, external_branch);
        CREATE INDEX IF NOT EXISTS idx_changeset_events_changeset ON changeset_events(changeset_id, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_webhook_jobs_changeset ON webhook_jobs(changeset_id, id);
"#;

#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS changesets (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          repo_id INTEGER NOT NULL REFERENCES repos(id),
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          metadata_json TEXT,
          batch_changes_json TEXT NOT NULL DEFAULT '[]',
          external_id TEXT NOT NULL DEFAULT '',
          external_service_type TEXT NOT NULL,
          external_branch TEXT NOT NULL DEFAULT '',
          external_fork_namespace TEXT,
          external_deleted_at_ms INTEGER,
          external_updated_at_ms INTEGER,
          external_state TEXT,
          external_review_state TEXT,
          external_check_state TEXT,
          commit_verified_sha TEXT,
          owned_by_batch_change_id INTEGER REFERENCES batch_changes(id),
          current_spec_id INTEGER REFERENCES changeset_specs(id),
          previous_spec_id INTEGER REFERENCES changeset_specs(id),
          publication_state TEXT NOT NULL,
          ui_publication_state TEXT,
          closing INTEGER NOT NULL DEFAULT 0,
          detached_at_ms INTEGER,
          failure_message TEXT,
          previous_failure_message TEXT,
          sync_error_message TEXT,

          -- Work-queue columns. Owned by the queue operations only.
          reconciler_state TEXT NOT NULL DEFAULT 'QUEUED',
          num_failures INTEGER NOT NULL DEFAULT 0,
          num_resets INTEGER NOT NULL DEFAULT 0,
          non_retryable INTEGER NOT NULL DEFAULT 0,
          worker_id TEXT,
          claim_expires_at_ms INTEGER,
          process_after_ms INTEGER,
          started_at_ms INTEGER,
          finished_at_ms INTEGER
        );

        CREATE TABLE IF NOT EXISTS changeset_events (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          changeset_id INTEGER NOT NULL REFERENCES changesets(id) ON DELETE CASCADE,
          kind TEXT NOT NULL,
          key TEXT NOT NULL,
          item_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          UNIQUE(changeset_id, kind, key)
        );
"#;

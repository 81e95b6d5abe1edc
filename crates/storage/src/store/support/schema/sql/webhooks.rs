#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS webhook_jobs (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          event_type TEXT NOT NULL,
          changeset_id INTEGER NOT NULL,
          payload_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL
        );
"#;

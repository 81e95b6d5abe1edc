#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS repos (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL UNIQUE,
          external_service_type TEXT NOT NULL,
          clone_url TEXT NOT NULL,
          archived INTEGER NOT NULL DEFAULT 0,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS batch_changes (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL,
          namespace_name TEXT NOT NULL,
          namespace_kind TEXT NOT NULL,
          closed_at_ms INTEGER,
          created_at_ms INTEGER NOT NULL,
          UNIQUE(namespace_kind, namespace_name, name)
        );

        -- Specs are immutable; a new version is a new row.
        CREATE TABLE IF NOT EXISTS changeset_specs (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          repo_id INTEGER NOT NULL REFERENCES repos(id),
          title TEXT NOT NULL,
          body TEXT NOT NULL,
          base_ref TEXT NOT NULL,
          base_rev TEXT NOT NULL,
          head_ref TEXT NOT NULL,
          diff TEXT NOT NULL,
          commit_message TEXT NOT NULL,
          commit_author_name TEXT NOT NULL,
          commit_author_email TEXT NOT NULL,
          published TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL
        );
"#;

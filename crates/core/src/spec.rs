#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// The `published` field of a changeset spec.
///
/// `Unset` defers to the UI publication state of the changeset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishedValue {
    #[default]
    Unset,
    Bool(bool),
    Draft,
}

impl PublishedValue {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Bool(true) => "true",
            Self::Bool(false) => "false",
            Self::Draft => "draft",
        }
    }

    pub fn parse(value: Option<&str>) -> Option<Self> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Some(Self::Unset);
        };
        match raw.to_ascii_lowercase().as_str() {
            "unset" | "null" => Some(Self::Unset),
            "true" => Some(Self::Bool(true)),
            "false" => Some(Self::Bool(false)),
            "draft" => Some(Self::Draft),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

/// Immutable desired state for one changeset. Specs are never updated in
/// place; applying a new spec produces a new row with a new id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetSpec {
    pub id: i64,
    pub repo_id: i64,
    pub title: String,
    pub body: String,
    pub base_ref: String,
    pub base_rev: String,
    pub head_ref: String,
    pub diff: String,
    pub commit_message: String,
    pub commit_author: CommitAuthor,
    pub published: PublishedValue,
    pub created_at_ms: i64,
}

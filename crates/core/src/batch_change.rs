#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    User,
    Organization,
}

impl NamespaceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Organization => "organization",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "organization" | "org" => Some(Self::Organization),
            _ => None,
        }
    }

    fn url_segment(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Organization => "organizations",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchChange {
    pub id: i64,
    pub name: String,
    pub namespace_name: String,
    pub namespace_kind: NamespaceKind,
    pub closed_at_ms: Option<i64>,
    pub created_at_ms: i64,
}

impl BatchChange {
    /// Absolute link to the batch change page under `external_url`.
    pub fn url(&self, external_url: &str) -> String {
        format!(
            "{}/{}/{}/batch-changes/{}",
            external_url.trim_end_matches('/'),
            self.namespace_kind.url_segment(),
            self.namespace_name,
            self.name
        )
    }

    pub fn closed(&self) -> bool {
        self.closed_at_ms.is_some()
    }
}

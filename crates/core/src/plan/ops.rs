#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Push,
    Publish,
    PublishDraft,
    Update,
    Undraft,
    Reopen,
    Close,
    Sync,
    Import,
    Sleep,
    Detach,
    Archive,
    Reattach,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "PUSH",
            Self::Publish => "PUBLISH",
            Self::PublishDraft => "PUBLISH_DRAFT",
            Self::Update => "UPDATE",
            Self::Undraft => "UNDRAFT",
            Self::Reopen => "REOPEN",
            Self::Close => "CLOSE",
            Self::Sync => "SYNC",
            Self::Import => "IMPORT",
            Self::Sleep => "SLEEP",
            Self::Detach => "DETACH",
            Self::Archive => "ARCHIVE",
            Self::Reattach => "REATTACH",
        }
    }

    /// Lower runs first. Operations sharing a rank keep insertion order.
    fn precedence(self) -> u8 {
        match self {
            Self::Push | Self::Detach | Self::Archive | Self::Reattach => 0,
            Self::Import | Self::Publish | Self::PublishDraft | Self::Close => 1,
            Self::Reopen => 2,
            Self::Undraft => 3,
            Self::Update => 4,
            Self::Sleep => 5,
            Self::Sync => 6,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operations of a plan in the order they were planned. Use
/// [`Operations::execution_order`] to get them in the order they must run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Operations(Vec<Operation>);

impl Operations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Operation) {
        self.0.push(op);
    }

    pub fn contains(&self, op: Operation) -> bool {
        self.0.contains(&op)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Distinct operations sorted by precedence.
    pub fn execution_order(&self) -> Vec<Operation> {
        let mut ops = Vec::with_capacity(self.0.len());
        for op in &self.0 {
            if !ops.contains(op) {
                ops.push(*op);
            }
        }
        ops.sort_by_key(|op| op.precedence());
        ops
    }
}

impl FromIterator<Operation> for Operations {
    fn from_iter<T: IntoIterator<Item = Operation>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

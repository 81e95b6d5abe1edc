#![forbid(unsafe_code)]

use crate::changeset::UiPublicationState;
use crate::spec::{ChangesetSpec, PublishedValue};
use serde::{Deserialize, Serialize};

/// Field-level difference between the spec reflected on the code host and
/// the newly applied one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub title_changed: bool,
    pub body_changed: bool,
    pub undraft: bool,
    pub base_ref_changed: bool,
    pub diff_changed: bool,
    pub commit_message_changed: bool,
    pub author_name_changed: bool,
    pub author_email_changed: bool,
}

impl Delta {
    /// A new commit has to be pushed.
    pub fn need_commit_update(&self) -> bool {
        self.diff_changed
            || self.commit_message_changed
            || self.author_name_changed
            || self.author_email_changed
    }

    /// The changeset has to be updated through the code host API.
    pub fn need_code_host_update(&self) -> bool {
        self.title_changed || self.body_changed || self.base_ref_changed
    }

    pub fn attributes_changed(&self) -> bool {
        self.need_commit_update() || self.need_code_host_update()
    }
}

/// Resolves what the changeset should look like on the code host. The UI
/// override only applies when the spec leaves `published` unset.
pub fn effective_publication_state(
    spec_published: PublishedValue,
    ui: Option<UiPublicationState>,
) -> UiPublicationState {
    match spec_published {
        PublishedValue::Bool(true) => UiPublicationState::Published,
        PublishedValue::Draft => UiPublicationState::Draft,
        PublishedValue::Unset => ui.unwrap_or(UiPublicationState::Unpublished),
        PublishedValue::Bool(false) => UiPublicationState::Unpublished,
    }
}

/// Without a previous spec nothing is reported as changed.
pub fn compare_specs(
    previous: Option<&ChangesetSpec>,
    current: &ChangesetSpec,
    ui: Option<UiPublicationState>,
) -> Delta {
    let Some(previous) = previous else {
        return Delta::default();
    };

    Delta {
        title_changed: previous.title != current.title,
        body_changed: previous.body != current.body,
        undraft: effective_publication_state(previous.published, None) == UiPublicationState::Draft
            && effective_publication_state(current.published, ui) == UiPublicationState::Published,
        base_ref_changed: previous.base_ref != current.base_ref,
        diff_changed: previous.diff != current.diff,
        commit_message_changed: previous.commit_message != current.commit_message,
        author_name_changed: previous.commit_author.name != current.commit_author.name,
        author_email_changed: previous.commit_author.email != current.commit_author.email,
    }
}

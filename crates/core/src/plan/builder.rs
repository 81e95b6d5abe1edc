#![forbid(unsafe_code)]

use super::delta::{Delta, compare_specs, effective_publication_state};
use super::ops::{Operation, Operations};
use crate::changeset::{Changeset, ExternalState, PublicationState, UiPublicationState};
use crate::spec::ChangesetSpec;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("changeset {changeset_id} is not owned by a batch change but has a spec")]
    SpecOnImportedChangeset { changeset_id: i64 },
    #[error("spec {spec_id} targets repo {spec_repo_id}, changeset {changeset_id} targets repo {repo_id}")]
    RepoMismatch {
        changeset_id: i64,
        repo_id: i64,
        spec_id: i64,
        spec_repo_id: i64,
    },
}

/// The outcome of planning: what to run and against which state.
#[derive(Clone, Debug)]
pub struct Plan {
    pub ops: Operations,
    pub delta: Delta,
    /// The changeset as it should look once the plan ran.
    pub changeset: Changeset,
    pub spec: Option<ChangesetSpec>,
}

impl Plan {
    fn new(changeset: &Changeset, spec: Option<&ChangesetSpec>) -> Self {
        Self {
            ops: Operations::new(),
            delta: Delta::default(),
            changeset: changeset.clone(),
            spec: spec.cloned(),
        }
    }

    fn add(&mut self, op: Operation) {
        self.ops.push(op);
    }
}

/// Computes the operations that move `wanted` from what the code host has
/// (described by `previous`) to `current`.
///
/// `live` is the changeset as currently stored, when the caller has one that
/// differs from `wanted`. Without it, a pending `detached_at_ms` on `wanted`
/// stands in for "was detached from everything".
pub fn determine_plan(
    previous: Option<&ChangesetSpec>,
    current: Option<&ChangesetSpec>,
    live: Option<&Changeset>,
    wanted: &Changeset,
) -> Result<Plan, PlanError> {
    if let Some(spec) = current {
        if wanted.is_imported() {
            return Err(PlanError::SpecOnImportedChangeset {
                changeset_id: wanted.id,
            });
        }
        if spec.repo_id != wanted.repo_id {
            return Err(PlanError::RepoMismatch {
                changeset_id: wanted.id,
                repo_id: wanted.repo_id,
                spec_id: spec.id,
                spec_repo_id: spec.repo_id,
            });
        }
    }

    let mut plan = Plan::new(wanted, current);

    let mut want_detach = false;
    let mut detach_from_owner = false;
    let mut want_archive = false;
    let mut is_archived = false;
    let mut still_attached = false;
    for assoc in &wanted.batch_changes {
        let owner = wanted.owned_by_batch_change_id == Some(assoc.batch_change_id);
        if assoc.detach {
            want_detach = true;
            if owner {
                detach_from_owner = true;
            }
            continue;
        }
        still_attached = true;
        if owner && assoc.is_archived {
            is_archived = true;
        } else if owner && assoc.archive && wanted.published() {
            want_archive = true;
        }
    }

    if want_detach {
        plan.add(Operation::Detach);
    }
    if want_archive {
        plan.add(Operation::Archive);
    }

    let reattached = match live {
        Some(live) => live.batch_changes.is_empty() && still_attached,
        None => wanted.detached_at_ms.is_some() && still_attached,
    };
    if reattached {
        plan.add(Operation::Reattach);
    }

    if wanted.closing {
        if wanted.external_state != Some(ExternalState::ReadOnly) {
            plan.add(Operation::Close);
        }
        return Ok(plan);
    }

    if detach_from_owner || want_archive || is_archived {
        return Ok(plan);
    }

    let Some(current) = current else {
        if wanted.unpublished() && still_attached {
            plan.add(Operation::Import);
        }
        return Ok(plan);
    };

    let delta = compare_specs(previous, current, wanted.ui_publication_state);
    plan.delta = delta;
    let intent = effective_publication_state(current.published, wanted.ui_publication_state);

    match wanted.publication_state {
        PublicationState::Unpublished => match intent {
            UiPublicationState::Published => {
                plan.add(Operation::Push);
                plan.add(Operation::Publish);
            }
            UiPublicationState::Draft if wanted.supports_draft() => {
                plan.add(Operation::Push);
                plan.add(Operation::PublishDraft);
            }
            UiPublicationState::Draft | UiPublicationState::Unpublished => {}
        },
        PublicationState::Published => {
            if matches!(
                wanted.external_state,
                Some(ExternalState::Merged | ExternalState::ReadOnly)
            ) {
                return Ok(plan);
            }

            if reopen_after_detach(wanted) {
                plan.add(Operation::Reopen);
            }

            let still_draft = intent == UiPublicationState::Published
                && wanted.external_state == Some(ExternalState::Draft);
            if wanted.supports_draft() && (delta.undraft || still_draft) {
                plan.add(Operation::Undraft);
            }

            if delta.attributes_changed() {
                if delta.need_commit_update() {
                    plan.add(Operation::Push);
                }
                if delta.need_code_host_update() {
                    plan.add(Operation::Update);
                } else {
                    // Only the commit changed; resync once the host caught up.
                    plan.add(Operation::Sleep);
                    plan.add(Operation::Sync);
                }
            }
        }
    }

    Ok(plan)
}

/// A closed changeset that is still attached to its owner and not meant to
/// be closed was detached earlier and has been re-added since.
fn reopen_after_detach(changeset: &Changeset) -> bool {
    if changeset.external_state != Some(ExternalState::Closed) || changeset.closing {
        return false;
    }
    match changeset.owned_by_batch_change_id {
        Some(owner) => changeset.attached_to(owner),
        None => false,
    }
}

#![forbid(unsafe_code)]

//! Derived changeset state, recomputed after every reconciliation from the
//! metadata the code host last returned and the persisted timeline events.

use crate::changeset::{Changeset, CheckState, ExternalState, ReviewState};
use crate::events::{ChangesetEvent, TimelineAction};
use crate::metadata::CheckRun;
use std::collections::BTreeMap;

/// Recomputes external, review and check state in place.
///
/// An archived repository always yields `ReadOnly`; a soft-deleted changeset
/// yields `Deleted`. A changeset without metadata keeps whatever external
/// state it already had.
pub fn set_derived_state(
    changeset: &mut Changeset,
    events: &[ChangesetEvent],
    repo_archived: bool,
) {
    let mut sorted = events.to_vec();
    sorted.sort_by_key(|event| event.created_at_ms);

    changeset.external_check_state = Some(compute_check_state(changeset));

    if let Some(state) = compute_external_state(changeset, &sorted, repo_archived) {
        changeset.external_state = Some(state);
    }

    changeset.external_review_state = compute_review_state(changeset, &sorted);
}

fn compute_check_state(changeset: &Changeset) -> CheckState {
    let Some(metadata) = changeset.metadata.as_ref() else {
        return CheckState::Unknown;
    };
    match metadata.checks() {
        Ok(checks) => combine_check_states(checks),
        Err(_) => CheckState::Unknown,
    }
}

/// Any failure wins, then anything still pending; all passed is passed.
pub fn combine_check_states(checks: &[CheckRun]) -> CheckState {
    if checks.is_empty() {
        return CheckState::Unknown;
    }
    if checks.iter().any(|check| check.state == CheckState::Failed) {
        return CheckState::Failed;
    }
    if checks
        .iter()
        .any(|check| matches!(check.state, CheckState::Pending | CheckState::Unknown))
    {
        return CheckState::Pending;
    }
    CheckState::Passed
}

fn compute_external_state(
    changeset: &Changeset,
    events: &[ChangesetEvent],
    repo_archived: bool,
) -> Option<ExternalState> {
    if repo_archived {
        return Some(ExternalState::ReadOnly);
    }
    if changeset.is_deleted() {
        return Some(ExternalState::Deleted);
    }
    let metadata = changeset.metadata.as_ref()?;

    let from_history = history_external_state(events);
    match (from_history, events.last()) {
        (Some((state, _)), Some(newest)) if newest.created_at_ms > metadata.updated_at_ms() => {
            Some(state)
        }
        _ => Some(metadata.external_state()),
    }
}

fn history_external_state(events: &[ChangesetEvent]) -> Option<(ExternalState, i64)> {
    let mut state = None;
    for event in events {
        let next = match event.item.action {
            TimelineAction::Closed => ExternalState::Closed,
            TimelineAction::Merged => ExternalState::Merged,
            TimelineAction::Reopened | TimelineAction::ReadyForReview => ExternalState::Open,
            TimelineAction::ConvertedToDraft => ExternalState::Draft,
            _ => continue,
        };
        // A merged changeset cannot be reopened.
        if matches!(state, Some((ExternalState::Merged, _))) {
            continue;
        }
        state = Some((next, event.created_at_ms));
    }
    state
}

fn compute_review_state(changeset: &Changeset, events: &[ChangesetEvent]) -> Option<ReviewState> {
    let metadata = changeset.metadata.as_ref()?;
    if !metadata.supports_reviews() {
        return None;
    }

    let mut by_author: BTreeMap<&str, ReviewState> = BTreeMap::new();
    for event in events {
        match event.item.action {
            TimelineAction::Reviewed { state } => {
                if state == ReviewState::Commented
                    && by_author.contains_key(event.item.actor.as_str())
                {
                    continue;
                }
                by_author.insert(event.item.actor.as_str(), state);
            }
            TimelineAction::ReviewDismissed => {
                by_author.remove(event.item.actor.as_str());
            }
            _ => {}
        }
    }

    Some(select_review_state(by_author.values().copied()))
}

fn select_review_state(states: impl Iterator<Item = ReviewState>) -> ReviewState {
    let mut approved = false;
    for state in states {
        match state {
            ReviewState::ChangesRequested => return ReviewState::ChangesRequested,
            ReviewState::Approved => approved = true,
            _ => {}
        }
    }
    if approved {
        ReviewState::Approved
    } else {
        ReviewState::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        Actor, ChangesetMetadata, GitHubPullRequest, GitHubPullRequestState, PerforceChangelist,
        PerforceChangelistState, TimelineItem,
    };
    use crate::service::ExternalServiceType;

    fn github(state: GitHubPullRequestState, updated_at_ms: i64) -> GitHubPullRequest {
        GitHubPullRequest {
            number: 7,
            title: "title".to_string(),
            body: "body".to_string(),
            url: "https://github.test/o/r/pull/7".to_string(),
            state,
            is_draft: false,
            head_ref_name: "my-branch".to_string(),
            base_ref_name: "main".to_string(),
            head_ref_oid: "deadbeef".to_string(),
            author: Actor {
                login: "octo".to_string(),
                ..Actor::default()
            },
            timeline: Vec::new(),
            checks: Vec::new(),
            updated_at_ms,
        }
    }

    fn event(id: &str, action: TimelineAction, actor: &str, at_ms: i64) -> ChangesetEvent {
        ChangesetEvent::from_item(
            1,
            ExternalServiceType::GitHub,
            &TimelineItem {
                id: id.to_string(),
                action,
                actor: actor.to_string(),
                at_ms,
            },
        )
    }

    fn changeset_with(metadata: ChangesetMetadata) -> Changeset {
        let mut ch = Changeset::new(1, metadata.service_type());
        ch.id = 1;
        ch.metadata = Some(metadata);
        ch
    }

    #[test]
    fn archived_repo_is_read_only() {
        let mut ch = changeset_with(ChangesetMetadata::GitHub(github(
            GitHubPullRequestState::Open,
            10,
        )));
        set_derived_state(&mut ch, &[], true);
        assert_eq!(ch.external_state, Some(ExternalState::ReadOnly));
    }

    #[test]
    fn deleted_changeset_is_deleted() {
        let mut ch = changeset_with(ChangesetMetadata::GitHub(github(
            GitHubPullRequestState::Open,
            10,
        )));
        ch.set_deleted(20);
        set_derived_state(&mut ch, &[], false);
        assert_eq!(ch.external_state, Some(ExternalState::Deleted));
    }

    #[test]
    fn newer_history_wins_over_stale_metadata() {
        let mut ch = changeset_with(ChangesetMetadata::GitHub(github(
            GitHubPullRequestState::Open,
            10,
        )));
        let events = vec![event("e1", TimelineAction::Closed, "octo", 20)];
        set_derived_state(&mut ch, &events, false);
        assert_eq!(ch.external_state, Some(ExternalState::Closed));

        let mut fresh = changeset_with(ChangesetMetadata::GitHub(github(
            GitHubPullRequestState::Open,
            30,
        )));
        set_derived_state(&mut fresh, &events, false);
        assert_eq!(fresh.external_state, Some(ExternalState::Open));
    }

    #[test]
    fn review_state_prefers_changes_requested_then_approved() {
        let mut ch = changeset_with(ChangesetMetadata::GitHub(github(
            GitHubPullRequestState::Open,
            10,
        )));
        let approved = ReviewState::Approved;
        let events = vec![
            event("r1", TimelineAction::Reviewed { state: approved }, "a", 1),
            event(
                "r2",
                TimelineAction::Reviewed {
                    state: ReviewState::ChangesRequested,
                },
                "b",
                2,
            ),
        ];
        set_derived_state(&mut ch, &events, false);
        assert_eq!(ch.external_review_state, Some(ReviewState::ChangesRequested));

        let events = vec![
            event("r1", TimelineAction::Reviewed { state: approved }, "a", 1),
            event(
                "r2",
                TimelineAction::Reviewed {
                    state: ReviewState::ChangesRequested,
                },
                "b",
                2,
            ),
            event("r3", TimelineAction::ReviewDismissed, "b", 3),
        ];
        set_derived_state(&mut ch, &events, false);
        assert_eq!(ch.external_review_state, Some(ReviewState::Approved));
    }

    #[test]
    fn hosts_without_reviews_have_no_review_state() {
        let mut ch = changeset_with(ChangesetMetadata::Perforce(PerforceChangelist {
            id: "123".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            state: PerforceChangelistState::Shelved,
            author: Actor::default(),
            updated_at_ms: 1,
        }));
        set_derived_state(&mut ch, &[], false);
        assert_eq!(ch.external_review_state, None);
        assert_eq!(ch.external_check_state, Some(CheckState::Unknown));
        assert_eq!(ch.external_state, Some(ExternalState::Open));
    }

    #[test]
    fn check_states_combine() {
        let run = |state| CheckRun {
            name: "ci".to_string(),
            state,
        };
        assert_eq!(combine_check_states(&[]), CheckState::Unknown);
        assert_eq!(
            combine_check_states(&[run(CheckState::Passed), run(CheckState::Pending)]),
            CheckState::Pending
        );
        assert_eq!(
            combine_check_states(&[run(CheckState::Pending), run(CheckState::Failed)]),
            CheckState::Failed
        );
        assert_eq!(
            combine_check_states(&[run(CheckState::Passed), run(CheckState::Passed)]),
            CheckState::Passed
        );
    }
}

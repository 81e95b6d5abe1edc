#![forbid(unsafe_code)]

//! Domain model for batch changesets and the pure reconciliation planner.
//!
//! Nothing in this crate performs I/O.

pub mod batch_change;
pub mod changeset;
pub mod events;
pub mod metadata;
pub mod plan;
pub mod repo;
pub mod service;
pub mod spec;
pub mod state;

pub use batch_change::{BatchChange, NamespaceKind};
pub use changeset::{
    BatchChangeAssoc, Changeset, ChangesetState, CheckState, ExternalState, PublicationState,
    ReconcilerState, ReviewState, UiPublicationState,
};
pub use events::{ChangesetEvent, ChangesetEventKind, TimelineAction, changeset_events};
pub use metadata::{ChangesetMetadata, Unsupported};
pub use plan::{Delta, Operation, Operations, Plan, PlanError, determine_plan};
pub use repo::Repo;
pub use service::ExternalServiceType;
pub use spec::{ChangesetSpec, CommitAuthor, PublishedValue};
pub use state::set_derived_state;

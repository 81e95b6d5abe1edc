#![forbid(unsafe_code)]

//! Drives changesets on code hosts towards their specs.
//!
//! [`Reconciler::handle`] plans and executes one changeset; [`WorkerPool`]
//! feeds it from the queue kept in `bc_storage`. Code hosts and the commit
//! service plug in through the traits in [`sources`].

pub mod body;
pub mod clock;
pub mod errors;
pub mod executor;
pub mod reconciler;
pub mod sources;
pub mod webhooks;
pub mod worker;

pub use clock::{Clock, FixedClock, SystemClock};
pub use errors::{ReconcileError, SigningError};
pub use executor::{Execution, execute_plan};
pub use reconciler::{DEFAULT_SLEEP_BEFORE_SYNC, Reconciler, ReconcilerOptions};
pub use sources::{
    AuthStrategy, ChangesetSource, CommitCreator, CommitError, CommitRequest, CommitResponse,
    HostChangeset, PushConfig, SignedCommit, SourceError, Sourcer, SourcerError,
};
pub use webhooks::{PendingWebhook, WebhookEvent};
pub use worker::{WorkerConfig, WorkerPool};

#[cfg(test)]
mod tests;

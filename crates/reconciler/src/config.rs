#![forbid(unsafe_code)]

use crate::defaults::default_storage_dir;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspect and drive the batch changeset reconciler.
#[derive(Debug, Parser)]
#[command(name = "bc_reconciler", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Directory holding the sqlite store. Defaults to `.batches` at the
    /// repository root.
    #[arg(long, env = "BC_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Log filter, in `tracing_subscriber::EnvFilter` syntax.
    #[arg(long, env = "BC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(default_storage_dir)
    }
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Print the operations the reconciler would run for a changeset.
    Plan {
        #[arg(long)]
        changeset: i64,
    },
    /// Print how many changesets are in each reconciler state.
    Stats,
    /// Queue a changeset for reconciliation.
    Enqueue {
        #[arg(long)]
        changeset: i64,
        /// Also requeue a changeset whose last failure was non-retryable.
        #[arg(long)]
        force: bool,
    },
    /// Requeue changesets whose worker lease expired.
    ResetStalled {
        #[arg(long, default_value_t = 60)]
        max_num_resets: i64,
    },
}

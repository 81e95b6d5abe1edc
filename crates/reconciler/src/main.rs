#![forbid(unsafe_code)]

mod commands;
mod config;
mod defaults;

use clap::Parser;
use config::{Cli, Command};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut store = bc_storage::SqliteStore::open(cli.storage_dir())?;
    match cli.command {
        Command::Plan { changeset } => commands::plan(&store, changeset),
        Command::Stats => commands::stats(&store),
        Command::Enqueue { changeset, force } => commands::enqueue(&mut store, changeset, force),
        Command::ResetStalled { max_num_resets } => {
            commands::reset_stalled(&mut store, max_num_resets)
        }
    }
}

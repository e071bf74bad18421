pub mod config;
mod cli;
mod drivers;
mod error;
mod guard;
mod ops;
mod orchestrator;
mod storage;
mod utils;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let root = cli.root;

    match cli.command {
        Commands::Create { message, actor } => {
            ops::do_create(&root, &message, actor)?;
        }
        Commands::Restore { id, no_backup } => {
            ops::do_restore(&root, id, no_backup)?;
        }
        Commands::RestoreTest { id, mode, target_dir, target_db } => {
            ops::do_restore_test(&root, id, mode, target_dir.as_deref(), target_db.as_deref())?;
        }
        Commands::List { limit, actor } => {
            ops::do_list(&root, limit, actor)?;
        }
        Commands::Show { id, revision } => {
            ops::do_show(&root, id, revision.as_deref())?;
        }
        Commands::Status => {
            ops::do_status(&root)?;
        }
        Commands::Version => {
            ops::do_version();
        }
    }

    Ok(())
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::savepoint::{Actor, SavepointId};
use crate::orchestrator::RestoreTestMode;

/// savepoint: paired git commit + database dump recovery points
#[derive(Parser, Debug)]
#[command(name = "savepoint", version, about = "Create, restore and rehearse savepoints of a project's files and database.", long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(short = 'r', long = "root", global = true)]
    pub root: Option<PathBuf>,

    /// Log every external command and phase transition
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Commit the working tree and dump the database as one savepoint
    Create {
        /// Short description of the savepoint
        message: String,
        /// Who is taking the savepoint
        #[arg(long, default_value = "cli")]
        actor: Actor,
    },

    /// Restore files and database to a savepoint
    Restore {
        id: SavepointId,
        /// Skip the safety savepoint normally taken first
        #[arg(long)]
        no_backup: bool,
    },

    /// Check a savepoint, or rebuild it somewhere other than the live project
    RestoreTest {
        id: SavepointId,
        #[arg(long, value_enum, default_value = "dry-run")]
        mode: RestoreTestMode,
        /// Directory the files are copied to (separate-env)
        #[arg(long, required_if_eq("mode", "separate-env"))]
        target_dir: Option<PathBuf>,
        /// Database the dump is imported into (separate-env)
        #[arg(long, required_if_eq("mode", "separate-env"))]
        target_db: Option<String>,
    },

    /// List recorded savepoints, newest first
    List {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Only savepoints taken by this actor (web, cli, restore)
        #[arg(long)]
        actor: Option<Actor>,
    },

    /// Show one savepoint in full
    Show {
        #[arg(required_unless_present = "revision")]
        id: Option<SavepointId>,
        /// Look the savepoint up by its commit instead
        #[arg(long, conflicts_with = "id")]
        revision: Option<String>,
    },

    /// Branch, head revision and tool availability
    Status,

    /// Print CLI version
    Version,
}

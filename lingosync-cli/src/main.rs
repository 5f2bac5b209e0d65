//! lingosync — keep translated documents in line with their sources.
//!
//! # Usage
//!
//! ```text
//! lingosync status [--json]
//! lingosync policy list
//! lingosync policy set <field> <translate|copy|copy-relationship|ignore>
//! lingosync classify <document.json> [--json]
//! lingosync recover
//! lingosync reconcile <source_id> --to <lang> --documents <dir> --translations <dir>
//! lingosync reconcile --out-of-sync [--scan] --documents <dir> --translations <dir>
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    classify::ClassifyArgs, policy::PolicyCommand, reconcile::ReconcileArgs,
    recover::RecoverArgs, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "lingosync",
    version,
    about = "Reconcile target-language documents with their source documents",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the sync state of every known link.
    Status(StatusArgs),

    /// Manage field policies.
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },

    /// Show how a document's fields are classified and its content hash.
    Classify(ClassifyArgs),

    /// Mark abandoned pending attempts as failed.
    Recover(RecoverArgs),

    /// Reconcile documents against directory-backed collaborators.
    Reconcile(ReconcileArgs),
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Log to stderr so `--json` output stays clean. `RUST_LOG` overrides the level.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Runtime for commands that drive the async engine.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Status(args) => args.run(),
        Commands::Policy { command } => commands::policy::run(command),
        Commands::Classify(args) => args.run(),
        Commands::Recover(args) => args.run(),
        Commands::Reconcile(args) => args.run(),
    }
}

//! `lingosync reconcile` — run the engine against directory-backed collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use lingosync_core::{config, policy, DocumentId, Language};
use lingosync_sync::{
    directory::{DirectoryRepository, DirectoryTranslator},
    pipeline::{self, ReconcileResult, ReconcileScope},
    FileSnapshotStore, Reconciler, SyncOutcome,
};

/// Arguments for `lingosync reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Source document ids (omit when using `--out-of-sync`).
    #[arg(required_unless_present = "out_of_sync")]
    pub source_ids: Vec<String>,

    /// Target language; repeat for several.
    #[arg(long = "to", value_name = "LANG", required_unless_present = "out_of_sync")]
    pub targets: Vec<String>,

    /// Reconcile every link currently marked out-of-sync.
    #[arg(long, conflicts_with_all = ["source_ids", "targets"])]
    pub out_of_sync: bool,

    /// With `--out-of-sync`: first compare every synced link against its source.
    #[arg(long, requires = "out_of_sync")]
    pub scan: bool,

    /// Directory holding `<language>/<id>.json` documents.
    #[arg(long)]
    pub documents: PathBuf,

    /// Directory holding prepared answers as `<language>/<source_id>.json`.
    #[arg(long)]
    pub translations: PathBuf,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let home = crate::home_dir()?;
        let scan = self.scan;
        let config = config::load_at(&home).context("failed to load engine config")?;
        let registry = policy::load_at(&home).context("failed to load field policies")?;

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(DirectoryRepository::new(&self.documents)),
            Arc::new(DirectoryTranslator::new(&self.translations)),
            Arc::new(FileSnapshotStore::new(&home)),
            Arc::new(registry),
            config,
        ));

        let scope = if self.out_of_sync {
            ReconcileScope::OutOfSync
        } else {
            ReconcileScope::Documents {
                sources: self.source_ids.into_iter().map(DocumentId::from).collect(),
                targets: self.targets.into_iter().map(Language::from).collect(),
            }
        };

        let runtime = crate::runtime()?;
        let results = runtime.block_on(async {
            if scan {
                let marked = reconciler
                    .scan_for_changes()
                    .await
                    .context("failed to scan for source changes")?;
                println!("{} link(s) marked out-of-sync", marked.len());
            }
            pipeline::run(reconciler.clone(), scope)
                .await
                .context("reconcile failed")
        })?;

        if results.is_empty() {
            println!("Nothing to reconcile.");
            return Ok(());
        }
        print_results(&results);

        let failed = results
            .iter()
            .filter(|r| !r.outcome.is_success() && r.outcome != SyncOutcome::Busy)
            .count();
        tracing::info!(total = results.len(), failed, "reconcile run finished");
        if failed > 0 {
            anyhow::bail!("{failed} of {} reconciliation(s) did not complete", results.len());
        }
        Ok(())
    }
}

fn print_results(results: &[ReconcileResult]) {
    for r in results {
        let mark = if r.outcome.is_success() {
            "✓".green().bold()
        } else if r.outcome == SyncOutcome::Busy {
            "…".yellow().bold()
        } else {
            "✗".red().bold()
        };
        println!(
            "{mark} {} → {}: {}",
            r.source_id, r.target_language, r.outcome
        );
    }
    let written = results
        .iter()
        .filter(|r| matches!(r.outcome, SyncOutcome::Created | SyncOutcome::Updated))
        .count();
    let unchanged = results
        .iter()
        .filter(|r| r.outcome == SyncOutcome::Unchanged)
        .count();
    println!("{written} written, {unchanged} unchanged");
}

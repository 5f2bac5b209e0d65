//! `lingosync recover` — release links stuck in `pending` after a crash.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use lingosync_core::config;
use lingosync_sync::{pipeline, FileSnapshotStore};

/// Arguments for `lingosync recover`.
#[derive(Args, Debug)]
pub struct RecoverArgs {}

impl RecoverArgs {
    pub fn run(self) -> Result<()> {
        let home = crate::home_dir()?;
        let config = config::load_at(&home).context("failed to load engine config")?;
        let store = FileSnapshotStore::new(&home);

        let recovered = pipeline::recover_abandoned(&store, config.liveness_window(), Utc::now())
            .context("failed to recover abandoned attempts")?;
        if recovered.is_empty() {
            println!("✓ nothing to recover");
        } else {
            for link_id in &recovered {
                println!("  {link_id} → failed");
            }
            println!("✓ {} abandoned attempt(s) marked failed", recovered.len());
        }
        Ok(())
    }
}

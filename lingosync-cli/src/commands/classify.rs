//! `lingosync classify <document.json>` — policy classification and content hash.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use lingosync_core::{policy, DocumentId, Language};
use lingosync_sync::{change, directory};

/// Arguments for `lingosync classify`.
#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Document file (`title`, `content`, `slug`, `fields`).
    pub document: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct ClassifyJson {
    translate: Vec<String>,
    copy: Vec<String>,
    copy_relationship: Vec<String>,
    ignore: Vec<String>,
    content_hash: String,
}

impl ClassifyArgs {
    pub fn run(self) -> Result<()> {
        let home = crate::home_dir()?;
        let registry = policy::load_at(&home).context("failed to load field policies")?;

        let id = self
            .document
            .file_stem()
            .map(|s| DocumentId::from(s.to_string_lossy().into_owned()))
            .context("document path has no file name")?;
        let document = directory::read_document_file(&self.document, &id, &Language::from("-"))
            .with_context(|| format!("failed to read {}", self.document.display()))?;

        let classes = registry.classify(&document.fields);
        let hash = change::content_hash(&document, &registry);

        if self.json {
            let payload = ClassifyJson {
                translate: classes.translate.into_iter().collect(),
                copy: classes.copy.into_iter().collect(),
                copy_relationship: classes.copy_relationship.into_iter().collect(),
                ignore: classes.ignore.into_iter().collect(),
                content_hash: hash,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize JSON")?
            );
            return Ok(());
        }

        for (label, names) in [
            ("translate", &classes.translate),
            ("copy", &classes.copy),
            ("copy-relationship", &classes.copy_relationship),
            ("ignore", &classes.ignore),
        ] {
            let list: Vec<&str> = names.iter().map(String::as_str).collect();
            println!("{label:<18} {}", if list.is_empty() { "-".to_string() } else { list.join(", ") });
        }
        println!("content hash       {hash}");
        Ok(())
    }
}

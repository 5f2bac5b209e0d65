//! `lingosync status` — per-link sync state.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use lingosync_core::{SyncLink, SyncSnapshot, SyncState};
use lingosync_sync::{FileSnapshotStore, SnapshotStore};

/// Arguments for `lingosync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = crate::home_dir()?;
        let report = build_report(&home)?;
        if self.json {
            return print_json(report);
        }
        print_table(report);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct LinkStatus {
    snapshot: SyncSnapshot,
    link: Option<SyncLink>,
}

fn build_report(home: &Path) -> Result<Vec<LinkStatus>> {
    let store = FileSnapshotStore::new(home);
    let snapshots = store
        .list()
        .context("failed to read snapshots under ~/.lingosync/snapshots")?;
    snapshots
        .into_iter()
        .map(|snapshot| {
            let link = store
                .get_link(&snapshot.link_id)
                .with_context(|| format!("failed to read link {}", snapshot.link_id))?;
            Ok(LinkStatus { snapshot, link })
        })
        .collect()
}

#[derive(Serialize)]
struct StatusReportJson {
    summary: StatusSummaryJson,
    links: Vec<LinkStatusJson>,
}

#[derive(Serialize)]
struct StatusSummaryJson {
    links: usize,
    out_of_sync: usize,
    failed: usize,
}

#[derive(Serialize)]
struct LinkStatusJson {
    link_id: String,
    source_document_id: Option<String>,
    source_language: Option<String>,
    target_language: Option<String>,
    target_document_id: Option<String>,
    state: SyncState,
    updated_at: String,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "target")]
    target: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "updated")]
    updated: String,
    #[tabled(rename = "link")]
    link: String,
}

fn count(rows: &[LinkStatus], state: SyncState) -> usize {
    rows.iter().filter(|r| r.snapshot.state == state).count()
}

fn print_json(rows: Vec<LinkStatus>) -> Result<()> {
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            links: rows.len(),
            out_of_sync: count(&rows, SyncState::OutOfSync),
            failed: count(&rows, SyncState::Failed),
        },
        links: rows
            .into_iter()
            .map(|row| LinkStatusJson {
                link_id: row.snapshot.link_id.0,
                source_document_id: row.link.as_ref().map(|l| l.source_document_id.0.clone()),
                source_language: row.link.as_ref().map(|l| l.source_language.0.clone()),
                target_language: row.link.as_ref().map(|l| l.target_language.0.clone()),
                target_document_id: row
                    .link
                    .as_ref()
                    .and_then(|l| l.target_document_id.as_ref())
                    .map(|id| id.0.clone()),
                state: row.snapshot.state,
                updated_at: row.snapshot.updated_at.to_rfc3339(),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(rows: Vec<LinkStatus>) {
    println!(
        "lingosync v{} | {} links | {} out-of-sync | {} failed",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        count(&rows, SyncState::OutOfSync),
        count(&rows, SyncState::Failed),
    );

    if rows.is_empty() {
        println!("No links yet.");
        return;
    }

    let needs_work = rows
        .iter()
        .any(|r| matches!(r.snapshot.state, SyncState::OutOfSync | SyncState::Failed));
    let now = Utc::now();
    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| {
            let (source, target) = match &row.link {
                Some(link) => (
                    format!("{} ({})", link.source_document_id, link.source_language),
                    match &link.target_document_id {
                        Some(id) => format!("{id} ({})", link.target_language),
                        None => format!("- ({})", link.target_language),
                    },
                ),
                None => ("?".to_string(), "?".to_string()),
            };
            StatusTableRow {
                source,
                target,
                state: state_label(row.snapshot.state),
                updated: format_age(row.snapshot.updated_at, now),
                link: row.snapshot.link_id.0,
            }
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    if needs_work {
        println!("Run 'lingosync reconcile --out-of-sync' to bring links up to date.");
    }
}

fn state_label(state: SyncState) -> String {
    let label = state.to_string().to_uppercase();
    match state {
        SyncState::Synced => label.green().bold().to_string(),
        SyncState::OutOfSync => label.yellow().bold().to_string(),
        SyncState::Failed => label.red().bold().to_string(),
        SyncState::Pending => label.cyan().bold().to_string(),
        SyncState::NotLinked => label.bright_black().bold().to_string(),
    }
}

/// Compact age like `42s ago`, `5m ago`, `3h ago`, `2d ago`.
fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn age_buckets() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::seconds(5), now), "5s ago");
        assert_eq!(format_age(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(format_age(now - Duration::hours(3), now), "3h ago");
        assert_eq!(format_age(now - Duration::days(2), now), "2d ago");
        assert_eq!(format_age(now + Duration::seconds(5), now), "0s ago");
    }
}

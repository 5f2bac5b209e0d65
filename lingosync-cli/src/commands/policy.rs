//! `lingosync policy list` and `lingosync policy set <field> <kind>`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use lingosync_core::{policy, PolicyKind};

/// Manage per-field policies in `~/.lingosync/policies.yaml`.
#[derive(Subcommand, Debug)]
pub enum PolicyCommand {
    /// List every field with an explicit policy.
    List,

    /// Assign a policy to a field.
    Set(SetArgs),
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Custom field name (e.g. "description", "price").
    pub field: String,

    /// translate | copy | copy-relationship | ignore
    pub kind: PolicyKind,
}

#[derive(Tabled)]
struct PolicyRow {
    #[tabled(rename = "field")]
    field: String,
    #[tabled(rename = "policy")]
    kind: String,
}

pub fn run(cmd: PolicyCommand) -> Result<()> {
    let home = crate::home_dir()?;
    match cmd {
        PolicyCommand::List => {
            let registry = policy::load_at(&home).context("failed to load field policies")?;
            if registry.is_empty() {
                println!("No field policies set; every field is copied unchanged.");
                println!("Run: lingosync policy set <field> translate");
                return Ok(());
            }
            let rows: Vec<PolicyRow> = registry
                .entries()
                .map(|(field, kind)| PolicyRow {
                    field: field.to_string(),
                    kind: kind.to_string(),
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        PolicyCommand::Set(args) => {
            let mut registry = policy::load_at(&home).context("failed to load field policies")?;
            registry
                .set(args.field.clone(), args.kind)
                .with_context(|| format!("cannot set a policy on '{}'", args.field))?;
            policy::save_at(&home, &registry).context("failed to save field policies")?;
            println!("✓ '{}' is now {}", args.field, args.kind);
        }
    }
    Ok(())
}

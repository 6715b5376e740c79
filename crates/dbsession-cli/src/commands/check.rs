//! Check command - validates that the store is provisioned.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::Context;

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {}

#[derive(Debug, Serialize)]
struct CheckOutput {
    ok: bool,
    database: String,
    table: String,
    sessions: usize,
}

/// Run the check command.
pub fn run(_args: CheckArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let sessions = dbsession::RecordStore::all(&store)?.len();

    let output = CheckOutput {
        ok: true,
        database: ctx.config.store.path.display().to_string(),
        table: store.table().to_string(),
        sessions,
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let green = Style::new().green();
        let dim = Style::new().dim();
        println!(
            "{} table {} in {} ({} sessions)",
            green.apply_to("ok"),
            style(&output.table).bold(),
            dim.apply_to(&output.database),
            output.sessions
        );
    }
    Ok(())
}

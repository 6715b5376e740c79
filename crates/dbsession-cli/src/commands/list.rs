//! List command - shows every stored session.

use anyhow::Result;
use clap::Args;
use console::Style;
use dbsession::{Classification, RecordStore};
use serde::Serialize;

use super::{Context, now};

/// Arguments for the list command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show sessions carrying the authentication marker
    #[arg(long)]
    pub authenticated: bool,
}

#[derive(Debug, Serialize)]
struct SessionRow {
    id: String,
    age: i64,
    ttl: i64,
    authenticated: bool,
    bytes: usize,
}

/// Run the list command.
pub fn run(args: ListArgs, ctx: &Context) -> Result<()> {
    let handler = ctx.open_handler()?;
    let policy = handler.policy();
    let now = now();

    let rows: Vec<SessionRow> = policy
        .store()
        .all()?
        .into_iter()
        .map(|record| SessionRow {
            age: record.age(now),
            ttl: policy.remaining_ttl(&record, now),
            authenticated: policy.classify(&record) == Classification::Authenticated,
            bytes: record.data.len(),
            id: record.id,
        })
        .filter(|row| !args.authenticated || row.authenticated)
        .collect();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No sessions");
        return Ok(());
    }

    let dim = Style::new().dim();
    println!(
        "{}",
        dim.apply_to(format!(
            "{:<40} {:>8} {:>8} {:>8}  {}",
            "ID", "AGE", "TTL", "BYTES", "KIND"
        ))
    );
    for row in &rows {
        let kind = if row.authenticated {
            "authenticated"
        } else {
            "anonymous"
        };
        println!(
            "{:<40} {:>8} {:>8} {:>8}  {}",
            row.id, row.age, row.ttl, row.bytes, kind
        );
    }
    Ok(())
}

//! Sweep command - runs the two-phase expiry sweep.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::{Context, now};

/// Arguments for the sweep command.
#[derive(Args, Debug)]
pub struct SweepArgs {}

#[derive(Debug, Serialize)]
struct SweepOutput {
    expired: u64,
    anonymous: u64,
    total: u64,
}

/// Run the sweep command.
pub fn run(_args: SweepArgs, ctx: &Context) -> Result<()> {
    let handler = ctx.open_handler()?;
    let report = handler.policy().sweep_expired(now())?;

    if ctx.json_output {
        let output = SweepOutput {
            expired: report.expired,
            anonymous: report.anonymous,
            total: report.total(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Deleted {} sessions ({} past {}s, {} anonymous past {}s)",
            report.total(),
            report.expired,
            handler.policy().session_duration(),
            report.anonymous,
            handler.policy().anonymous_max_lifetime()
        );
    }
    Ok(())
}

//! Gc command - garbage collection with an explicit lifetime ceiling.

use anyhow::Result;
use clap::Args;
use dbsession::SessionHandler;

use super::Context;

/// Arguments for the gc command.
#[derive(Args, Debug)]
pub struct GcArgs {
    /// Delete sessions at least this many seconds old
    #[arg(allow_negative_numbers = true)]
    pub max_lifetime: i64,
}

/// Run the gc command.
pub fn run(args: GcArgs, ctx: &Context) -> Result<()> {
    let deleted = ctx.open_handler()?.gc(args.max_lifetime)?;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "deleted": deleted }));
    } else {
        println!("Deleted {deleted} sessions");
    }
    Ok(())
}

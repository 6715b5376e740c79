//! Destroy command - deletes one session.

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for the destroy command.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Session id
    pub id: String,
}

/// Run the destroy command.
pub fn run(args: DestroyArgs, ctx: &Context) -> Result<()> {
    let handler = ctx.open_handler()?;
    let existed = handler.policy().remove(&args.id)?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({ "id": args.id, "existed": existed })
        );
    } else if existed {
        println!("Destroyed session {}", args.id);
    } else if ctx.verbose {
        println!("Session {} did not exist", args.id);
    }
    Ok(())
}

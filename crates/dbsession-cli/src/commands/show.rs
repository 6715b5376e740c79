//! Show command - decodes one session.

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};
use dbsession::SessionHandler;

use super::Context;

/// Arguments for the show command.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Session id
    pub id: String,

    /// Print the raw payload instead of decoded fields
    #[arg(long)]
    pub raw: bool,
}

/// Run the show command.
pub fn run(args: ShowArgs, ctx: &Context) -> Result<()> {
    let handler = ctx.open_handler()?;
    let read = handler.read(&args.id)?;
    let Some(ttl) = read.ttl_remaining else {
        bail!("session '{}' not found", args.id);
    };

    if args.raw {
        println!("{}", String::from_utf8_lossy(&read.data));
        return Ok(());
    }

    let policy = handler.policy();
    let authenticated = policy.inspector().is_authenticated(&read.data);
    let (fields, decode_error) = match policy.inspector().try_decode(&read.data) {
        Ok(fields) => (fields, None),
        Err(e) => (Default::default(), Some(e.to_string())),
    };
    let fields: serde_json::Map<_, _> = fields
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();

    if ctx.json_output {
        let output = serde_json::json!({
            "id": args.id,
            "ttl": ttl,
            "authenticated": authenticated,
            "fields": fields,
            "decode_error": decode_error,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style(&args.id).bold());
    println!("  {} {}s", dim.apply_to("TTL:"), ttl);
    println!(
        "  {} {}",
        dim.apply_to("Kind:"),
        if authenticated {
            "authenticated"
        } else {
            "anonymous"
        }
    );
    if let Some(err) = decode_error {
        println!("  {} {}", Style::new().red().apply_to("Undecodable:"), err);
    }
    for (name, value) in &fields {
        println!("  {} = {}", name, value);
    }
    Ok(())
}

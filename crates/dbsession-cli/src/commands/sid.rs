//! Sid command - prints fresh session ids.

use anyhow::Result;
use clap::Args;
use dbsession::{RandomIdGenerator, SessionIdGenerator};

use super::Context;

/// Arguments for the sid command.
#[derive(Args, Debug)]
pub struct SidArgs {
    /// How many ids to generate
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: usize,
}

/// Run the sid command.
pub fn run(args: SidArgs, _ctx: &Context) -> Result<()> {
    for _ in 0..args.count {
        println!("{}", RandomIdGenerator.generate());
    }
    Ok(())
}

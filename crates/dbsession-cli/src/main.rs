//! dbsession - operator tool for session stores
//!
//! Main entry point for the dbsession CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::{check, destroy, gc, list, schema, show, sid, sweep};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// dbsession - inspect and maintain database-backed web sessions
#[derive(Parser)]
#[command(name = "dbsession")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (skips discovery of config.toml / dbsession.toml)
    #[arg(long, global = true, env = "DBSESSION_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file (overrides store.path)
    #[arg(long, global = true, env = "DBSESSION_DATABASE")]
    pub database: Option<PathBuf>,

    /// Session table name (overrides store.table)
    #[arg(long, global = true)]
    pub table: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the SQL that provisions the session table
    Schema(schema::SchemaArgs),

    /// Verify that the session table exists
    Check(check::CheckArgs),

    /// Run the expiry sweep now
    Sweep(sweep::SweepArgs),

    /// Garbage-collect sessions older than a given lifetime
    Gc(gc::GcArgs),

    /// List stored sessions with age and classification
    List(list::ListArgs),

    /// Show one session's decoded fields and remaining lifetime
    Show(show::ShowArgs),

    /// Delete a session
    Destroy(destroy::DestroyArgs),

    /// Generate a fresh session id
    Sid(sid::SidArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "dbsession=debug,dbsession_cli=debug,warn"
    } else {
        "dbsession=warn,dbsession_cli=info,warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let mut config = match &cli.config {
        Some(path) => dbsession::load_config_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let loaded = dbsession::load_config(None)?;
            for path in &loaded.loaded_from {
                tracing::debug!(path = %path.display(), "Loaded config layer");
            }
            loaded.config
        }
    };
    if let Some(database) = cli.database {
        config.store.path = database;
    }
    if let Some(table) = cli.table {
        config.store.table = table;
    }

    let ctx = commands::Context {
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Schema(args) => schema::run(args, &ctx),
        Commands::Check(args) => check::run(args, &ctx),
        Commands::Sweep(args) => sweep::run(args, &ctx),
        Commands::Gc(args) => gc::run(args, &ctx),
        Commands::List(args) => list::run(args, &ctx),
        Commands::Show(args) => show::run(args, &ctx),
        Commands::Destroy(args) => destroy::run(args, &ctx),
        Commands::Sid(args) => sid::run(args, &ctx),
    }
}

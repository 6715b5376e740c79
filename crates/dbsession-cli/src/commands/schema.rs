//! Schema command - prints the DDL for the session table.

use anyhow::Result;
use clap::Args;
use dbsession::SqliteRecordStore;

use super::Context;

/// Arguments for the schema command.
#[derive(Args, Debug)]
pub struct SchemaArgs {}

/// Run the schema command.
///
/// Pipe the output into `sqlite3 <database>` to provision a store.
pub fn run(_args: SchemaArgs, ctx: &Context) -> Result<()> {
    print!("{}", SqliteRecordStore::schema_sql(&ctx.config.store.table)?);
    Ok(())
}

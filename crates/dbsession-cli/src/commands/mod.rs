//! CLI command handlers.

pub mod check;
pub mod destroy;
pub mod gc;
pub mod list;
pub mod schema;
pub mod show;
pub mod sid;
pub mod sweep;

use anyhow::Result;
use dbsession::{DbSessionConfig, DbSessionHandler, SqliteRecordStore};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Resolved configuration (files + CLI overrides).
    pub config: DbSessionConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Open the configured store; fails if the table is missing.
    pub fn open_store(&self) -> Result<SqliteRecordStore> {
        Ok(SqliteRecordStore::from_config(&self.config.store)?)
    }

    /// Open a handler over the configured store.
    pub fn open_handler(&self) -> Result<DbSessionHandler<SqliteRecordStore>> {
        Ok(DbSessionHandler::new(
            self.open_store()?,
            &self.config.handler,
        )?)
    }
}

/// Current time in epoch seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

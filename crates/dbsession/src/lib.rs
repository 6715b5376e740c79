//! Database-backed session handler with differential expiry.
//!
//! This crate stores web-session records in a shared store so session state
//! survives across server processes and machines:
//! - A [`SessionHandler`] contract with `open`/`close`/`read`/`write`/
//!   `destroy`/`gc`/`create_sid` hooks
//! - Two TTL regimes: authenticated sessions live `session_duration`,
//!   anonymous ones only `anonymous_max_lifetime`
//! - Read-only payload inspection to tell the two apart
//! - SQLite and in-memory record stores behind a [`RecordStore`] trait
//!
//! # Example
//!
//! ```rust,ignore
//! use dbsession::{DbSessionHandler, HandlerConfig, SessionHandler, SqliteRecordStore};
//!
//! let store = SqliteRecordStore::open(&path, "sessions", Duration::from_secs(5))?;
//! let config = HandlerConfig::new().with_auth_marker_key("user_id");
//! let handler = DbSessionHandler::new(store, &config)?;
//!
//! handler.open("", "PHPSESSID")?;
//! let session = handler.read(&id)?;
//! ```

pub mod config;
pub mod diagnostics;
mod error;
pub mod handler;
pub mod payload;
pub mod policy;
pub mod store;

pub use config::{
    DbSessionConfig, HandlerConfig, LoadedConfig, StoreConfig, load_config, load_config_file,
};
pub use diagnostics::DiagnosticLog;
pub use error::{ConfigError, Error, PayloadError, Result};
pub use handler::{
    DbSessionHandler, RandomIdGenerator, SessionHandler, SessionIdGenerator, SessionRead,
};
pub use payload::{CodecKind, Fields, PayloadCodec, PayloadInspector, PayloadKey, PayloadValue};
pub use policy::{Classification, SessionPolicy, SweepReport};
pub use store::{MemoryRecordStore, RecordStore, SessionRecord, SqliteRecordStore};

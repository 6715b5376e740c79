//! The session handler contract and its database-backed implementation.
//!
//! Hosts drive a handler through the usual session save-handler hooks:
//! `open` at session start, `read`, `write` at shutdown, `close`, plus
//! `destroy`, `gc` and `create_sid` on demand. Hosts hold any
//! implementation as `Box<dyn SessionHandler>`.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::HandlerConfig;
use crate::diagnostics::DiagnosticLog;
use crate::error::Result;
use crate::policy::SessionPolicy;
use crate::store::RecordStore;

/// Outcome of [`SessionHandler::read`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRead {
    /// Stored payload; empty for an unknown session.
    pub data: Vec<u8>,

    /// Seconds left under the authenticated TTL, for a stored session.
    /// Derived on every read, never persisted.
    pub ttl_remaining: Option<i64>,
}

impl SessionRead {
    /// The result of reading an unknown session.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the host should start a fresh session.
    pub fn is_empty(&self) -> bool {
        self.ttl_remaining.is_none()
    }
}

/// Session save-handler hooks.
pub trait SessionHandler: Send + Sync {
    /// Session start. Returns `true` on success.
    fn open(&self, save_path: &str, session_name: &str) -> Result<bool>;

    /// Session end. Returns `true` on success.
    fn close(&self) -> Result<bool>;

    /// Load a session; an unknown id yields an empty read.
    fn read(&self, id: &str) -> Result<SessionRead>;

    /// Store a session. Returns `true` on success.
    fn write(&self, id: &str, data: &[u8]) -> Result<bool>;

    /// Delete a session. Unknown ids succeed.
    fn destroy(&self, id: &str) -> Result<bool>;

    /// Delete sessions at least `max_lifetime` seconds old (and stale
    /// anonymous ones). Returns the number deleted. A negative
    /// `max_lifetime` is rejected.
    fn gc(&self, max_lifetime: i64) -> Result<u64>;

    /// Generate a fresh session id.
    fn create_sid(&self) -> String;
}

/// Source of new session ids.
pub trait SessionIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 32 lowercase hex characters from a random v4 UUID.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl SessionIdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

fn system_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Session handler backed by a [`RecordStore`].
pub struct DbSessionHandler<S: RecordStore> {
    policy: SessionPolicy<S>,
    ids: Box<dyn SessionIdGenerator>,
    log: DiagnosticLog,
    clock: fn() -> i64,
    /// Session name passed to `open` by each request thread, used as
    /// diagnostic log context until that thread calls `close`.
    session_names: Mutex<HashMap<ThreadId, String>>,
}

impl<S: RecordStore> std::fmt::Debug for DbSessionHandler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbSessionHandler")
            .field("session_duration", &self.policy.session_duration())
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl<S: RecordStore> DbSessionHandler<S> {
    /// Create a handler over `store`.
    ///
    /// Does not touch the store; call [`Self::validate`] at startup to
    /// fail fast on a missing table.
    pub fn new(store: S, config: &HandlerConfig) -> Result<Self> {
        Ok(Self::from_policy(
            SessionPolicy::new(store, config)?,
            DiagnosticLog::from_config(config),
        ))
    }

    /// Create a handler around an existing policy.
    pub fn from_policy(policy: SessionPolicy<S>, log: DiagnosticLog) -> Self {
        Self {
            policy,
            ids: Box::new(RandomIdGenerator),
            log,
            clock: system_now,
            session_names: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the session id generator.
    pub fn with_id_generator(mut self, ids: impl SessionIdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    /// Replace the clock (epoch seconds).
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// The lifecycle policy.
    pub fn policy(&self) -> &SessionPolicy<S> {
        &self.policy
    }

    /// Check that the backing store is provisioned.
    pub fn validate(&self) -> Result<()> {
        self.policy.store().validate_schema()
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn log_call(&self, action: impl FnOnce() -> String) {
        if self.log.is_enabled() {
            let context = self
                .session_names
                .lock()
                .get(&thread::current().id())
                .cloned()
                .unwrap_or_default();
            self.log.append(&context, &action());
        }
    }
}

impl<S: RecordStore> SessionHandler for DbSessionHandler<S> {
    fn open(&self, save_path: &str, session_name: &str) -> Result<bool> {
        if self.log.is_enabled() {
            self.session_names
                .lock()
                .insert(thread::current().id(), session_name.to_string());
        }
        self.log_call(|| format!("open({save_path}, {session_name})"));

        // Maintenance only: a failed sweep must not fail the request.
        if let Err(e) = self.policy.sweep_if_due(self.now()) {
            warn!(error = %e, "Session sweep failed during open");
        }
        Ok(true)
    }

    fn close(&self) -> Result<bool> {
        self.log_call(|| "close".to_string());
        if self.log.is_enabled() {
            self.session_names.lock().remove(&thread::current().id());
        }
        Ok(true)
    }

    fn read(&self, id: &str) -> Result<SessionRead> {
        self.log_call(|| format!("read({id})"));

        let Some(record) = self.policy.load(id)? else {
            debug!(session_id = %id, "Session not found");
            return Ok(SessionRead::empty());
        };

        let now = self.now();
        let ttl = self.policy.remaining_ttl(&record, now);
        self.log_call(|| {
            format!(
                "read({id}) now {now}, duration {}, timestamp {}, ttl {ttl}",
                self.policy.session_duration(),
                record.timestamp
            )
        });
        debug!(session_id = %id, bytes = record.data.len(), ttl, "Session read");

        Ok(SessionRead {
            data: record.data,
            ttl_remaining: Some(ttl),
        })
    }

    fn write(&self, id: &str, data: &[u8]) -> Result<bool> {
        self.log_call(|| format!("write({id}, {})", String::from_utf8_lossy(data)));
        self.policy.persist(id, data, self.now())?;
        debug!(session_id = %id, bytes = data.len(), "Session written");
        Ok(true)
    }

    fn destroy(&self, id: &str) -> Result<bool> {
        self.log_call(|| format!("destroy({id})"));
        let existed = self.policy.remove(id)?;
        debug!(session_id = %id, existed, "Session destroyed");
        Ok(true)
    }

    fn gc(&self, max_lifetime: i64) -> Result<u64> {
        self.log_call(|| format!("gc({max_lifetime})"));
        let report = self.policy.sweep_with_ceiling(self.now(), max_lifetime)?;
        Ok(report.total())
    }

    fn create_sid(&self) -> String {
        self.ids.generate()
    }
}

//! Session lifecycle policy: creation, refresh, classification and expiry.
//!
//! Two TTL regimes apply. Every session expires `session_duration` seconds
//! after its last write. Sessions whose payload lacks the authentication
//! marker (health checks, load balancer probes, crawlers) expire after the
//! much shorter `anonymous_max_lifetime`. A record reaching
//! `session_duration` in age is expired; an anonymous record must be
//! strictly older than `anonymous_max_lifetime`.

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::HandlerConfig;
use crate::error::{ConfigError, Error, Result};
use crate::payload::PayloadInspector;
use crate::store::{RecordStore, SessionRecord};

/// How often `persist` retries when concurrent writers or sweeps race it.
const MAX_UPSERT_ATTEMPTS: usize = 3;

/// Whether a session belongs to a logged-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Authenticated,
    Anonymous,
}

/// Records removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Removed for exceeding the absolute ceiling.
    pub expired: u64,
    /// Removed for being anonymous and older than the anonymous TTL.
    pub anonymous: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.expired + self.anonymous
    }
}

/// Lifecycle decisions over a [`RecordStore`].
#[derive(Debug)]
pub struct SessionPolicy<S: RecordStore> {
    store: S,
    inspector: PayloadInspector,
    session_duration: i64,
    anonymous_max_lifetime: i64,
    sweep_interval: i64,
    /// Time of the last sweep started by [`Self::sweep_if_due`].
    last_sweep: Mutex<Option<i64>>,
}

impl<S: RecordStore> SessionPolicy<S> {
    /// Create a policy from validated handler settings.
    pub fn new(store: S, config: &HandlerConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let inspector = PayloadInspector::new(config.codec.codec(), config.auth_marker_key.clone());
        Ok(Self::with_inspector(store, inspector, config))
    }

    /// Create a policy with a custom payload inspector.
    ///
    /// Lifetimes are taken from `config`; its codec and marker are ignored.
    pub fn with_inspector(store: S, inspector: PayloadInspector, config: &HandlerConfig) -> Self {
        Self {
            store,
            inspector,
            session_duration: secs(config.session_duration),
            anonymous_max_lifetime: secs(config.anonymous_max_lifetime),
            sweep_interval: secs(config.sweep_interval),
            last_sweep: Mutex::new(None),
        }
    }

    /// The underlying record store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The payload inspector used for classification.
    pub fn inspector(&self) -> &PayloadInspector {
        &self.inspector
    }

    pub fn session_duration(&self) -> i64 {
        self.session_duration
    }

    pub fn anonymous_max_lifetime(&self) -> i64 {
        self.anonymous_max_lifetime
    }

    /// Classify a record by its payload. Undecodable payloads are anonymous.
    pub fn classify(&self, record: &SessionRecord) -> Classification {
        if self.inspector.is_authenticated(&record.data) {
            Classification::Authenticated
        } else {
            Classification::Anonymous
        }
    }

    /// Fetch a session. Absence is not an error.
    pub fn load(&self, id: &str) -> Result<Option<SessionRecord>> {
        self.store.find(id)
    }

    /// Remaining lifetime of a session under the authenticated TTL.
    pub fn touch(&self, id: &str, now: i64) -> Result<Option<i64>> {
        Ok(self
            .store
            .find(id)?
            .map(|record| self.remaining_ttl(&record, now)))
    }

    /// `session_duration - now + timestamp`; zero or negative means expired.
    pub fn remaining_ttl(&self, record: &SessionRecord, now: i64) -> i64 {
        self.session_duration
            .saturating_sub(now)
            .saturating_add(record.timestamp)
    }

    /// Create or refresh a session.
    ///
    /// Concurrent writers for a new id race on `create`; the loser sees a
    /// duplicate key and updates instead. An update that finds no row (a
    /// sweep removed it meanwhile) falls back to `create`.
    pub fn persist(&self, id: &str, payload: &[u8], now: i64) -> Result<()> {
        let record = SessionRecord::new(id, payload, now);
        let mut exists = self.store.find(id)?.is_some();

        for _ in 0..MAX_UPSERT_ATTEMPTS {
            if exists {
                if self.store.update(&record)? {
                    return Ok(());
                }
                debug!(session_id = %id, "Session vanished before update, recreating");
            }
            match self.store.create(&record) {
                Ok(()) => return Ok(()),
                Err(Error::DuplicateKey(_)) => {
                    debug!(session_id = %id, "Concurrent create, updating instead");
                    exists = true;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::StoreUnavailable(format!(
            "session {id} kept changing during upsert"
        )))
    }

    /// Delete a session. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        self.store.delete(id)
    }

    /// Delete every session past its applicable TTL.
    pub fn sweep_expired(&self, now: i64) -> Result<SweepReport> {
        self.sweep_with_ceiling(now, self.session_duration)
    }

    /// Sweep unless one already ran less than `sweep_interval` seconds ago.
    pub fn sweep_if_due(&self, now: i64) -> Result<Option<SweepReport>> {
        {
            let mut last = self.last_sweep.lock();
            if let Some(at) = *last
                && now.saturating_sub(at) < self.sweep_interval
            {
                return Ok(None);
            }
            *last = Some(now);
        }
        self.sweep_expired(now).map(Some)
    }

    /// Two-phase sweep with `ceiling` as the absolute lifetime.
    ///
    /// Phase one bulk-deletes everything at least `ceiling` seconds old.
    /// Phase two scans the rest and deletes anonymous sessions older than
    /// `anonymous_max_lifetime` seconds. A session rewritten between the
    /// scan and its delete is kept.
    pub fn sweep_with_ceiling(&self, now: i64, ceiling: i64) -> Result<SweepReport> {
        if ceiling < 0 {
            return Err(Error::InvalidLifetime(ceiling));
        }
        let expired = self.store.delete_before(expiry_cutoff(now, ceiling))?;

        let anonymous_cutoff = now.saturating_sub(self.anonymous_max_lifetime);
        let mut anonymous = 0;
        for record in self.store.all()? {
            if record.timestamp < anonymous_cutoff
                && self.classify(&record) == Classification::Anonymous
            {
                if self.store.delete_if_unchanged(&record)? {
                    anonymous += 1;
                } else {
                    debug!(session_id = %record.id, "Session changed during sweep, kept");
                }
            }
        }

        let report = SweepReport { expired, anonymous };
        if report.total() > 0 {
            info!(
                expired = report.expired,
                anonymous = report.anonymous,
                ceiling,
                "Swept expired sessions"
            );
        } else {
            debug!(ceiling, "Sweep found nothing to delete");
        }
        Ok(report)
    }
}

/// Records with `timestamp` below the cutoff have lived at least `ttl`.
fn expiry_cutoff(now: i64, ttl: i64) -> i64 {
    now.saturating_sub(ttl).saturating_add(1)
}

/// Config values are validated to fit; saturate rather than wrap regardless.
fn secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;

    const AUTH: &[u8] = b"user_id|i:42;";
    const ANON: &[u8] = b"csrf|s:4:\"abcd\";";

    fn policy() -> SessionPolicy<MemoryRecordStore> {
        let config = HandlerConfig::new().with_auth_marker_key("user_id");
        SessionPolicy::new(MemoryRecordStore::new(), &config).unwrap()
    }

    fn ids(policy: &SessionPolicy<MemoryRecordStore>) -> Vec<String> {
        policy
            .store()
            .all()
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[test]
    fn test_anonymous_session_expires_after_30s() {
        let policy = policy();
        policy.persist("s1", b"", 0).unwrap();

        let report = policy.sweep_expired(31).unwrap();
        assert_eq!(report, SweepReport { expired: 0, anonymous: 1 });
        assert!(policy.load("s1").unwrap().is_none());
    }

    #[test]
    fn test_authenticated_session_lives_full_duration() {
        let policy = policy();
        policy.persist("s2", AUTH, 0).unwrap();

        assert_eq!(policy.sweep_expired(31).unwrap().total(), 0);
        assert!(policy.load("s2").unwrap().is_some());

        let report = policy.sweep_expired(3601).unwrap();
        assert_eq!(report, SweepReport { expired: 1, anonymous: 0 });
        assert!(policy.load("s2").unwrap().is_none());
    }

    #[test]
    fn test_ttl_boundaries() {
        let policy = policy();
        policy.persist("anon-young", ANON, 71).unwrap();
        policy.persist("anon-edge", ANON, 70).unwrap();
        policy.persist("anon-old", ANON, 69).unwrap();
        policy.persist("auth-young", AUTH, 100).unwrap();
        policy.persist("auth-edge", AUTH, 100 - 3600).unwrap();

        // Anonymous: strictly older than 30s. Ceiling: 3600s or more.
        let report = policy.sweep_expired(100).unwrap();
        assert_eq!(report, SweepReport { expired: 1, anonymous: 1 });
        assert_eq!(ids(&policy), vec!["anon-edge", "anon-young", "auth-young"]);
    }

    #[test]
    fn test_malformed_payload_is_swept_as_anonymous() {
        let policy = policy();
        policy.persist("bad", b"user_id|i:42", 0).unwrap();
        assert_eq!(policy.sweep_expired(31).unwrap().anonymous, 1);
    }

    #[test]
    fn test_without_marker_everything_is_anonymous() {
        let policy =
            SessionPolicy::new(MemoryRecordStore::new(), &HandlerConfig::default()).unwrap();
        policy.persist("s", AUTH, 0).unwrap();
        assert_eq!(
            policy.classify(&policy.load("s").unwrap().unwrap()),
            Classification::Anonymous
        );
        assert_eq!(policy.sweep_expired(31).unwrap().anonymous, 1);
    }

    #[test]
    fn test_ceiling_override() {
        let policy = policy();
        policy.persist("old-auth", AUTH, 880).unwrap();
        policy.persist("old-anon", ANON, 880).unwrap();
        policy.persist("fresh", ANON, 990).unwrap();

        let report = policy.sweep_with_ceiling(1000, 60).unwrap();
        assert_eq!(report, SweepReport { expired: 2, anonymous: 0 });
        assert_eq!(ids(&policy), vec!["fresh"]);
    }

    #[test]
    fn test_negative_ceiling_is_rejected() {
        let policy = policy();
        policy.persist("s", AUTH, 990).unwrap();

        let err = policy.sweep_with_ceiling(1000, -1).unwrap_err();
        assert!(matches!(err, Error::InvalidLifetime(-1)));
        assert_eq!(ids(&policy), vec!["s"]);
    }

    #[test]
    fn test_persist_creates_then_updates() {
        let policy = policy();
        policy.persist("s3", b"payload-v1", 10).unwrap();
        policy.persist("s3", b"payload-v2", 20).unwrap();

        let record = policy.load("s3").unwrap().unwrap();
        assert_eq!(record.data, b"payload-v2");
        assert_eq!(record.timestamp, 20);
        assert_eq!(policy.store().len(), 1);
    }

    #[test]
    fn test_persist_keeps_timestamp_monotonic() {
        let policy = policy();
        policy.persist("s", b"a", 50).unwrap();
        policy.persist("s", b"b", 40).unwrap();
        assert_eq!(policy.load("s").unwrap().unwrap().timestamp, 50);
    }

    #[test]
    fn test_touch_reports_remaining_ttl() {
        let policy = policy();
        policy.persist("s", AUTH, 1000).unwrap();
        assert_eq!(policy.touch("s", 1600).unwrap(), Some(3000));
        assert_eq!(policy.touch("missing", 1600).unwrap(), None);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let policy = policy();
        policy.persist("s", b"", 0).unwrap();
        assert!(policy.remove("s").unwrap());
        assert!(!policy.remove("s").unwrap());
    }

    #[test]
    fn test_sweep_if_due_rate_limits() {
        let config = HandlerConfig::new()
            .with_auth_marker_key("user_id")
            .with_sweep_interval(std::time::Duration::from_secs(60));
        let policy = SessionPolicy::new(MemoryRecordStore::new(), &config).unwrap();

        assert!(policy.sweep_if_due(100).unwrap().is_some());
        policy.persist("s", ANON, 0).unwrap();
        assert!(policy.sweep_if_due(159).unwrap().is_none());
        assert!(policy.load("s").unwrap().is_some());

        let report = policy.sweep_if_due(160).unwrap().unwrap();
        assert_eq!(report.anonymous, 1);
    }

    #[test]
    fn test_zero_interval_sweeps_every_time() {
        let policy = policy();
        assert!(policy.sweep_if_due(5).unwrap().is_some());
        assert!(policy.sweep_if_due(5).unwrap().is_some());
    }

    /// Loses every create race once, as if another process got there first.
    struct RacingStore {
        inner: MemoryRecordStore,
        raced: Mutex<bool>,
    }

    impl RecordStore for RacingStore {
        fn find(&self, id: &str) -> Result<Option<SessionRecord>> {
            self.inner.find(id)
        }
        fn create(&self, record: &SessionRecord) -> Result<()> {
            let mut raced = self.raced.lock();
            if !*raced {
                *raced = true;
                self.inner
                    .create(&SessionRecord::new(&record.id, "other", record.timestamp))?;
                return Err(Error::DuplicateKey(record.id.clone()));
            }
            self.inner.create(record)
        }
        fn update(&self, record: &SessionRecord) -> Result<bool> {
            self.inner.update(record)
        }
        fn delete(&self, id: &str) -> Result<bool> {
            self.inner.delete(id)
        }
        fn delete_if_unchanged(&self, expected: &SessionRecord) -> Result<bool> {
            self.inner.delete_if_unchanged(expected)
        }
        fn all(&self) -> Result<Vec<SessionRecord>> {
            self.inner.all()
        }
        fn delete_before(&self, cutoff: i64) -> Result<u64> {
            self.inner.delete_before(cutoff)
        }
    }

    /// Another process logs the session in right after the sweep lists it.
    struct LoginDuringScan {
        inner: MemoryRecordStore,
        login: SessionRecord,
    }

    impl RecordStore for LoginDuringScan {
        fn find(&self, id: &str) -> Result<Option<SessionRecord>> {
            self.inner.find(id)
        }
        fn create(&self, record: &SessionRecord) -> Result<()> {
            self.inner.create(record)
        }
        fn update(&self, record: &SessionRecord) -> Result<bool> {
            self.inner.update(record)
        }
        fn delete(&self, id: &str) -> Result<bool> {
            self.inner.delete(id)
        }
        fn delete_if_unchanged(&self, expected: &SessionRecord) -> Result<bool> {
            self.inner.delete_if_unchanged(expected)
        }
        fn all(&self) -> Result<Vec<SessionRecord>> {
            let snapshot = self.inner.all()?;
            self.inner.update(&self.login)?;
            Ok(snapshot)
        }
        fn delete_before(&self, cutoff: i64) -> Result<u64> {
            self.inner.delete_before(cutoff)
        }
    }

    #[test]
    fn test_sweep_keeps_session_rewritten_during_scan() {
        let store = LoginDuringScan {
            inner: MemoryRecordStore::new(),
            login: SessionRecord::new("u", AUTH, 100),
        };
        let config = HandlerConfig::new().with_auth_marker_key("user_id");
        let policy = SessionPolicy::new(store, &config).unwrap();
        policy.persist("u", ANON, 0).unwrap();

        let report = policy.sweep_expired(100).unwrap();
        assert_eq!(report.anonymous, 0);
        let record = policy.load("u").unwrap().unwrap();
        assert_eq!(record.data, AUTH);
        assert_eq!(record.timestamp, 100);
    }

    #[test]
    fn test_duplicate_key_on_create_becomes_update() {
        let store = RacingStore {
            inner: MemoryRecordStore::new(),
            raced: Mutex::new(false),
        };
        let policy = SessionPolicy::new(store, &HandlerConfig::default()).unwrap();

        policy.persist("new", b"mine", 5).unwrap();
        assert_eq!(policy.store().inner.len(), 1);
        assert_eq!(policy.load("new").unwrap().unwrap().data, b"mine");
    }

    #[test]
    fn test_concurrent_writers_leave_one_record() {
        let policy = std::sync::Arc::new(policy());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let policy = policy.clone();
                std::thread::spawn(move || {
                    policy
                        .persist("shared", format!("w{i}").as_bytes(), 100 + i)
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(policy.store().len(), 1);
        assert_eq!(policy.load("shared").unwrap().unwrap().timestamp, 107);
    }
}

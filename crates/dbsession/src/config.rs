//! Configuration for the session handler.
//!
//! Configuration is TOML with a `[handler]` and a `[store]` section. Files
//! are layered (later overrides earlier, key by key):
//! 1. `$DBSESSION_CONFIG_DIR/config.toml`, or the platform config dir
//! 2. `./dbsession.toml` (project-local)
//!
//! Every field has a default, so an empty file is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::payload::CodecKind;
use crate::store::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_TABLE, validate_table_name};

/// Default lifetime of an authenticated session, in seconds.
pub const DEFAULT_SESSION_DURATION: u64 = 3600;

/// Default lifetime of an anonymous session, in seconds.
pub const DEFAULT_ANONYMOUS_MAX_LIFETIME: u64 = 30;

/// Default filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "dbsession.toml";

/// Default filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for config directory resolution.
const APP_NAME: &str = "dbsession";

/// Environment variable to override the user config directory.
const CONFIG_DIR_ENV: &str = "DBSESSION_CONFIG_DIR";

type Result<T> = std::result::Result<T, ConfigError>;

/// Lifecycle policy and handler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Seconds an authenticated session lives after its last write.
    /// Also the absolute ceiling for every session.
    pub session_duration: u64,

    /// Seconds an anonymous session lives after its last write.
    pub anonymous_max_lifetime: u64,

    /// Session field whose presence marks the session as authenticated.
    /// `None` disables classification: every session is anonymous.
    pub auth_marker_key: Option<String>,

    /// Minimum seconds between two sweeps triggered by `open`.
    /// Zero sweeps on every `open`.
    pub sweep_interval: u64,

    /// Serialization format of session payloads.
    pub codec: CodecKind,

    /// File that receives the diagnostic call log.
    pub log_file: Option<PathBuf>,

    /// Whether the diagnostic call log is written.
    pub debug_logging: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            session_duration: DEFAULT_SESSION_DURATION,
            anonymous_max_lifetime: DEFAULT_ANONYMOUS_MAX_LIFETIME,
            auth_marker_key: None,
            sweep_interval: 0,
            codec: CodecKind::default(),
            log_file: None,
            debug_logging: false,
        }
    }
}

impl HandlerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the authenticated session lifetime.
    pub fn with_session_duration(mut self, duration: Duration) -> Self {
        self.session_duration = duration.as_secs();
        self
    }

    /// Set the anonymous session lifetime.
    pub fn with_anonymous_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.anonymous_max_lifetime = lifetime.as_secs();
        self
    }

    /// Set the field that marks a session as authenticated.
    pub fn with_auth_marker_key(mut self, key: impl Into<String>) -> Self {
        self.auth_marker_key = Some(key.into());
        self
    }

    /// Rate-limit sweeps triggered by `open`.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.as_secs();
        self
    }

    /// Set the payload codec.
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    /// Write the diagnostic call log to `path`.
    pub fn with_debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self.debug_logging = true;
        self
    }

    /// Reject settings the policy cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.session_duration == 0 {
            return Err(ConfigError::Invalid(
                "handler.session_duration must be greater than zero".to_string(),
            ));
        }
        if i64::try_from(self.session_duration).is_err()
            || i64::try_from(self.anonymous_max_lifetime).is_err()
        {
            return Err(ConfigError::Invalid(
                "handler lifetimes must fit in a signed 64-bit second count".to_string(),
            ));
        }
        if self.auth_marker_key.as_deref() == Some("") {
            return Err(ConfigError::Invalid(
                "handler.auth_marker_key must not be empty; omit it to disable classification"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Record store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,

    /// Name of the session table.
    pub table: String,

    /// Milliseconds to wait on a locked database.
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    /// Reject a table name that is not a plain SQL identifier.
    pub fn validate(&self) -> Result<()> {
        validate_table_name(&self.table)
            .map_err(|e| ConfigError::Invalid(format!("store.table: {e}")))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sessions.db"),
            table: DEFAULT_TABLE.to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbSessionConfig {
    pub handler: HandlerConfig,
    pub store: StoreConfig,
}

impl DbSessionConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate both sections.
    pub fn validate(&self) -> Result<()> {
        self.handler.validate()?;
        self.store.validate()
    }
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: DbSessionConfig,
    /// Files that were found and merged, lowest precedence first.
    pub loaded_from: Vec<PathBuf>,
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<DbSessionConfig> {
    DbSessionConfig::from_toml(&read_file(path)?)
}

/// Load configuration by discovering and merging all config layers.
///
/// `project_dir` replaces the current directory when looking for
/// `dbsession.toml`. Missing files are skipped; unreadable or invalid
/// files are errors.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    let mut merged = toml::Table::new();
    let mut loaded_from = Vec::new();

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    let layers = user_config_path().into_iter().chain(Some(project_path));

    for path in layers {
        if !path.is_file() {
            continue;
        }
        let layer: toml::Table = toml::from_str(&read_file(&path)?)?;
        merge_tables(&mut merged, layer);
        loaded_from.push(path);
    }

    let config: DbSessionConfig = toml::Value::Table(merged).try_into()?;
    config.validate()?;
    Ok(LoadedConfig {
        config,
        loaded_from,
    })
}

/// Get the user config directory for dbsession.
///
/// Checks `DBSESSION_CONFIG_DIR` first, then falls back to the platform
/// default (`~/.config/dbsession` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Path of the user-level config file.
pub fn user_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })
}

/// Recursively merge `overlay` into `base`; overlay wins on conflicts.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

//! Optional append-only log of handler calls.
//!
//! Each entry is one line: local time, the session name passed to `open`,
//! and the call with its arguments. The file is opened for every line and
//! closed right after, so several processes can share it and rotation
//! needs no signal. A failed write is reported through `tracing` and never
//! fails the session operation.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::warn;

use crate::config::HandlerConfig;

/// File sink for the diagnostic call log.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    path: Option<PathBuf>,
}

impl DiagnosticLog {
    /// A log that writes to `path`.
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A log that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Enabled only when `debug_logging` is on and `log_file` is set.
    pub fn from_config(config: &HandlerConfig) -> Self {
        match (&config.log_file, config.debug_logging) {
            (Some(path), true) => Self::to_file(path.clone()),
            _ => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one entry.
    pub fn append(&self, context: &str, action: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let line = format!(
            "{} {} : {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            context,
            action
        );

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(line.as_bytes()));

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to write session diagnostic log");
        }
    }
}

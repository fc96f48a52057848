//! Store abstraction for a workbench's local state.
//!
//! A store is one directory holding the SQLite database, the broker audit log,
//! the configuration file and (by default) the local content store and ledger.
//! Stage history is durable here before any publication is attempted.

use std::env;
use std::path::{Path, PathBuf};

use crate::core::schemas;

/// Environment variable consulted when no `--store` flag is given.
pub const STORE_ENV_VAR: &str = "UNITPASS_STORE";
/// Default store directory, relative to the current directory.
pub const DEFAULT_STORE_DIR: &str = ".unitpass";

/// Store handle representing a workbench state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    /// Absolute or caller-relative path to the store root directory
    pub root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the store root: explicit flag, then `UNITPASS_STORE`, then `./.unitpass`.
    pub fn resolve(explicit: Option<PathBuf>, current_dir: &Path) -> Self {
        if let Some(root) = explicit {
            return Self::new(root);
        }
        match env::var(STORE_ENV_VAR) {
            Ok(v) if !v.trim().is_empty() => Self::new(v),
            _ => Self::new(current_dir.join(DEFAULT_STORE_DIR)),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(schemas::WORKBENCH_DB_NAME)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(schemas::CONFIG_FILE_NAME)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.root.join(schemas::BROKER_EVENTS_NAME)
    }

    /// Resolve a possibly relative path against the store root.
    pub fn resolve_path(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

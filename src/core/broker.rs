use crate::core::db;
use crate::core::error;
use crate::core::schemas;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The DB Broker is the thin waist for state access.
///
/// Every read and write against the workbench database passes through
/// `with_conn`, which opens a fresh connection and appends one audit line to
/// `broker.events.jsonl`. There is no process-wide lock: SQLite transactions
/// serialize commits, and per-unit ordering is enforced by `UnitLocks`.
#[derive(Debug, Clone)]
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub intent_ref: Option<String>,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join(schemas::BROKER_EVENTS_NAME),
        }
    }

    /// Execute a closure with a connection to the specified DB and audit the outcome.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        intent_ref: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, error::UnitpassError>
    where
        F: FnOnce(&Connection) -> Result<R, error::UnitpassError>,
    {
        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let conn = db::db_connect(&db_path.to_string_lossy())?;

        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        debug!(op = op_name, actor, db = %db_id, status, "broker op");
        self.log_event(actor, intent_ref, op_name, &db_id, status)?;

        result
    }

    fn log_event(
        &self,
        actor: &str,
        intent_ref: Option<&str>,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), error::UnitpassError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            intent_ref: intent_ref.map(|s| s.to_string()),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        // One write per line so concurrent appends do not interleave.
        let line = format!("{}\n", serde_json::to_string(&ev)?);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .map_err(error::UnitpassError::IoError)?;
        f.write_all(line.as_bytes())
            .map_err(error::UnitpassError::IoError)?;
        Ok(())
    }

    /// Parse the audit log. Malformed lines are skipped.
    pub fn read_events(&self) -> Result<Vec<BrokerEvent>, error::UnitpassError> {
        if !self.audit_log_path.exists() {
            return Ok(Vec::new());
        }
        let content =
            fs::read_to_string(&self.audit_log_path).map_err(error::UnitpassError::IoError)?;
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str::<BrokerEvent>(line).ok())
            .collect())
    }
}

use std::io;
use thiserror::Error;

/// Failure of one of the two external publication steps.
///
/// Always retryable: nothing about the unit's stage history is touched when one
/// of these is raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublicationError {
    #[error("content store upload failed: {0}")]
    ContentStore(String),
    #[error("ledger anchoring failed: {0}")]
    Ledger(String),
    #[error("publication cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum UnitpassError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Failed to initialize database: {0}")]
    DatabaseInitializationError(String),

    #[error("Schema not found: {0}")]
    SchemaNotFound(String),
    #[error("Unit not found: {0}")]
    UnitNotFound(String),
    #[error("Stage '{stage_id}' is not part of schema '{schema_id}'")]
    StageNotFound { schema_id: String, stage_id: String },
    #[error("Unknown employee: no badge registered for RFID card '{0}'")]
    UnknownEmployee(String),

    #[error("Stage '{requested}' is out of order: {reason}")]
    OutOfOrder { requested: String, reason: String },
    #[error("Unit {unit_uuid} already has stage '{open_stage_id}' in progress")]
    StageAlreadyInProgress {
        unit_uuid: String,
        open_stage_id: String,
    },
    #[error("Unit {unit_uuid} has no open record for stage '{stage_id}'")]
    NoOpenStage { unit_uuid: String, stage_id: String },
    #[error("Schema dependency cycle detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unit {unit_uuid} is not ready for certification (status {status})")]
    NotReady { unit_uuid: String, status: String },
    #[error("Unit {0} is being published; no stage can be added")]
    UnitPublishing(String),
    #[error("Publication of unit {0} is no longer owned by this attempt")]
    PublicationSuperseded(String),
    #[error("Unit {unit_uuid}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        unit_uuid: String,
        from: String,
        to: String,
    },

    #[error("Publication error: {0}")]
    Publication(#[from] PublicationError),
}

/// Coarse error classes surfaced to workstations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    State,
    Publication,
    Internal,
}

impl UnitpassError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnitpassError::SchemaNotFound(_)
            | UnitpassError::UnitNotFound(_)
            | UnitpassError::StageNotFound { .. }
            | UnitpassError::UnknownEmployee(_) => ErrorKind::NotFound,
            UnitpassError::OutOfOrder { .. }
            | UnitpassError::StageAlreadyInProgress { .. }
            | UnitpassError::NoOpenStage { .. }
            | UnitpassError::CycleDetected { .. }
            | UnitpassError::ValidationError(_) => ErrorKind::Validation,
            UnitpassError::NotReady { .. }
            | UnitpassError::UnitPublishing(_)
            | UnitpassError::PublicationSuperseded(_)
            | UnitpassError::InvalidTransition { .. } => ErrorKind::State,
            UnitpassError::Publication(_) => ErrorKind::Publication,
            UnitpassError::RusqliteError(_)
            | UnitpassError::IoError(_)
            | UnitpassError::SerializationError(_)
            | UnitpassError::ConfigError(_)
            | UnitpassError::DatabaseInitializationError(_) => ErrorKind::Internal,
        }
    }

    /// Only publication failures may be retried; everything else needs an operator.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UnitpassError::Publication(e) if *e != PublicationError::Cancelled)
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::NotFound | ErrorKind::Validation | ErrorKind::State => 2,
            ErrorKind::Publication => 3,
            ErrorKind::Internal => 1,
        }
    }
}

impl From<toml::de::Error> for UnitpassError {
    fn from(e: toml::de::Error) -> Self {
        UnitpassError::ConfigError(e.to_string())
    }
}

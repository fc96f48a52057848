//! Centralized database schema definitions for the workbench store.
//!
//! One SQLite database ("workbench.db") holds four collections:
//! 1. production_schemas: immutable templates, loaded once per process.
//! 2. employees: the badge directory.
//! 3. units: live unit instances (one row per unit, sub-units included).
//! 4. stage_records: append-only stage history keyed by (unit_uuid, seq).

pub const WORKBENCH_DB_NAME: &str = "workbench.db";
pub const BROKER_EVENTS_NAME: &str = "broker.events.jsonl";
pub const CONFIG_FILE_NAME: &str = "unitpass.toml";

pub const SCHEMA_DB_SCHEMA_TEMPLATES: &str = "
    CREATE TABLE IF NOT EXISTS production_schemas (
        schema_id TEXT PRIMARY KEY,
        parent_schema_id TEXT,
        schema_type TEXT NOT NULL,
        unit_name TEXT NOT NULL,
        document TEXT NOT NULL, -- canonical JSON of the full template
        content_hash TEXT NOT NULL,
        imported_at TEXT NOT NULL
    )
";
pub const SCHEMA_DB_SCHEMA_PARENT_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_production_schemas_parent ON production_schemas(parent_schema_id)";

pub const EMPLOYEE_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS employees (
        rfid_card_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        position TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

// parent_unit_uuid is a lookup-only back-reference; it carries no foreign key so
// ownership stays with the parent's row set, not with the child.
pub const UNIT_DB_SCHEMA_UNITS: &str = "
    CREATE TABLE IF NOT EXISTS units (
        uuid TEXT PRIMARY KEY,
        internal_id TEXT NOT NULL,
        schema_id TEXT NOT NULL,
        status TEXT NOT NULL,
        parent_unit_uuid TEXT,
        component_index INTEGER,
        content_address TEXT,
        ledger_reference TEXT,
        failure_reason TEXT,
        publication_claim TEXT, -- set only while status is Publishing
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
";
pub const UNIT_DB_SCHEMA_INTERNAL_ID_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_units_internal_id ON units(internal_id)";
pub const UNIT_DB_SCHEMA_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_units_status ON units(status)";
pub const UNIT_DB_SCHEMA_PARENT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_units_parent ON units(parent_unit_uuid, component_index)";

pub const UNIT_DB_SCHEMA_STAGE_RECORDS: &str = "
    CREATE TABLE IF NOT EXISTS stage_records (
        unit_uuid TEXT NOT NULL,
        seq INTEGER NOT NULL,
        stage_id TEXT NOT NULL,
        employee_rfid_card_id TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        completed_at INTEGER,
        actual_duration_seconds INTEGER,
        interrupted INTEGER NOT NULL DEFAULT 0,
        additional_info TEXT NOT NULL DEFAULT '{}', -- JSON object, sorted keys
        PRIMARY KEY (unit_uuid, seq),
        FOREIGN KEY(unit_uuid) REFERENCES units(uuid)
    )
";

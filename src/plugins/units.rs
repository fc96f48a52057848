//! Unit persistence and the Unit Instantiator.
//!
//! A unit tree is written in one transaction: either every sub-unit row exists
//! or none does. Stage records are append-only; only the sealing fields of the
//! open record are ever updated.
//!
//! Every read-modify-write of a unit (`UnitStore::update`) runs inside one
//! `BEGIN IMMEDIATE` transaction, so workstations in separate processes are
//! serialized by SQLite's write lock.

use crate::core::broker::DbBroker;
use crate::core::error::{self, UnitpassError};
use crate::core::model::{StageRecord, Unit, UnitStatus};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::registry::SchemaRegistry;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;
use ulid::{Generator, Ulid};

pub fn initialize_unit_db(root: &Path) -> Result<(), error::UnitpassError> {
    let broker = DbBroker::new(root);
    let db_path = root.join(schemas::WORKBENCH_DB_NAME);

    broker.with_conn(&db_path, "unitpass", None, "unit.init", |conn| {
        conn.execute(schemas::UNIT_DB_SCHEMA_UNITS, [])?;
        conn.execute(schemas::UNIT_DB_SCHEMA_INTERNAL_ID_INDEX, [])?;
        conn.execute(schemas::UNIT_DB_SCHEMA_STATUS_INDEX, [])?;
        conn.execute(schemas::UNIT_DB_SCHEMA_PARENT_INDEX, [])?;
        conn.execute(schemas::UNIT_DB_SCHEMA_STAGE_RECORDS, [])?;
        Ok(())
    })
}

// --- internal ids ---

fn ean13_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{13}$").expect("static EAN-13 pattern"))
}

/// True when `s` has the shape of an EAN-13 barcode (13 digits).
pub fn is_ean13_barcode(s: &str) -> bool {
    ean13_regex().is_match(s)
}

/// Standard EAN-13 check digit for the first 12 digits.
pub fn ean13_check_digit(first12: &str) -> Option<u32> {
    if first12.len() != 12 {
        return None;
    }
    let mut sum = 0u32;
    for (i, c) in first12.chars().enumerate() {
        let d = c.to_digit(10)?;
        sum += if i % 2 == 0 { d } else { d * 3 };
    }
    Some((10 - sum % 10) % 10)
}

/// Derive an EAN-13 code from a unit's ULID.
pub fn generate_internal_id(id: Ulid) -> String {
    let body = format!("{:012}", id.0 % 1_000_000_000_000u128);
    // body is always 12 ASCII digits
    let check = ean13_check_digit(&body).unwrap_or(0);
    format!("{}{}", body, check)
}

pub fn validate_internal_id(internal_id: &str) -> Result<(), UnitpassError> {
    if internal_id.is_empty() {
        return Err(UnitpassError::ValidationError(
            "internal_id cannot be empty".to_string(),
        ));
    }
    if internal_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err(UnitpassError::ValidationError(format!(
            "invalid internal_id '{}': allowed characters are [A-Za-z0-9_-]",
            internal_id
        )))
    }
}

// --- instantiation ---

fn build_tree(
    registry: &SchemaRegistry,
    ids: &mut Generator,
    schema_id: &str,
    internal_id: Option<&str>,
) -> Result<Unit, UnitpassError> {
    let schema = registry.resolve(schema_id)?;

    // Components are allocated (and timestamped) before the unit that owns them.
    let mut sub_units = Vec::with_capacity(schema.required_component_schema_ids.len());
    for component_schema_id in &schema.required_component_schema_ids {
        sub_units.push(build_tree(registry, ids, component_schema_id, None)?);
    }

    // Monotonic, so the owner's id sorts after every component minted above.
    let id = ids
        .generate()
        .map_err(|e| UnitpassError::ValidationError(format!("cannot allocate unit id: {}", e)))?;
    let uuid = id.to_string();
    for sub in &mut sub_units {
        sub.parent_unit_uuid = Some(uuid.clone());
    }

    let now = time::now_epoch_secs();
    Ok(Unit {
        uuid,
        internal_id: internal_id
            .map(str::to_string)
            .unwrap_or_else(|| generate_internal_id(id)),
        schema_id: schema.schema_id.clone(),
        status: UnitStatus::Created,
        sub_units,
        stage_records: Vec::new(),
        parent_unit_uuid: None,
        content_address: None,
        ledger_reference: None,
        failure_reason: None,
        publication_claim: None,
        created_at: now,
        updated_at: now,
    })
}

/// Create a unit of `schema_id` and, recursively, one sub-unit per required component.
///
/// Nothing is visible to other components until the whole tree has committed.
pub fn instantiate(
    registry: &SchemaRegistry,
    units: &UnitStore,
    schema_id: &str,
    internal_id: Option<&str>,
) -> Result<Unit, UnitpassError> {
    if let Some(id) = internal_id {
        validate_internal_id(id)?;
    }
    registry.dependency_closure(schema_id)?;

    let unit = build_tree(registry, &mut Generator::new(), schema_id, internal_id)?;
    units.insert_tree(&unit)?;
    info!(
        uuid = %unit.uuid,
        internal_id = %unit.internal_id,
        schema_id,
        sub_units = unit.sub_units.len(),
        "unit instantiated"
    );
    Ok(unit)
}

// --- persistence ---

/// Row-level view used by dashboards and status scans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitSummary {
    pub uuid: String,
    pub internal_id: String,
    pub schema_id: String,
    pub unit_name: String,
    pub status: UnitStatus,
    pub parent_unit_uuid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UnitStore {
    store: Store,
    broker: DbBroker,
}

struct UnitRow {
    uuid: String,
    internal_id: String,
    schema_id: String,
    status: String,
    parent_unit_uuid: Option<String>,
    content_address: Option<String>,
    ledger_reference: Option<String>,
    failure_reason: Option<String>,
    publication_claim: Option<String>,
    created_at: i64,
    updated_at: i64,
}

const UNIT_COLUMNS: &str = "uuid, internal_id, schema_id, status, parent_unit_uuid, content_address, ledger_reference, failure_reason, publication_claim, created_at, updated_at";

fn map_unit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UnitRow> {
    Ok(UnitRow {
        uuid: row.get(0)?,
        internal_id: row.get(1)?,
        schema_id: row.get(2)?,
        status: row.get(3)?,
        parent_unit_uuid: row.get(4)?,
        content_address: row.get(5)?,
        ledger_reference: row.get(6)?,
        failure_reason: row.get(7)?,
        publication_claim: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn insert_unit_rows(
    conn: &Connection,
    unit: &Unit,
    component_index: Option<usize>,
) -> Result<(), UnitpassError> {
    conn.execute(
        "INSERT INTO units(uuid, internal_id, schema_id, status, parent_unit_uuid, component_index, content_address, ledger_reference, failure_reason, publication_claim, created_at, updated_at) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            unit.uuid,
            unit.internal_id,
            unit.schema_id,
            unit.status.as_str(),
            unit.parent_unit_uuid,
            component_index.map(|i| i as i64),
            unit.content_address,
            unit.ledger_reference,
            unit.failure_reason,
            unit.publication_claim,
            unit.created_at as i64,
            unit.updated_at as i64
        ],
    )?;
    for (i, sub) in unit.sub_units.iter().enumerate() {
        insert_unit_rows(conn, sub, Some(i))?;
    }
    Ok(())
}

fn load_records(conn: &Connection, unit_uuid: &str) -> Result<Vec<StageRecord>, UnitpassError> {
    let mut stmt = conn.prepare(
        "SELECT seq, stage_id, employee_rfid_card_id, started_at, completed_at, actual_duration_seconds, interrupted, additional_info
         FROM stage_records WHERE unit_uuid = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![unit_uuid], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, Option<i64>>(4)?,
            row.get::<_, Option<i64>>(5)?,
            row.get::<_, bool>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;
    let mut out = Vec::new();
    for r in rows {
        let (seq, stage_id, employee, started, completed, duration, interrupted, info) = r?;
        let additional_info: BTreeMap<String, String> = serde_json::from_str(&info)?;
        out.push(StageRecord {
            seq: seq as u32,
            stage_id,
            employee_rfid_card_id: employee,
            started_at: started as u64,
            completed_at: completed.map(|v| v as u64),
            actual_duration_seconds: duration.map(|v| v as u64),
            interrupted,
            additional_info,
        });
    }
    Ok(out)
}

fn load_tree(conn: &Connection, row: UnitRow) -> Result<Unit, UnitpassError> {
    let child_rows = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM units WHERE parent_unit_uuid = ?1 ORDER BY component_index",
            UNIT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![row.uuid], map_unit_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        out
    };
    let mut sub_units = Vec::with_capacity(child_rows.len());
    for child in child_rows {
        sub_units.push(load_tree(conn, child)?);
    }

    let stage_records = load_records(conn, &row.uuid)?;
    Ok(Unit {
        status: row.status.parse()?,
        uuid: row.uuid,
        internal_id: row.internal_id,
        schema_id: row.schema_id,
        sub_units,
        stage_records,
        parent_unit_uuid: row.parent_unit_uuid,
        content_address: row.content_address,
        ledger_reference: row.ledger_reference,
        failure_reason: row.failure_reason,
        publication_claim: row.publication_claim,
        created_at: row.created_at as u64,
        updated_at: row.updated_at as u64,
    })
}

fn load_unit(conn: &Connection, uuid: &str) -> Result<Unit, UnitpassError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM units WHERE uuid = ?1", UNIT_COLUMNS),
            params![uuid],
            map_unit_row,
        )
        .optional()?
        .ok_or_else(|| UnitpassError::UnitNotFound(uuid.to_string()))?;
    load_tree(conn, row)
}

/// Write a unit's own row and stage history; sub-units are untouched.
fn write_unit(conn: &Connection, unit: &Unit) -> Result<(), UnitpassError> {
    let changed = conn.execute(
        "UPDATE units SET status = ?1, content_address = ?2, ledger_reference = ?3, failure_reason = ?4, publication_claim = ?5, updated_at = ?6 WHERE uuid = ?7",
        params![
            unit.status.as_str(),
            unit.content_address,
            unit.ledger_reference,
            unit.failure_reason,
            unit.publication_claim,
            unit.updated_at as i64,
            unit.uuid
        ],
    )?;
    if changed == 0 {
        return Err(UnitpassError::UnitNotFound(unit.uuid.clone()));
    }

    // (stage_id, employee, started_at) of every stored record, by seq.
    let stored: BTreeMap<u32, (String, String, i64)> = {
        let mut stmt = conn.prepare(
            "SELECT seq, stage_id, employee_rfid_card_id, started_at FROM stage_records WHERE unit_uuid = ?1",
        )?;
        let rows = stmt.query_map(params![unit.uuid], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                (row.get::<_, String>(1)?, row.get::<_, String>(2)?, row.get::<_, i64>(3)?),
            ))
        })?;
        let mut out = BTreeMap::new();
        for r in rows {
            let (seq, identity) = r?;
            out.insert(seq as u32, identity);
        }
        out
    };

    for record in &unit.stage_records {
        let info = serde_json::to_string(&record.additional_info)?;
        match stored.get(&record.seq) {
            Some((stage_id, employee, started_at))
                if *stage_id != record.stage_id
                    || *employee != record.employee_rfid_card_id
                    || *started_at != record.started_at as i64 =>
            {
                return Err(UnitpassError::ValidationError(format!(
                    "stage record {} of unit {} was written by another workstation",
                    record.seq, unit.uuid
                )));
            }
            Some(_) => {
                if record.is_open() {
                    continue;
                }
                // Existing rows only ever gain their sealing fields.
                conn.execute(
                    "UPDATE stage_records SET completed_at = ?1, actual_duration_seconds = ?2, interrupted = ?3, additional_info = ?4
                     WHERE unit_uuid = ?5 AND seq = ?6 AND completed_at IS NULL",
                    params![
                        record.completed_at.map(|v| v as i64),
                        record.actual_duration_seconds.map(|v| v as i64),
                        record.interrupted,
                        info,
                        unit.uuid,
                        record.seq as i64
                    ],
                )?;
            }
            None => {
                // A plain insert: a seq taken meanwhile fails instead of merging.
                conn.execute(
                    "INSERT INTO stage_records(unit_uuid, seq, stage_id, employee_rfid_card_id, started_at, completed_at, actual_duration_seconds, interrupted, additional_info)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        unit.uuid,
                        record.seq as i64,
                        record.stage_id,
                        record.employee_rfid_card_id,
                        record.started_at as i64,
                        record.completed_at.map(|v| v as i64),
                        record.actual_duration_seconds.map(|v| v as i64),
                        record.interrupted,
                        info
                    ],
                )?;
            }
        }
    }
    Ok(())
}

impl UnitStore {
    pub fn new(store: Store) -> Self {
        let broker = DbBroker::new(&store.root);
        Self { store, broker }
    }

    /// Persist a freshly instantiated tree atomically.
    pub fn insert_tree(&self, unit: &Unit) -> Result<(), UnitpassError> {
        self.broker
            .with_conn(&self.store.db_path(), "unitpass", None, "unit.create", |conn| {
                let tx = conn.unchecked_transaction()?;
                insert_unit_rows(&tx, unit, None)?;
                tx.commit()?;
                Ok(())
            })
    }

    /// Load a unit with its sub-unit tree and stage history.
    pub fn load(&self, uuid: &str) -> Result<Unit, UnitpassError> {
        self.broker
            .with_conn(&self.store.db_path(), "unitpass", None, "unit.get", |conn| {
                load_unit(conn, uuid)
            })
    }

    /// Load a unit, apply `f` and write it back under one IMMEDIATE transaction.
    ///
    /// The write lock is taken before the read, so a concurrent writer in any
    /// process sees the result of `f` or runs entirely before it. Nothing is
    /// written when `f` fails.
    pub fn update<F, R>(&self, uuid: &str, actor: &str, op: &str, f: F) -> Result<R, UnitpassError>
    where
        F: FnOnce(&mut Unit) -> Result<R, UnitpassError>,
    {
        self.broker
            .with_conn(&self.store.db_path(), actor, Some(uuid), op, |conn| {
                let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
                let mut unit = load_unit(&tx, uuid)?;
                let out = f(&mut unit)?;
                write_unit(&tx, &unit)?;
                tx.commit()?;
                Ok(out)
            })
    }

    pub fn load_by_internal_id(&self, internal_id: &str) -> Result<Unit, UnitpassError> {
        let uuid: Option<String> = self.broker.with_conn(
            &self.store.db_path(),
            "unitpass",
            None,
            "unit.find",
            |conn| {
                Ok(conn
                    .query_row(
                        "SELECT uuid FROM units WHERE internal_id = ?1",
                        params![internal_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            },
        )?;
        match uuid {
            Some(uuid) => self.load(&uuid),
            None => Err(UnitpassError::UnitNotFound(format!(
                "internal_id {}",
                internal_id
            ))),
        }
    }

    /// Status-filtered scan; `None` lists every unit.
    pub fn list(
        &self,
        registry: &SchemaRegistry,
        status: Option<UnitStatus>,
    ) -> Result<Vec<UnitSummary>, UnitpassError> {
        let rows = self
            .broker
            .with_conn(&self.store.db_path(), "unitpass", None, "unit.list", |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM units WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at, uuid",
                    UNIT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![status.map(|s| s.as_str())], map_unit_row)?;
                let mut out = Vec::new();
                for r in rows {
                    out.push(r?);
                }
                Ok(out)
            })?;

        rows.into_iter()
            .map(|row| {
                let unit_name = registry
                    .resolve(&row.schema_id)
                    .map(|s| s.unit_name.clone())
                    .unwrap_or_default();
                Ok(UnitSummary {
                    status: row.status.parse()?,
                    uuid: row.uuid,
                    internal_id: row.internal_id,
                    schema_id: row.schema_id,
                    unit_name,
                    parent_unit_uuid: row.parent_unit_uuid,
                })
            })
            .collect()
    }

    /// Write a unit's own row and stage history (sub-units are untouched).
    pub fn save(&self, unit: &Unit, actor: &str, op: &str) -> Result<(), UnitpassError> {
        self.broker
            .with_conn(&self.store.db_path(), actor, Some(&unit.uuid), op, |conn| {
                let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
                write_unit(&tx, unit)?;
                tx.commit()?;
                Ok(())
            })
    }

    /// Units left in `Publishing` by a process that died mid-publish go back to
    /// `AwaitingCertification` and lose their publication claim. Cached
    /// addresses are kept.
    ///
    /// A live publisher in another process cannot be told apart from a dead one,
    /// so this only runs when an operator asks for it.
    pub fn recover_interrupted_publications(&self) -> Result<Vec<String>, UnitpassError> {
        self.broker.with_conn(
            &self.store.db_path(),
            "unitpass",
            None,
            "unit.recover",
            |conn| {
                let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
                let uuids = {
                    let mut stmt = tx.prepare("SELECT uuid FROM units WHERE status = ?1")?;
                    let rows = stmt.query_map(params![UnitStatus::Publishing.as_str()], |row| {
                        row.get::<_, String>(0)
                    })?;
                    let mut out = Vec::new();
                    for r in rows {
                        out.push(r?);
                    }
                    out
                };
                tx.execute(
                    "UPDATE units SET status = ?1, publication_claim = NULL, updated_at = ?2 WHERE status = ?3",
                    params![
                        UnitStatus::AwaitingCertification.as_str(),
                        time::now_epoch_secs() as i64,
                        UnitStatus::Publishing.as_str()
                    ],
                )?;
                tx.commit()?;
                Ok(uuids)
            },
        )
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "unit",
        "version": "0.1.0",
        "description": "Live unit instances and their sub-unit trees",
        "commands": [
            { "name": "create", "parameters": ["schema", "internal_id"] },
            { "name": "show", "parameters": ["uuid"] },
            { "name": "find", "parameters": ["internal_id"] },
            { "name": "list", "parameters": ["status"] },
            { "name": "abandon", "parameters": ["uuid", "reason"] }
        ],
        "storage": ["workbench.db"]
    })
}

use crate::core::broker::DbBroker;
use crate::core::error::{self, UnitpassError};
use crate::core::model::Employee;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use rusqlite::{OptionalExtension, params};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Badge directory consulted before a stage record is opened.
pub trait EmployeeDirectory: Send + Sync {
    /// Fails with `UnknownEmployee` when no badge matches.
    fn get(&self, rfid_card_id: &str) -> Result<Employee, UnitpassError>;

    /// Case-insensitive substring match over card id, name and position.
    fn search(&self, text: &str) -> Result<Vec<Employee>, UnitpassError>;
}

pub fn initialize_employee_db(root: &Path) -> Result<(), error::UnitpassError> {
    let broker = DbBroker::new(root);
    let db_path = root.join(schemas::WORKBENCH_DB_NAME);

    broker.with_conn(&db_path, "unitpass", None, "employee.init", |conn| {
        conn.execute(schemas::EMPLOYEE_DB_SCHEMA, [])?;
        Ok(())
    })
}

pub fn upsert_employee(store: &Store, employee: &Employee) -> Result<(), UnitpassError> {
    if employee.rfid_card_id.trim().is_empty() {
        return Err(UnitpassError::ValidationError(
            "rfid_card_id cannot be empty".to_string(),
        ));
    }
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "unitpass", None, "employee.upsert", |conn| {
        conn.execute(
            "INSERT INTO employees(rfid_card_id, name, position, updated_at) VALUES(?1, ?2, ?3, ?4)
             ON CONFLICT(rfid_card_id) DO UPDATE SET name = excluded.name, position = excluded.position, updated_at = excluded.updated_at",
            params![
                employee.rfid_card_id,
                employee.name,
                employee.position,
                time::now_epoch_z()
            ],
        )?;
        Ok(())
    })
}

/// Load a JSON array of employee documents. Returns how many were written.
pub fn import_employees(store: &Store, path: &Path) -> Result<usize, UnitpassError> {
    let raw = fs::read_to_string(path).map_err(UnitpassError::IoError)?;
    let docs: Vec<Employee> = serde_json::from_str(&raw).map_err(|e| {
        UnitpassError::ValidationError(format!("invalid employee file {}: {}", path.display(), e))
    })?;
    for employee in &docs {
        upsert_employee(store, employee)?;
    }
    info!(count = docs.len(), "employees imported");
    Ok(docs.len())
}

#[derive(Debug, Clone)]
pub struct SqliteEmployeeDirectory {
    store: Store,
}

impl SqliteEmployeeDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

impl EmployeeDirectory for SqliteEmployeeDirectory {
    fn get(&self, rfid_card_id: &str) -> Result<Employee, UnitpassError> {
        let broker = DbBroker::new(&self.store.root);
        let found = broker.with_conn(
            &self.store.db_path(),
            "unitpass",
            None,
            "employee.get",
            |conn| {
                Ok(conn
                    .query_row(
                        "SELECT rfid_card_id, name, position FROM employees WHERE rfid_card_id = ?1",
                        params![rfid_card_id],
                        |row| {
                            Ok(Employee {
                                rfid_card_id: row.get(0)?,
                                name: row.get(1)?,
                                position: row.get(2)?,
                            })
                        },
                    )
                    .optional()?)
            },
        )?;
        debug!(rfid_card_id, found = found.is_some(), "employee lookup");
        found.ok_or_else(|| UnitpassError::UnknownEmployee(rfid_card_id.to_string()))
    }

    fn search(&self, text: &str) -> Result<Vec<Employee>, UnitpassError> {
        let pattern = format!("%{}%", text.to_lowercase());
        let broker = DbBroker::new(&self.store.root);
        broker.with_conn(
            &self.store.db_path(),
            "unitpass",
            None,
            "employee.search",
            |conn| {
                let mut stmt = conn.prepare(
                    "SELECT rfid_card_id, name, position FROM employees
                     WHERE lower(rfid_card_id) LIKE ?1 OR lower(name) LIKE ?1 OR lower(position) LIKE ?1
                     ORDER BY name, rfid_card_id",
                )?;
                let rows = stmt.query_map(params![pattern], |row| {
                    Ok(Employee {
                        rfid_card_id: row.get(0)?,
                        name: row.get(1)?,
                        position: row.get(2)?,
                    })
                })?;
                let mut out = Vec::new();
                for r in rows {
                    out.push(r?);
                }
                Ok(out)
            },
        )
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "employee",
        "version": "0.1.0",
        "description": "RFID badge directory",
        "commands": [
            { "name": "import", "parameters": ["file"] },
            { "name": "search", "parameters": ["text"] },
            { "name": "show", "parameters": ["card"] }
        ],
        "storage": ["workbench.db"]
    })
}

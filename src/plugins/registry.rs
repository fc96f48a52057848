//! Schema Registry: immutable production-schema templates.
//!
//! Templates are written once by `import_schemas` (configuration load) and read
//! into a `SchemaRegistry` at process start. The registry validates the whole
//! component graph up front (missing references, type/component mismatches,
//! cycles) and exposes read-only lookups afterwards.

use crate::core::broker::DbBroker;
use crate::core::error::{self, UnitpassError};
use crate::core::model::ProductionSchema;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::info;

pub fn initialize_schema_db(root: &Path) -> Result<(), error::UnitpassError> {
    let broker = DbBroker::new(root);
    let db_path = root.join(schemas::WORKBENCH_DB_NAME);

    broker.with_conn(&db_path, "unitpass", None, "schema.init", |conn| {
        conn.execute(schemas::SCHEMA_DB_SCHEMA_TEMPLATES, [])?;
        conn.execute(schemas::SCHEMA_DB_SCHEMA_PARENT_INDEX, [])?;
        Ok(())
    })
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Insert one template. Returns `false` when an identical document already exists.
///
/// Templates are immutable: a different document under an existing id is refused.
pub fn insert_schema(store: &Store, schema: &ProductionSchema) -> Result<bool, UnitpassError> {
    schema.validate_shape()?;
    let document = String::from_utf8(schema.canonical_json_bytes()?)
        .map_err(|e| UnitpassError::ValidationError(e.to_string()))?;
    let hash = schema.canonical_hash_hex()?;
    let broker = DbBroker::new(&store.root);

    broker.with_conn(&store.db_path(), "unitpass", None, "schema.insert", |conn| {
        let existing: Option<String> = conn
            .query_row(
                "SELECT content_hash FROM production_schemas WHERE schema_id = ?1",
                params![schema.schema_id],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(h) if h == hash => Ok(false),
            Some(_) => Err(UnitpassError::ValidationError(format!(
                "schema '{}' already exists with different content; schemas are immutable",
                schema.schema_id
            ))),
            None => {
                conn.execute(
                    "INSERT INTO production_schemas(schema_id, parent_schema_id, schema_type, unit_name, document, content_hash, imported_at) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        schema.schema_id,
                        schema.parent_schema_id,
                        schema.schema_type.as_str(),
                        schema.unit_name,
                        document,
                        hash,
                        time::now_epoch_z()
                    ],
                )?;
                Ok(true)
            }
        }
    })
}

/// Load a JSON array of schema documents into the store.
///
/// The file is checked together with what is already stored (immutability,
/// references, cycles) before anything is written.
pub fn import_schemas(store: &Store, path: &Path) -> Result<ImportReport, UnitpassError> {
    let raw = fs::read_to_string(path).map_err(UnitpassError::IoError)?;
    let docs: Vec<ProductionSchema> = serde_json::from_str(&raw).map_err(|e| {
        UnitpassError::ValidationError(format!("invalid schema file {}: {}", path.display(), e))
    })?;

    let mut combined: BTreeMap<String, ProductionSchema> = read_all_schemas(store)?
        .into_iter()
        .map(|s| (s.schema_id.clone(), s))
        .collect();
    for schema in &docs {
        if let Some(existing) = combined.get(&schema.schema_id)
            && existing.canonical_hash_hex()? != schema.canonical_hash_hex()?
        {
            return Err(UnitpassError::ValidationError(format!(
                "schema '{}' already exists with different content; schemas are immutable",
                schema.schema_id
            )));
        }
        combined.insert(schema.schema_id.clone(), schema.clone());
    }
    SchemaRegistry::from_schemas(combined.into_values().collect())?;

    let mut report = ImportReport::default();
    for schema in &docs {
        if insert_schema(store, schema)? {
            report.inserted.push(schema.schema_id.clone());
        } else {
            report.unchanged.push(schema.schema_id.clone());
        }
    }
    info!(
        inserted = report.inserted.len(),
        unchanged = report.unchanged.len(),
        "schemas imported"
    );
    Ok(report)
}

fn read_all_schemas(store: &Store) -> Result<Vec<ProductionSchema>, UnitpassError> {
    let broker = DbBroker::new(&store.root);
    broker.with_conn(&store.db_path(), "unitpass", None, "schema.load", |conn| {
        let mut stmt =
            conn.prepare("SELECT schema_id, document FROM production_schemas ORDER BY schema_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (id, doc) = r?;
            let schema: ProductionSchema = serde_json::from_str(&doc).map_err(|e| {
                UnitpassError::ValidationError(format!("stored schema '{}' is corrupt: {}", id, e))
            })?;
            out.push(schema);
        }
        Ok(out)
    })
}

/// Read-only view over every production schema, validated as a DAG.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, ProductionSchema>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl SchemaRegistry {
    /// Load and validate every template in the store.
    pub fn load(store: &Store) -> Result<Self, UnitpassError> {
        let registry = Self::from_schemas(read_all_schemas(store)?)?;
        info!(schemas = registry.len(), "schema registry loaded");
        Ok(registry)
    }

    /// Build a registry from in-memory templates, failing fast on any broken reference.
    pub fn from_schemas(list: Vec<ProductionSchema>) -> Result<Self, UnitpassError> {
        let mut schemas = BTreeMap::new();
        for schema in list {
            schema.validate_shape()?;
            if schemas.contains_key(&schema.schema_id) {
                return Err(UnitpassError::ValidationError(format!(
                    "schema '{}' is defined twice",
                    schema.schema_id
                )));
            }
            schemas.insert(schema.schema_id.clone(), schema);
        }

        for schema in schemas.values() {
            for dep in &schema.required_component_schema_ids {
                if !schemas.contains_key(dep) {
                    return Err(UnitpassError::SchemaNotFound(format!(
                        "'{}' (required by '{}')",
                        dep, schema.schema_id
                    )));
                }
            }
        }

        let registry = Self { schemas };
        let mut marks = HashMap::new();
        for id in registry.schemas.keys() {
            let mut out = Vec::new();
            registry.visit(id, &mut marks, &mut Vec::new(), &mut out)?;
        }
        Ok(registry)
    }

    pub fn resolve(&self, schema_id: &str) -> Result<&ProductionSchema, UnitpassError> {
        self.schemas
            .get(schema_id)
            .ok_or_else(|| UnitpassError::SchemaNotFound(schema_id.to_string()))
    }

    /// Every schema `schema_id` needs, dependencies before dependents.
    ///
    /// The requested schema itself is the last element.
    pub fn dependency_closure(
        &self,
        schema_id: &str,
    ) -> Result<Vec<&ProductionSchema>, UnitpassError> {
        self.resolve(schema_id)?;
        let mut out = Vec::new();
        self.visit(schema_id, &mut HashMap::new(), &mut Vec::new(), &mut out)?;
        Ok(out)
    }

    fn visit<'a>(
        &'a self,
        id: &str,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
        out: &mut Vec<&'a ProductionSchema>,
    ) -> Result<(), UnitpassError> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|s| s == id).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].to_vec();
                path.push(id.to_string());
                return Err(UnitpassError::CycleDetected { path });
            }
            None => {}
        }

        let schema = self.resolve(id)?;
        marks.insert(id.to_string(), Mark::Visiting);
        stack.push(id.to_string());
        for dep in &schema.required_component_schema_ids {
            self.visit(dep, marks, stack, out)?;
        }
        stack.pop();
        marks.insert(id.to_string(), Mark::Done);
        out.push(schema);
        Ok(())
    }

    /// Schemas declaring `parent_schema_id` as their parent.
    pub fn specializations(&self, parent_schema_id: &str) -> Vec<&ProductionSchema> {
        self.schemas
            .values()
            .filter(|s| s.parent_schema_id.as_deref() == Some(parent_schema_id))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProductionSchema> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "schema",
        "version": "0.1.0",
        "description": "Immutable production-schema templates",
        "commands": [
            { "name": "import", "parameters": ["file"] },
            { "name": "list" },
            { "name": "show", "parameters": ["id"] },
            { "name": "closure", "parameters": ["id"] }
        ],
        "storage": ["workbench.db"]
    })
}

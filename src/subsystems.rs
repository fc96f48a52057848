//! Subsystem registration: every DB initializer in one table.
//!
//! Adding a new subsystem: append one entry to `SUBSYSTEMS`.

use crate::core::error;
use crate::plugins::{employees, registry, units};
use std::path::Path;

pub(crate) struct SubsystemInit {
    pub name: &'static str,
    pub initialize_db: fn(&Path) -> Result<(), error::UnitpassError>,
}

/// All subsystems that own tables in `workbench.db`.
/// Units reference schemas by id, so the schema table is created first.
pub(crate) const SUBSYSTEMS: &[SubsystemInit] = &[
    SubsystemInit { name: "schema", initialize_db: registry::initialize_schema_db },
    SubsystemInit { name: "employee", initialize_db: employees::initialize_employee_db },
    SubsystemInit { name: "unit", initialize_db: units::initialize_unit_db },
];

/// Initialize all subsystem databases sequentially.
pub(crate) fn initialize_all_dbs(data_root: &Path) -> Result<(), error::UnitpassError> {
    for sub in SUBSYSTEMS {
        tracing::debug!(subsystem = sub.name, "initializing tables");
        (sub.initialize_db)(data_root)?;
    }
    Ok(())
}

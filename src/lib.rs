//! unitpass: a local-first assembly-line workbench.
//!
//! Production runs are described by immutable **production schemas** (ordered
//! stages plus required component schemas). Instantiating a schema creates a
//! **unit** and, recursively, one sub-unit per required component. Employees
//! badge in with an RFID card to begin and complete each stage in order; once a
//! unit's own stages are done and all of its sub-units are certified, its
//! certificate (the flattened stage history of the whole tree) can be
//! published: uploaded to a content-addressed store and anchored on a ledger.
//!
//! # Architecture
//!
//! ## The Thin Waist
//!
//! All state lives in one store directory and every database operation routes
//! through `DbBroker`, which appends an audit line (`broker.events.jsonl`) per
//! operation. Stage history is durable there before publication is attempted.
//!
//! ## Concurrency
//!
//! Workstations share one [`plugins::workbench::Workbench`]. Work on a unit is
//! serialized by a per-unit lock inside a process and by an IMMEDIATE SQLite
//! transaction across processes; distinct units (siblings included) proceed in
//! parallel. Publication talks to external systems with no lock held and
//! checkpoints each completed step, so failures and cancellations resume.
//!
//! # Examples
//!
//! ```bash
//! unitpass init
//! unitpass schema import config/schemas.json
//! unitpass employee import config/employees.json
//! unitpass unit create --schema bb52b37d783a4e419a2535c069f9f7e0
//! unitpass stage begin --unit <uuid> --stage <stage_id> --employee 1111111111
//! unitpass stage complete --unit <uuid> --stage <stage_id>
//! unitpass publish <uuid>
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: store, broker, errors, configuration, data model
//! - [`plugins`]: schema registry, employees, units, stages, certificates,
//!   publication and the workbench façade

pub mod core;
pub mod plugins;

mod cli;
mod subsystems;

use crate::cli::{
    CertificateCommand, Cli, Command, EmployeeCommand, OutputFormat, SchemaCommand, StageCommand,
    UnitCommand,
};
use crate::core::{config, db, error, output, store::Store, time};
use crate::plugins::publication::CancelToken;
use crate::plugins::workbench::Workbench;
use crate::plugins::{employees, registry};

use clap::Parser;
use serde::Serialize;
use std::collections::BTreeMap;

/// Print a command result: a JSON envelope, or `text` when `--format text`.
fn emit<T: Serialize>(
    format: OutputFormat,
    cmd: &str,
    key: &str,
    value: &T,
    text: impl FnOnce() -> String,
) -> Result<(), error::UnitpassError> {
    match format {
        OutputFormat::Json => {
            let mut extra = serde_json::Map::new();
            extra.insert(key.to_string(), serde_json::to_value(value)?);
            let envelope = time::command_envelope(cmd, "ok", serde_json::Value::Object(extra));
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        OutputFormat::Text => println!("{}", text()),
    }
    Ok(())
}

fn prepare_store(store: &Store) -> Result<(), error::UnitpassError> {
    db::ensure_store_dir(&store.root)?;
    subsystems::initialize_all_dbs(&store.root)
}

pub fn run() -> Result<(), error::UnitpassError> {
    let cli = Cli::parse();
    let current_dir = std::env::current_dir()?;
    let store = Store::resolve(cli.store, &current_dir);
    let format = cli.format;

    match cli.command {
        Command::Init => {
            prepare_store(&store)?;
            let wrote_config = config::write_default_config(&store)?;
            let root = store.root.display().to_string();
            emit(
                format,
                "init",
                "store",
                &serde_json::json!({ "root": root, "config_written": wrote_config }),
                || format!("store ready at {}", root),
            )
        }
        Command::Schema(schema_cli) => run_schema_cli(&store, schema_cli.command, format),
        Command::Employee(employee_cli) => run_employee_cli(&store, employee_cli.command, format),
        Command::Unit(unit_cli) => {
            let wb = Workbench::open(store)?;
            run_unit_cli(&wb, unit_cli.command, format)
        }
        Command::Stage(stage_cli) => {
            let wb = Workbench::open(store)?;
            run_stage_cli(&wb, stage_cli.command, format)
        }
        Command::Certificate(cert_cli) => {
            let wb = Workbench::open(store)?;
            match cert_cli.command {
                CertificateCommand::Show { uuid } => {
                    let cert = wb.compose_certificate(&uuid)?;
                    emit(format, "certificate.show", "certificate", &cert, || {
                        output::render_certificate(&cert)
                    })
                }
            }
        }
        Command::Publish { uuid } => {
            let wb = Workbench::open(store)?;
            let result = wb.publish_with_retry(&uuid, &CancelToken::new())?;
            emit(format, "publish", "publication", &result, || {
                output::render_publication(&result)
            })
        }
        Command::Recover => {
            let wb = Workbench::open(store)?;
            let recovered = wb.recover_interrupted_publications()?;
            emit(format, "recover", "recovered", &recovered, || {
                format!("{} unit(s) returned to AwaitingCertification", recovered.len())
            })
        }
    }
}

fn run_schema_cli(
    store: &Store,
    command: SchemaCommand,
    format: OutputFormat,
) -> Result<(), error::UnitpassError> {
    prepare_store(store)?;
    match command {
        SchemaCommand::Import { file } => {
            let report = registry::import_schemas(store, &file)?;
            emit(format, "schema.import", "import", &report, || {
                format!(
                    "{} inserted, {} unchanged",
                    report.inserted.len(),
                    report.unchanged.len()
                )
            })
        }
        SchemaCommand::List => {
            let reg = registry::SchemaRegistry::load(store)?;
            let schemas: Vec<_> = reg.iter().collect();
            emit(format, "schema.list", "schemas", &schemas, || {
                schemas
                    .iter()
                    .map(|s| output::render_schema(s))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        SchemaCommand::Show { id } => {
            let reg = registry::SchemaRegistry::load(store)?;
            let schema = reg.resolve(&id)?;
            let specializations: Vec<&str> = reg
                .specializations(&id)
                .into_iter()
                .map(|s| s.schema_id.as_str())
                .collect();
            emit(
                format,
                "schema.show",
                "schema",
                &serde_json::json!({ "schema": schema, "specializations": specializations }),
                || output::render_schema(schema),
            )
        }
        SchemaCommand::Closure { id } => {
            let reg = registry::SchemaRegistry::load(store)?;
            let closure: Vec<&str> = reg
                .dependency_closure(&id)?
                .into_iter()
                .map(|s| s.schema_id.as_str())
                .collect();
            emit(format, "schema.closure", "closure", &closure, || {
                closure.join(" -> ")
            })
        }
    }
}

fn run_employee_cli(
    store: &Store,
    command: EmployeeCommand,
    format: OutputFormat,
) -> Result<(), error::UnitpassError> {
    prepare_store(store)?;
    let directory = employees::SqliteEmployeeDirectory::new(store.clone());
    match command {
        EmployeeCommand::Import { file } => {
            let count = employees::import_employees(store, &file)?;
            emit(format, "employee.import", "imported", &count, || {
                format!("{} employees imported", count)
            })
        }
        EmployeeCommand::Search { text } => {
            use employees::EmployeeDirectory;
            let found = directory.search(&text)?;
            emit(format, "employee.search", "employees", &found, || {
                output::render_employees(&found)
            })
        }
        EmployeeCommand::Show { card } => {
            use employees::EmployeeDirectory;
            let employee = directory.get(&card)?;
            emit(format, "employee.show", "employee", &employee, || {
                output::render_employees(std::slice::from_ref(&employee))
            })
        }
    }
}

fn run_unit_cli(
    wb: &Workbench,
    command: UnitCommand,
    format: OutputFormat,
) -> Result<(), error::UnitpassError> {
    match command {
        UnitCommand::Create {
            schema,
            internal_id,
        } => {
            let unit = wb.instantiate(&schema, internal_id.as_deref())?;
            emit(format, "unit.create", "unit", &unit, || output::render_unit(&unit))
        }
        UnitCommand::Show { uuid } => {
            let unit = wb.get_unit(&uuid)?;
            emit(format, "unit.show", "unit", &unit, || output::render_unit(&unit))
        }
        UnitCommand::Find { internal_id } => {
            let unit = wb.get_unit_by_internal_id(&internal_id)?;
            emit(format, "unit.find", "unit", &unit, || output::render_unit(&unit))
        }
        UnitCommand::List { status } => {
            let units = wb.list_units(status)?;
            emit(format, "unit.list", "units", &units, || {
                output::render_unit_summaries(&units)
            })
        }
        UnitCommand::Abandon { uuid, reason } => {
            let unit = wb.abandon_unit(&uuid, &reason)?;
            emit(format, "unit.abandon", "unit", &unit, || output::render_unit(&unit))
        }
    }
}

fn run_stage_cli(
    wb: &Workbench,
    command: StageCommand,
    format: OutputFormat,
) -> Result<(), error::UnitpassError> {
    let (cmd, record) = match command {
        StageCommand::Begin {
            unit,
            stage,
            employee,
            info,
        } => (
            "stage.begin",
            wb.begin_stage(&unit, &stage, &employee, info.into_iter().collect::<BTreeMap<_, _>>())?,
        ),
        StageCommand::Complete { unit, stage, info } => (
            "stage.complete",
            wb.complete_stage(&unit, &stage, info.into_iter().collect::<BTreeMap<_, _>>())?,
        ),
        StageCommand::Interrupt {
            unit,
            stage,
            reason,
        } => ("stage.interrupt", wb.interrupt_stage(&unit, &stage, &reason)?),
    };
    emit(format, cmd, "record", &record, || {
        format!(
            "{} #{} {} by {}",
            cmd, record.seq, record.stage_id, record.employee_rfid_card_id
        )
    })
}

//! CLI struct definitions for the unitpass command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use crate::core::model::UnitStatus;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "unitpass",
    version = env!("CARGO_PKG_VERSION"),
    about = "Assembly-line workbench: production schemas, stage tracking and verifiable unit certificates."
)]
pub(crate) struct Cli {
    /// Store directory (defaults to $UNITPASS_STORE, then ./.unitpass).
    #[clap(long, global = true)]
    pub store: Option<PathBuf>,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value = "json")]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the store, its database and a default unitpass.toml
    Init,
    /// Production schema templates
    Schema(SchemaCli),
    /// RFID badge directory
    Employee(EmployeeCli),
    /// Unit instances
    Unit(UnitCli),
    /// Stage execution on a unit
    Stage(StageCli),
    /// Unit certificates
    Certificate(CertificateCli),
    /// Upload and anchor a unit's certificate
    Publish {
        /// Unit uuid
        uuid: String,
    },
    /// Reset units left in Publishing by a publisher that died
    Recover,
}

#[derive(clap::Args, Debug)]
pub(crate) struct SchemaCli {
    #[clap(subcommand)]
    pub command: SchemaCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum SchemaCommand {
    /// Import a JSON array of schema documents
    Import { file: PathBuf },
    /// List every schema
    List,
    /// Show one schema
    Show { id: String },
    /// Schemas a unit of this schema needs, dependencies first
    Closure { id: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct EmployeeCli {
    #[clap(subcommand)]
    pub command: EmployeeCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum EmployeeCommand {
    /// Import a JSON array of employee documents
    Import { file: PathBuf },
    /// Search by card id, name or position
    Search { text: String },
    /// Show the employee holding a badge
    Show { card: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct UnitCli {
    #[clap(subcommand)]
    pub command: UnitCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum UnitCommand {
    /// Instantiate a unit (and its sub-units) from a schema
    Create {
        #[clap(long)]
        schema: String,
        /// Barcode to print on the unit; generated when omitted
        #[clap(long)]
        internal_id: Option<String>,
    },
    /// Show a unit with its sub-units and stage history
    Show { uuid: String },
    /// Look a unit up by its internal id
    Find { internal_id: String },
    /// List units, optionally filtered by status
    List {
        #[clap(long, value_parser = parse_status)]
        status: Option<UnitStatus>,
    },
    /// Mark a unit as Failed
    Abandon {
        uuid: String,
        #[clap(long)]
        reason: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct StageCli {
    #[clap(subcommand)]
    pub command: StageCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum StageCommand {
    /// Open a record for the unit's next stage
    Begin {
        #[clap(long)]
        unit: String,
        #[clap(long)]
        stage: String,
        /// RFID card of the employee doing the work
        #[clap(long)]
        employee: String,
        /// Extra key=value detail recorded on the stage (repeatable)
        #[clap(long = "info", value_parser = parse_key_val)]
        info: Vec<(String, String)>,
    },
    /// Seal the open record of a stage
    Complete {
        #[clap(long)]
        unit: String,
        #[clap(long)]
        stage: String,
        #[clap(long = "info", value_parser = parse_key_val)]
        info: Vec<(String, String)>,
    },
    /// Close the open record of a stage without completing it
    Interrupt {
        #[clap(long)]
        unit: String,
        #[clap(long)]
        stage: String,
        #[clap(long)]
        reason: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct CertificateCli {
    #[clap(subcommand)]
    pub command: CertificateCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CertificateCommand {
    /// Compose and print a unit's certificate
    Show { uuid: String },
}

fn parse_status(s: &str) -> Result<UnitStatus, String> {
    s.parse().map_err(|e: crate::core::error::UnitpassError| e.to_string())
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if k.trim().is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((k.trim().to_string(), v.to_string()))
}

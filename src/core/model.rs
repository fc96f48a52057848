//! Data model: production schemas, live units and their stage records.
//!
//! `UnitStatus` is a tagged state machine; `Unit::transition` is the only way a
//! status changes, and it refuses edges that are not in the lifecycle below.
//!
//! ```text
//! Created -> InProgress -> AwaitingCertification <-> Publishing -> Certified
//!    \___________\______________\__________________________________-> Failed
//! ```

use crate::core::error::UnitpassError;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaType {
    Simple,
    Component,
    Composite,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Simple => "Simple",
            SchemaType::Component => "Component",
            SchemaType::Composite => "Composite",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageTemplate {
    pub stage_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub equipment: Vec<String>,
    #[serde(default)]
    pub workplace: String,
    /// Expected duration; 0 means untimed.
    #[serde(default)]
    pub duration_seconds: u64,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Immutable template describing a buildable unit type.
///
/// Accepts the legacy document field names (`production_stages`,
/// `required_components_schema_ids`) so existing schema exports import as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductionSchema {
    pub schema_id: String,
    #[serde(default)]
    pub parent_schema_id: Option<String>,
    #[serde(
        default,
        alias = "required_components_schema_ids",
        deserialize_with = "null_as_empty"
    )]
    pub required_component_schema_ids: Vec<String>,
    pub schema_type: SchemaType,
    pub unit_name: String,
    #[serde(default, alias = "production_stages")]
    pub stages: Vec<StageTemplate>,
}

impl ProductionSchema {
    pub fn is_composite(&self) -> bool {
        self.schema_type == SchemaType::Composite
    }

    pub fn stage_index(&self, stage_id: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.stage_id == stage_id)
    }

    pub fn stage(&self, stage_id: &str) -> Option<&StageTemplate> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }

    /// Checks that do not need the rest of the registry.
    pub fn validate_shape(&self) -> Result<(), UnitpassError> {
        if self.schema_id.trim().is_empty() {
            return Err(UnitpassError::ValidationError(
                "schema_id cannot be empty".to_string(),
            ));
        }
        match self.schema_type {
            SchemaType::Composite if self.required_component_schema_ids.is_empty() => {
                return Err(UnitpassError::ValidationError(format!(
                    "composite schema '{}' must require at least one component schema",
                    self.schema_id
                )));
            }
            SchemaType::Simple | SchemaType::Component
                if !self.required_component_schema_ids.is_empty() =>
            {
                return Err(UnitpassError::ValidationError(format!(
                    "{} schema '{}' cannot require component schemas",
                    self.schema_type.as_str(),
                    self.schema_id
                )));
            }
            _ => {}
        }

        let mut seen = BTreeSet::new();
        for id in &self.required_component_schema_ids {
            if !seen.insert(id.as_str()) {
                return Err(UnitpassError::ValidationError(format!(
                    "schema '{}' lists component schema '{}' more than once",
                    self.schema_id, id
                )));
            }
        }

        // A unit with nothing to execute could never become ready for certification.
        if self.stages.is_empty() {
            return Err(UnitpassError::ValidationError(format!(
                "schema '{}' declares no stages",
                self.schema_id
            )));
        }

        let mut seen = BTreeSet::new();
        for stage in &self.stages {
            if stage.stage_id.trim().is_empty() {
                return Err(UnitpassError::ValidationError(format!(
                    "schema '{}' has a stage without stage_id",
                    self.schema_id
                )));
            }
            if !seen.insert(stage.stage_id.as_str()) {
                return Err(UnitpassError::ValidationError(format!(
                    "schema '{}' declares stage '{}' twice",
                    self.schema_id, stage.stage_id
                )));
            }
        }
        Ok(())
    }

    pub fn canonical_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn canonical_hash_hex(&self) -> Result<String, serde_json::Error> {
        let bytes = self.canonical_json_bytes()?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Employee {
    pub rfid_card_id: String,
    pub name: String,
    pub position: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UnitStatus {
    Created,
    InProgress,
    AwaitingCertification,
    Publishing,
    Certified,
    Failed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Created => "Created",
            UnitStatus::InProgress => "InProgress",
            UnitStatus::AwaitingCertification => "AwaitingCertification",
            UnitStatus::Publishing => "Publishing",
            UnitStatus::Certified => "Certified",
            UnitStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Certified | UnitStatus::Failed)
    }

    pub fn can_transition_to(&self, to: UnitStatus) -> bool {
        use UnitStatus::*;
        matches!(
            (self, to),
            (Created, InProgress)
                | (Created, AwaitingCertification)
                | (InProgress, AwaitingCertification)
                | (AwaitingCertification, Publishing)
                | (Publishing, AwaitingCertification)
                | (Publishing, Certified)
                | (Created, Failed)
                | (InProgress, Failed)
                | (AwaitingCertification, Failed)
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitStatus {
    type Err = UnitpassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(UnitStatus::Created),
            "InProgress" => Ok(UnitStatus::InProgress),
            "AwaitingCertification" => Ok(UnitStatus::AwaitingCertification),
            "Publishing" => Ok(UnitStatus::Publishing),
            "Certified" => Ok(UnitStatus::Certified),
            "Failed" => Ok(UnitStatus::Failed),
            other => Err(UnitpassError::ValidationError(format!(
                "unknown unit status '{}'",
                other
            ))),
        }
    }
}

/// One execution of a stage against a unit. Open while `completed_at` is unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageRecord {
    /// Position in the unit's append-only history.
    pub seq: u32,
    pub stage_id: String,
    pub employee_rfid_card_id: String,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub actual_duration_seconds: Option<u64>,
    /// Sealed before the work was finished; the stage stays pending.
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub additional_info: BTreeMap<String, String>,
}

impl StageRecord {
    pub fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some() && !self.interrupted
    }

    pub(crate) fn seal(&mut self, now: u64, interrupted: bool) {
        self.completed_at = Some(now);
        self.actual_duration_seconds = Some(now.saturating_sub(self.started_at));
        self.interrupted = interrupted;
    }
}

/// A live, trackable instance of a schema.
///
/// Sub-units are owned exclusively by their parent; `parent_unit_uuid` is a
/// lookup key only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Unit {
    pub uuid: String,
    pub internal_id: String,
    pub schema_id: String,
    pub(crate) status: UnitStatus,
    pub sub_units: Vec<Unit>,
    pub stage_records: Vec<StageRecord>,
    pub parent_unit_uuid: Option<String>,
    pub content_address: Option<String>,
    pub ledger_reference: Option<String>,
    pub failure_reason: Option<String>,
    /// Token of the publish attempt that moved the unit to `Publishing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_claim: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Unit {
    pub fn status(&self) -> UnitStatus {
        self.status
    }

    /// The only mutator of `status`.
    pub fn transition(&mut self, to: UnitStatus, now: u64) -> Result<(), UnitpassError> {
        if !self.status.can_transition_to(to) {
            return Err(UnitpassError::InvalidTransition {
                unit_uuid: self.uuid.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn open_record(&self) -> Option<&StageRecord> {
        self.stage_records.iter().find(|r| r.is_open())
    }

    pub fn is_stage_complete(&self, stage_id: &str) -> bool {
        self.stage_records
            .iter()
            .any(|r| r.stage_id == stage_id && r.is_complete())
    }

    /// First schema stage with no completed record.
    pub fn next_pending_stage<'a>(&self, schema: &'a ProductionSchema) -> Option<&'a StageTemplate> {
        schema
            .stages
            .iter()
            .find(|s| !self.is_stage_complete(&s.stage_id))
    }

    pub fn own_stages_complete(&self, schema: &ProductionSchema) -> bool {
        self.next_pending_stage(schema).is_none()
    }

    pub fn sub_units_certified(&self) -> bool {
        self.sub_units
            .iter()
            .all(|u| u.status == UnitStatus::Certified)
    }

    pub fn next_seq(&self) -> u32 {
        self.stage_records
            .iter()
            .map(|r| r.seq + 1)
            .max()
            .unwrap_or(0)
    }

    /// Depth-first search of this unit and its sub-units.
    pub fn find(&self, uuid: &str) -> Option<&Unit> {
        if self.uuid == uuid {
            return Some(self);
        }
        self.sub_units.iter().find_map(|u| u.find(uuid))
    }

    /// Every unit of the tree, sub-units before their parent.
    pub fn post_order(&self) -> Vec<&Unit> {
        let mut out = Vec::new();
        for sub in &self.sub_units {
            out.extend(sub.post_order());
        }
        out.push(self);
        out
    }
}

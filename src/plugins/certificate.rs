//! Certificate Composer.
//!
//! A certificate is derived, never stored: it is recomposed from the unit tree
//! whenever needed. Sub-unit histories come first, in the order of the schema's
//! `required_component_schema_ids`, followed by the unit's own records in
//! schema-declared stage order. The payload bytes are canonical JSON, so the
//! same stage history always yields the same content address.

use crate::core::error::UnitpassError;
use crate::core::model::{Unit, UnitStatus};
use crate::plugins::registry::SchemaRegistry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const CERTIFICATE_FORMAT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertifiedStage {
    pub unit_uuid: String,
    pub schema_id: String,
    pub stage_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub stage_type: String,
    pub employee_rfid_card_id: String,
    pub started_at: u64,
    pub completed_at: u64,
    pub actual_duration_seconds: u64,
    pub interrupted: bool,
    pub additional_info: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentRef {
    pub unit_uuid: String,
    pub internal_id: String,
    pub schema_id: String,
    pub content_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    pub unit_uuid: String,
    pub internal_id: String,
    pub schema_id: String,
    pub unit_name: String,
    pub components: Vec<ComponentRef>,
    pub stage_records: Vec<CertifiedStage>,
    /// Set once the payload is uploaded; not part of the payload.
    pub content_address: Option<String>,
    /// Set once the address is anchored; not part of the payload.
    pub ledger_reference: Option<String>,
}

#[derive(Serialize)]
struct CertificatePayload<'a> {
    format_version: &'static str,
    unit_uuid: &'a str,
    internal_id: &'a str,
    schema_id: &'a str,
    unit_name: &'a str,
    components: &'a [ComponentRef],
    stage_records: &'a [CertifiedStage],
}

impl Certificate {
    pub fn payload_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&CertificatePayload {
            format_version: CERTIFICATE_FORMAT_VERSION,
            unit_uuid: &self.unit_uuid,
            internal_id: &self.internal_id,
            schema_id: &self.schema_id,
            unit_name: &self.unit_name,
            components: &self.components,
            stage_records: &self.stage_records,
        })
    }

    pub fn payload_hash_hex(&self) -> Result<String, serde_json::Error> {
        let mut hasher = Sha256::new();
        hasher.update(self.payload_bytes()?);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Compose the certificate of `unit`, which must be AwaitingCertification or Certified.
pub fn compose(registry: &SchemaRegistry, unit: &Unit) -> Result<Certificate, UnitpassError> {
    if !matches!(
        unit.status(),
        UnitStatus::AwaitingCertification | UnitStatus::Certified
    ) {
        return Err(UnitpassError::NotReady {
            unit_uuid: unit.uuid.clone(),
            status: unit.status().to_string(),
        });
    }
    let schema = registry.resolve(&unit.schema_id)?;

    let mut stage_records = Vec::new();
    let mut components = Vec::with_capacity(unit.sub_units.len());
    for sub in &unit.sub_units {
        let sub_cert = compose(registry, sub)?;
        stage_records.extend(sub_cert.stage_records);
        components.push(ComponentRef {
            unit_uuid: sub.uuid.clone(),
            internal_id: sub.internal_id.clone(),
            schema_id: sub.schema_id.clone(),
            content_address: sub.content_address.clone(),
        });
    }

    let mut own: Vec<_> = unit
        .stage_records
        .iter()
        .filter(|r| r.completed_at.is_some())
        .collect();
    own.sort_by_key(|r| (schema.stage_index(&r.stage_id).unwrap_or(usize::MAX), r.seq));

    for record in own {
        let template = schema.stage(&record.stage_id);
        let completed_at = record.completed_at.unwrap_or(record.started_at);
        stage_records.push(CertifiedStage {
            unit_uuid: unit.uuid.clone(),
            schema_id: unit.schema_id.clone(),
            stage_id: record.stage_id.clone(),
            name: template.map(|t| t.name.clone()).unwrap_or_default(),
            stage_type: template.map(|t| t.stage_type.clone()).unwrap_or_default(),
            employee_rfid_card_id: record.employee_rfid_card_id.clone(),
            started_at: record.started_at,
            completed_at,
            actual_duration_seconds: record
                .actual_duration_seconds
                .unwrap_or_else(|| completed_at.saturating_sub(record.started_at)),
            interrupted: record.interrupted,
            additional_info: record.additional_info.clone(),
        });
    }

    Ok(Certificate {
        unit_uuid: unit.uuid.clone(),
        internal_id: unit.internal_id.clone(),
        schema_id: unit.schema_id.clone(),
        unit_name: schema.unit_name.clone(),
        components,
        stage_records,
        content_address: unit.content_address.clone(),
        ledger_reference: unit.ledger_reference.clone(),
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "certificate",
        "version": "0.1.0",
        "description": "Deterministic certificate composition",
        "commands": [
            { "name": "show", "parameters": ["uuid"] }
        ],
        "storage": []
    })
}

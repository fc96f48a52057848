//! Stage Executor: validation and recording of stage work on one unit.
//!
//! These functions mutate an in-memory `Unit`; the caller loads it and persists
//! it inside one write transaction. The badge is resolved by the caller before
//! that transaction opens. The remaining checks run in a fixed order so the same
//! mistake always produces the same error:
//! unit state -> open record -> stage membership -> ordering.

use crate::core::error::UnitpassError;
use crate::core::model::{Employee, ProductionSchema, StageRecord, Unit, UnitStatus};
use std::collections::BTreeMap;
use tracing::info;

pub const INTERRUPT_REASON_KEY: &str = "interrupt_reason";

fn ensure_accepts_stage_work(unit: &Unit, target: UnitStatus) -> Result<(), UnitpassError> {
    match unit.status() {
        UnitStatus::Publishing => Err(UnitpassError::UnitPublishing(unit.uuid.clone())),
        s if s.is_terminal() => Err(UnitpassError::InvalidTransition {
            unit_uuid: unit.uuid.clone(),
            from: s.to_string(),
            to: target.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Open a record for `stage_id`, which must be the unit's next pending stage.
/// `employee` comes from the badge directory.
pub fn begin_stage(
    unit: &mut Unit,
    schema: &ProductionSchema,
    employee: &Employee,
    stage_id: &str,
    additional_info: BTreeMap<String, String>,
    now: u64,
) -> Result<StageRecord, UnitpassError> {
    ensure_accepts_stage_work(unit, UnitStatus::InProgress)?;

    if let Some(open) = unit.open_record() {
        return Err(UnitpassError::StageAlreadyInProgress {
            unit_uuid: unit.uuid.clone(),
            open_stage_id: open.stage_id.clone(),
        });
    }

    if schema.stage(stage_id).is_none() {
        return Err(UnitpassError::StageNotFound {
            schema_id: schema.schema_id.clone(),
            stage_id: stage_id.to_string(),
        });
    }

    match unit.next_pending_stage(schema) {
        None => {
            return Err(UnitpassError::OutOfOrder {
                requested: stage_id.to_string(),
                reason: "every stage of this unit is already complete".to_string(),
            });
        }
        Some(next) if next.stage_id != stage_id => {
            let reason = if unit.is_stage_complete(stage_id) {
                format!("stage already complete; next pending stage is '{}'", next.stage_id)
            } else {
                format!("earlier stage '{}' is not complete", next.stage_id)
            };
            return Err(UnitpassError::OutOfOrder {
                requested: stage_id.to_string(),
                reason,
            });
        }
        Some(_) => {}
    }

    let record = StageRecord {
        seq: unit.next_seq(),
        stage_id: stage_id.to_string(),
        employee_rfid_card_id: employee.rfid_card_id.clone(),
        started_at: now,
        completed_at: None,
        actual_duration_seconds: None,
        interrupted: false,
        additional_info,
    };
    unit.stage_records.push(record.clone());
    if unit.status() == UnitStatus::Created {
        unit.transition(UnitStatus::InProgress, now)?;
    }
    info!(unit = %unit.uuid, stage = stage_id, employee = %employee.rfid_card_id, "stage started");
    Ok(record)
}

fn open_record_index(unit: &Unit, stage_id: &str) -> Result<usize, UnitpassError> {
    unit.stage_records
        .iter()
        .position(|r| r.is_open() && r.stage_id == stage_id)
        .ok_or_else(|| UnitpassError::NoOpenStage {
            unit_uuid: unit.uuid.clone(),
            stage_id: stage_id.to_string(),
        })
}

/// Seal the open record of `stage_id` and advance the unit if it is now ready.
pub fn complete_stage(
    unit: &mut Unit,
    schema: &ProductionSchema,
    stage_id: &str,
    additional_info: BTreeMap<String, String>,
    now: u64,
) -> Result<StageRecord, UnitpassError> {
    ensure_accepts_stage_work(unit, UnitStatus::InProgress)?;
    let idx = open_record_index(unit, stage_id)?;

    let record = &mut unit.stage_records[idx];
    record.seal(now, false);
    record.additional_info.extend(additional_info);
    let sealed = record.clone();
    info!(
        unit = %unit.uuid,
        stage = stage_id,
        duration = sealed.actual_duration_seconds.unwrap_or_default(),
        "stage completed"
    );

    promote_if_ready(unit, schema, now)?;
    Ok(sealed)
}

/// Close the open record of `stage_id` without completing the stage.
pub fn interrupt_stage(
    unit: &mut Unit,
    stage_id: &str,
    reason: &str,
    now: u64,
) -> Result<StageRecord, UnitpassError> {
    ensure_accepts_stage_work(unit, UnitStatus::InProgress)?;
    let idx = open_record_index(unit, stage_id)?;

    let record = &mut unit.stage_records[idx];
    record.seal(now, true);
    record
        .additional_info
        .insert(INTERRUPT_REASON_KEY.to_string(), reason.to_string());
    info!(unit = %unit.uuid, stage = stage_id, reason, "stage interrupted");
    Ok(record.clone())
}

/// Move the unit to `AwaitingCertification` once its own stages are complete and
/// every sub-unit is Certified. Returns true when the status changed.
pub fn promote_if_ready(
    unit: &mut Unit,
    schema: &ProductionSchema,
    now: u64,
) -> Result<bool, UnitpassError> {
    let ready = matches!(unit.status(), UnitStatus::Created | UnitStatus::InProgress)
        && unit.open_record().is_none()
        && unit.own_stages_complete(schema)
        && unit.sub_units_certified();
    if !ready {
        return Ok(false);
    }
    unit.transition(UnitStatus::AwaitingCertification, now)?;
    info!(unit = %unit.uuid, "unit awaiting certification");
    Ok(true)
}

/// Operator override: give up on a unit. Any open record is closed as interrupted.
pub fn abandon(unit: &mut Unit, reason: &str, now: u64) -> Result<(), UnitpassError> {
    if unit.status() == UnitStatus::Publishing {
        return Err(UnitpassError::UnitPublishing(unit.uuid.clone()));
    }
    if !unit.status().can_transition_to(UnitStatus::Failed) {
        return Err(UnitpassError::InvalidTransition {
            unit_uuid: unit.uuid.clone(),
            from: unit.status().to_string(),
            to: UnitStatus::Failed.to_string(),
        });
    }
    if let Some(open) = unit.open_record().map(|r| r.stage_id.clone()) {
        interrupt_stage(unit, &open, reason, now)?;
    }
    unit.failure_reason = Some(reason.to_string());
    unit.transition(UnitStatus::Failed, now)?;
    info!(unit = %unit.uuid, reason, "unit abandoned");
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "stage",
        "version": "0.1.0",
        "description": "Ordered stage execution against a unit",
        "commands": [
            { "name": "begin", "parameters": ["unit", "stage", "employee"] },
            { "name": "complete", "parameters": ["unit", "stage"] },
            { "name": "interrupt", "parameters": ["unit", "stage", "reason"] }
        ],
        "storage": ["workbench.db"]
    })
}

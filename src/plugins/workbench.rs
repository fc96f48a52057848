//! Workbench: the single entry point callers use.
//!
//! Every mutation of a unit is one IMMEDIATE transaction (`UnitStore::update`),
//! taken under that unit's in-process lock. Publication calls into the content
//! store and the ledger with no lock or transaction held. Each completed step is
//! checkpointed on the unit so a failed or cancelled publish resumes where it
//! stopped.
//!
//! A publish attempt owns the unit through a claim token written when it moves
//! the unit to `Publishing`. Checkpoints, certification and release all require
//! that claim, so an attempt that was reset by `recover_interrupted_publications`
//! can no longer write anything.

use crate::core::config::{self, UnitpassConfig};
use crate::core::db;
use crate::core::error::UnitpassError;
use crate::core::locks::UnitLocks;
use crate::core::model::{Employee, ProductionSchema, StageRecord, Unit, UnitStatus};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::certificate::{self, Certificate};
use crate::plugins::employees::{EmployeeDirectory, SqliteEmployeeDirectory};
use crate::plugins::publication::{
    self, AnchorRequest, CancelToken, ContentStore, JsonlLedger, Ledger, LocalContentStore,
    PublicationResult,
};
use crate::plugins::registry::SchemaRegistry;
use crate::plugins::stages;
use crate::plugins::units::{self, UnitStore, UnitSummary};
use crate::subsystems;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use ulid::Ulid;

const PUBLISHER_ACTOR: &str = "publisher";
const OPERATOR_ACTOR: &str = "operator";

pub struct Workbench {
    store: Store,
    config: UnitpassConfig,
    registry: Arc<SchemaRegistry>,
    employees: Arc<dyn EmployeeDirectory>,
    units: UnitStore,
    content_store: Arc<dyn ContentStore>,
    ledger: Arc<dyn Ledger>,
    locks: UnitLocks,
}

enum PublishStart {
    Cached(PublicationResult),
    Started {
        unit: Unit,
        certificate: Certificate,
        claim: String,
    },
}

fn ensure_claim(unit: &Unit, claim: &str) -> Result<(), UnitpassError> {
    if unit.status() == UnitStatus::Publishing && unit.publication_claim.as_deref() == Some(claim) {
        Ok(())
    } else {
        Err(UnitpassError::PublicationSuperseded(unit.uuid.clone()))
    }
}

impl Workbench {
    /// Open a store with the local content store, JSONL ledger and SQLite badge directory.
    pub fn open(store: Store) -> Result<Self, UnitpassError> {
        db::ensure_store_dir(&store.root)?;
        let config = config::load_config(&store)?;
        let content_store = Arc::new(LocalContentStore::new(
            store.resolve_path(&config.content_store.dir),
        ));
        let ledger = Arc::new(JsonlLedger::from_config(&store.root, &config.ledger));
        let employees = Arc::new(SqliteEmployeeDirectory::new(store.clone()));
        Self::with_parts(store, config, employees, content_store, ledger)
    }

    /// Open a store with caller-supplied external collaborators.
    pub fn with_parts(
        store: Store,
        config: UnitpassConfig,
        employees: Arc<dyn EmployeeDirectory>,
        content_store: Arc<dyn ContentStore>,
        ledger: Arc<dyn Ledger>,
    ) -> Result<Self, UnitpassError> {
        db::ensure_store_dir(&store.root)?;
        subsystems::initialize_all_dbs(&store.root)?;
        let registry = Arc::new(SchemaRegistry::load(&store)?);
        let units = UnitStore::new(store.clone());
        info!(
            root = %store.root.display(),
            schemas = registry.len(),
            "workbench opened"
        );

        Ok(Self {
            store,
            config,
            registry,
            employees,
            units,
            content_store,
            ledger,
            locks: UnitLocks::new(),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &UnitpassConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn resolve_schema(&self, schema_id: &str) -> Result<&ProductionSchema, UnitpassError> {
        self.registry.resolve(schema_id)
    }

    pub fn get_employee(&self, rfid_card_id: &str) -> Result<Employee, UnitpassError> {
        self.employees.get(rfid_card_id)
    }

    pub fn search_employees(&self, text: &str) -> Result<Vec<Employee>, UnitpassError> {
        self.employees.search(text)
    }

    // --- units ---

    pub fn instantiate(
        &self,
        schema_id: &str,
        internal_id: Option<&str>,
    ) -> Result<Unit, UnitpassError> {
        units::instantiate(&self.registry, &self.units, schema_id, internal_id)
    }

    pub fn get_unit(&self, uuid: &str) -> Result<Unit, UnitpassError> {
        self.units.load(uuid)
    }

    pub fn get_unit_by_internal_id(&self, internal_id: &str) -> Result<Unit, UnitpassError> {
        self.units.load_by_internal_id(internal_id)
    }

    pub fn list_units(&self, status: Option<UnitStatus>) -> Result<Vec<UnitSummary>, UnitpassError> {
        self.units.list(&self.registry, status)
    }

    /// Operator recovery after a publisher died: every `Publishing` unit goes
    /// back to `AwaitingCertification` with its completed steps kept.
    ///
    /// Any attempt still running elsewhere loses its claim and stops at its next
    /// checkpoint with `PublicationSuperseded`.
    pub fn recover_interrupted_publications(&self) -> Result<Vec<String>, UnitpassError> {
        let recovered = self.units.recover_interrupted_publications()?;
        if !recovered.is_empty() {
            warn!(count = recovered.len(), units = ?recovered, "reset units left in Publishing");
        }
        Ok(recovered)
    }

    /// Load, mutate and persist one unit in a single write transaction.
    fn mutate_unit<F, R>(&self, uuid: &str, actor: &str, op: &str, f: F) -> Result<R, UnitpassError>
    where
        F: FnOnce(&mut Unit, &ProductionSchema, u64) -> Result<R, UnitpassError>,
    {
        self.locks.with_unit(uuid, || {
            self.units.update(uuid, actor, op, |unit| {
                let schema = self.registry.resolve(&unit.schema_id)?;
                f(unit, schema, time::now_epoch_secs())
            })
        })
    }

    // --- stages ---

    pub fn begin_stage(
        &self,
        unit_uuid: &str,
        stage_id: &str,
        employee_rfid_card_id: &str,
        additional_info: BTreeMap<String, String>,
    ) -> Result<StageRecord, UnitpassError> {
        // The directory is consulted before the write transaction opens.
        let employee = self.employees.get(employee_rfid_card_id)?;
        self.mutate_unit(
            unit_uuid,
            &employee.rfid_card_id,
            "stage.begin",
            |unit, schema, now| {
                stages::begin_stage(unit, schema, &employee, stage_id, additional_info, now)
            },
        )
    }

    pub fn complete_stage(
        &self,
        unit_uuid: &str,
        stage_id: &str,
        additional_info: BTreeMap<String, String>,
    ) -> Result<StageRecord, UnitpassError> {
        let actor = self.open_record_actor(unit_uuid, stage_id)?;
        self.mutate_unit(unit_uuid, &actor, "stage.complete", |unit, schema, now| {
            stages::complete_stage(unit, schema, stage_id, additional_info, now)
        })
    }

    pub fn interrupt_stage(
        &self,
        unit_uuid: &str,
        stage_id: &str,
        reason: &str,
    ) -> Result<StageRecord, UnitpassError> {
        let actor = self.open_record_actor(unit_uuid, stage_id)?;
        self.mutate_unit(unit_uuid, &actor, "stage.interrupt", |unit, _schema, now| {
            stages::interrupt_stage(unit, stage_id, reason, now)
        })
    }

    // Audit attribution only; the stage functions re-check inside the transaction.
    fn open_record_actor(&self, unit_uuid: &str, stage_id: &str) -> Result<String, UnitpassError> {
        let unit = self.units.load(unit_uuid)?;
        Ok(unit
            .stage_records
            .iter()
            .find(|r| r.is_open() && r.stage_id == stage_id)
            .map(|r| r.employee_rfid_card_id.clone())
            .unwrap_or_else(|| OPERATOR_ACTOR.to_string()))
    }

    pub fn abandon_unit(&self, unit_uuid: &str, reason: &str) -> Result<Unit, UnitpassError> {
        self.mutate_unit(unit_uuid, OPERATOR_ACTOR, "unit.abandon", |unit, _schema, now| {
            stages::abandon(unit, reason, now)?;
            Ok(unit.clone())
        })
    }

    // --- certificates ---

    pub fn compose_certificate(&self, unit_uuid: &str) -> Result<Certificate, UnitpassError> {
        let unit = self.units.load(unit_uuid)?;
        certificate::compose(&self.registry, &unit)
    }

    // --- publication ---

    /// Upload and anchor the certificate of an AwaitingCertification unit.
    ///
    /// A Certified unit returns its recorded result without touching either
    /// external system. Any failure returns the unit to AwaitingCertification
    /// with completed steps kept, so the next call resumes.
    pub fn publish(
        &self,
        unit_uuid: &str,
        cancel: &CancelToken,
    ) -> Result<PublicationResult, UnitpassError> {
        let (unit, certificate, claim) = match self.start_publication(unit_uuid)? {
            PublishStart::Cached(result) => return Ok(result),
            PublishStart::Started {
                unit,
                certificate,
                claim,
            } => (unit, certificate, claim),
        };

        match self.run_publication(&unit, &certificate, &claim, cancel) {
            Ok(result) => {
                if let Some(parent) = unit.parent_unit_uuid.as_deref() {
                    // The sub-unit is Certified either way; the parent is
                    // re-evaluated on its next stage completion or sibling certification.
                    if let Err(e) = self.promote_parent(parent) {
                        warn!(unit = unit_uuid, parent, error = %e, "parent promotion failed");
                    }
                }
                Ok(result)
            }
            Err(e) => {
                warn!(unit = unit_uuid, error = %e, "publication stopped");
                if let Err(revert) = self.release_publishing(unit_uuid, &claim) {
                    warn!(unit = unit_uuid, error = %revert, "could not leave Publishing");
                }
                Err(e)
            }
        }
    }

    /// `publish` with the configured retry policy; cancellation ends it immediately.
    pub fn publish_with_retry(
        &self,
        unit_uuid: &str,
        cancel: &CancelToken,
    ) -> Result<PublicationResult, UnitpassError> {
        publication::retry_publication(&self.config.publication, cancel, |attempt| {
            info!(unit = unit_uuid, attempt, "publication attempt");
            self.publish(unit_uuid, cancel)
        })
    }

    fn start_publication(&self, unit_uuid: &str) -> Result<PublishStart, UnitpassError> {
        self.locks.with_unit(unit_uuid, || {
            self.units
                .update(unit_uuid, PUBLISHER_ACTOR, "publish.begin", |unit| {
                    match unit.status() {
                        UnitStatus::Certified => {
                            return Ok(PublishStart::Cached(self.recorded_result(unit)?));
                        }
                        UnitStatus::Publishing => {
                            return Err(UnitpassError::UnitPublishing(unit.uuid.clone()));
                        }
                        _ => {}
                    }
                    // Picks up a parent whose promotion was missed when its last sub-unit certified.
                    let schema = self.registry.resolve(&unit.schema_id)?;
                    stages::promote_if_ready(unit, schema, time::now_epoch_secs())?;
                    let certificate = certificate::compose(&self.registry, unit)?;
                    unit.transition(UnitStatus::Publishing, time::now_epoch_secs())?;
                    let claim = Ulid::new().to_string();
                    unit.publication_claim = Some(claim.clone());
                    Ok(PublishStart::Started {
                        unit: unit.clone(),
                        certificate,
                        claim,
                    })
                })
        })
    }

    fn run_publication(
        &self,
        unit: &Unit,
        certificate: &Certificate,
        claim: &str,
        cancel: &CancelToken,
    ) -> Result<PublicationResult, UnitpassError> {
        cancel.check()?;
        let (content_address, uploaded) = match &unit.content_address {
            Some(address) => (address.clone(), false),
            None => {
                let payload = certificate.payload_bytes()?;
                let address = self.content_store.put(&payload)?;
                self.checkpoint(&unit.uuid, claim, "publish.upload", &address, |u| {
                    &mut u.content_address
                })?;
                info!(unit = %unit.uuid, address = %address, "certificate uploaded");
                (address, true)
            }
        };

        cancel.check()?;
        let (ledger_reference, anchored) = match &unit.ledger_reference {
            Some(reference) => (reference.clone(), false),
            None => {
                // Anchoring is not undoable; make sure the claim is still ours first.
                ensure_claim(&self.units.load(&unit.uuid)?, claim)?;
                let reference = self.ledger.anchor(&AnchorRequest {
                    content_address: content_address.clone(),
                    unit_uuid: unit.uuid.clone(),
                    internal_id: unit.internal_id.clone(),
                    schema_id: unit.schema_id.clone(),
                })?;
                self.checkpoint(&unit.uuid, claim, "publish.anchor", &reference, |u| {
                    &mut u.ledger_reference
                })?;
                info!(unit = %unit.uuid, reference = %reference, "certificate anchored");
                (reference, true)
            }
        };

        self.locks.with_unit(&unit.uuid, || {
            self.units
                .update(&unit.uuid, PUBLISHER_ACTOR, "publish.certify", |current| {
                    ensure_claim(current, claim)?;
                    current.transition(UnitStatus::Certified, time::now_epoch_secs())?;
                    current.publication_claim = None;
                    Ok(())
                })
        })?;
        info!(unit = %unit.uuid, "unit certified");

        Ok(PublicationResult {
            unit_uuid: unit.uuid.clone(),
            link: publication::gateway_link(
                &self.config.publication.gateway_link_prefix,
                &content_address,
            ),
            content_address,
            ledger_reference,
            uploaded,
            anchored,
        })
    }

    /// Record one completed external step. The slot must still be empty and the
    /// claim must still be ours.
    fn checkpoint<F>(
        &self,
        unit_uuid: &str,
        claim: &str,
        op: &str,
        value: &str,
        slot: F,
    ) -> Result<(), UnitpassError>
    where
        F: FnOnce(&mut Unit) -> &mut Option<String>,
    {
        self.locks.with_unit(unit_uuid, || {
            self.units.update(unit_uuid, PUBLISHER_ACTOR, op, |unit| {
                ensure_claim(unit, claim)?;
                let field = slot(unit);
                if field.is_some() {
                    return Err(UnitpassError::PublicationSuperseded(unit_uuid.to_string()));
                }
                *field = Some(value.to_string());
                unit.updated_at = time::now_epoch_secs();
                Ok(())
            })
        })
    }

    /// Back to AwaitingCertification, unless another attempt has taken over.
    fn release_publishing(&self, unit_uuid: &str, claim: &str) -> Result<bool, UnitpassError> {
        self.locks.with_unit(unit_uuid, || {
            self.units
                .update(unit_uuid, PUBLISHER_ACTOR, "publish.release", |unit| {
                    if ensure_claim(unit, claim).is_err() {
                        return Ok(false);
                    }
                    unit.transition(UnitStatus::AwaitingCertification, time::now_epoch_secs())?;
                    unit.publication_claim = None;
                    Ok(true)
                })
        })
    }

    fn recorded_result(&self, unit: &Unit) -> Result<PublicationResult, UnitpassError> {
        match (&unit.content_address, &unit.ledger_reference) {
            (Some(address), Some(reference)) => Ok(PublicationResult {
                unit_uuid: unit.uuid.clone(),
                content_address: address.clone(),
                ledger_reference: reference.clone(),
                link: publication::gateway_link(
                    &self.config.publication.gateway_link_prefix,
                    address,
                ),
                uploaded: false,
                anchored: false,
            }),
            _ => Err(UnitpassError::ValidationError(format!(
                "certified unit {} has no recorded publication",
                unit.uuid
            ))),
        }
    }

    /// A certified sub-unit may complete its parent's readiness.
    fn promote_parent(&self, parent_uuid: &str) -> Result<bool, UnitpassError> {
        self.mutate_unit(parent_uuid, PUBLISHER_ACTOR, "unit.promote", |parent, schema, now| {
            stages::promote_if_ready(parent, schema, now)
        })
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "workbench",
        "version": "0.1.0",
        "description": "Façade over schemas, units, stages and publication",
        "subsystems": [
            crate::plugins::registry::schema(),
            crate::plugins::employees::schema(),
            crate::plugins::units::schema(),
            crate::plugins::stages::schema(),
            crate::plugins::certificate::schema(),
            crate::plugins::publication::schema()
        ]
    })
}

#[path = "../common/mod.rs"]
mod common;

use common::*;
use unitpass::core::error::UnitpassError;
use unitpass::core::model::UnitStatus;
use unitpass::plugins::employees::{EmployeeDirectory, SqliteEmployeeDirectory};
use unitpass::plugins::registry::SchemaRegistry;
use unitpass::plugins::stages;
use unitpass::plugins::units::{self, UnitStore};

#[test]
fn composite_instantiation_builds_the_tree() {
    let (_tmp, store) = seeded_store();
    let reg = SchemaRegistry::load(&store).unwrap();
    let unit_store = UnitStore::new(store);

    let unit = units::instantiate(&reg, &unit_store, COMPOSITE, None).unwrap();
    assert_eq!(unit.status(), UnitStatus::Created);
    assert_eq!(unit.sub_units.len(), 1);
    let sub = &unit.sub_units[0];
    assert_eq!(sub.schema_id, COMPONENT);
    assert_eq!(sub.parent_unit_uuid.as_deref(), Some(unit.uuid.as_str()));
    assert!(sub.created_at <= unit.created_at);
    // ULIDs sort by creation time: the component was allocated first.
    assert!(sub.uuid < unit.uuid, "{} !< {}", sub.uuid, unit.uuid);
    assert!(units::is_ean13_barcode(&unit.internal_id));
    assert!(units::is_ean13_barcode(&sub.internal_id));
    assert_ne!(unit.internal_id, sub.internal_id);

    let loaded = unit_store.load(&unit.uuid).unwrap();
    assert_eq!(loaded, unit);
    assert_eq!(unit_store.load(&sub.uuid).unwrap(), *sub);
}

#[test]
fn explicit_internal_id_is_kept_and_findable() {
    let (_tmp, store) = seeded_store();
    let reg = SchemaRegistry::load(&store).unwrap();
    let unit_store = UnitStore::new(store);

    let unit = units::instantiate(&reg, &unit_store, SIMPLE, Some("4006381333931")).unwrap();
    assert_eq!(unit.internal_id, "4006381333931");
    assert_eq!(
        unit_store.load_by_internal_id("4006381333931").unwrap().uuid,
        unit.uuid
    );
    assert!(matches!(
        unit_store.load_by_internal_id("0000000000000"),
        Err(UnitpassError::UnitNotFound(_))
    ));
}

#[test]
fn failed_instantiation_leaves_no_rows() {
    let (_tmp, store) = seeded_store();
    let reg = SchemaRegistry::load(&store).unwrap();
    let unit_store = UnitStore::new(store);

    units::instantiate(&reg, &unit_store, SIMPLE, Some("DUP-1")).unwrap();
    let before = unit_store.list(&reg, None).unwrap().len();

    // The sub-unit row is written before the parent row that collides.
    let err = units::instantiate(&reg, &unit_store, COMPOSITE, Some("DUP-1")).unwrap_err();
    assert!(matches!(err, UnitpassError::RusqliteError(_)));
    assert_eq!(unit_store.list(&reg, None).unwrap().len(), before);
}

#[test]
fn bad_requests_are_rejected_before_writing() {
    let (_tmp, store) = seeded_store();
    let reg = SchemaRegistry::load(&store).unwrap();
    let unit_store = UnitStore::new(store);

    assert!(matches!(
        units::instantiate(&reg, &unit_store, "missing", None),
        Err(UnitpassError::SchemaNotFound(_))
    ));
    assert!(matches!(
        units::instantiate(&reg, &unit_store, SIMPLE, Some("bad id")),
        Err(UnitpassError::ValidationError(_))
    ));
    assert!(unit_store.list(&reg, None).unwrap().is_empty());
    assert!(matches!(
        unit_store.load("01ARZ3NDEKTSV4RRFFQ69G5FAV"),
        Err(UnitpassError::UnitNotFound(_))
    ));
}

#[test]
fn list_filters_by_status_and_names_units() {
    let (_tmp, store) = seeded_store();
    let reg = SchemaRegistry::load(&store).unwrap();
    let unit_store = UnitStore::new(store);

    let composite = units::instantiate(&reg, &unit_store, COMPOSITE, None).unwrap();
    units::instantiate(&reg, &unit_store, SIMPLE, None).unwrap();

    let all = unit_store.list(&reg, None).unwrap();
    assert_eq!(all.len(), 3);
    let component = all
        .iter()
        .find(|u| u.schema_id == COMPONENT)
        .unwrap();
    assert_eq!(component.unit_name, "Composite device component");
    assert_eq!(component.parent_unit_uuid.as_deref(), Some(composite.uuid.as_str()));

    assert_eq!(unit_store.list(&reg, Some(UnitStatus::Created)).unwrap().len(), 3);
    assert!(unit_store.list(&reg, Some(UnitStatus::Certified)).unwrap().is_empty());
}

#[test]
fn save_persists_stage_history_and_recovery_resets_publishing() {
    let (_tmp, store) = seeded_store();
    let reg = SchemaRegistry::load(&store).unwrap();
    let directory = SqliteEmployeeDirectory::new(store.clone());
    let unit_store = UnitStore::new(store);

    let employee = directory.get(BADGE).unwrap();
    let mut unit = units::instantiate(&reg, &unit_store, SIMPLE, None).unwrap();
    let schema = reg.resolve(SIMPLE).unwrap();
    for (i, s) in schema.stages.iter().enumerate() {
        let t = 100 + 10 * i as u64;
        stages::begin_stage(&mut unit, schema, &employee, &s.stage_id, Default::default(), t)
            .unwrap();
        stages::complete_stage(&mut unit, schema, &s.stage_id, Default::default(), t + 4).unwrap();
    }
    assert_eq!(unit.status(), UnitStatus::AwaitingCertification);
    unit.transition(UnitStatus::Publishing, 200).unwrap();
    unit.content_address = Some("sha256:cafe".to_string());
    unit.publication_claim = Some("claim-1".to_string());
    unit_store.save(&unit, BADGE, "test.save").unwrap();

    let loaded = unit_store.load(&unit.uuid).unwrap();
    assert_eq!(loaded.stage_records, unit.stage_records);
    assert_eq!(loaded.status(), UnitStatus::Publishing);
    assert_eq!(loaded.publication_claim.as_deref(), Some("claim-1"));

    let recovered = unit_store.recover_interrupted_publications().unwrap();
    assert_eq!(recovered, vec![unit.uuid.clone()]);
    let loaded = unit_store.load(&unit.uuid).unwrap();
    assert_eq!(loaded.status(), UnitStatus::AwaitingCertification);
    assert_eq!(loaded.content_address.as_deref(), Some("sha256:cafe"));
    assert_eq!(loaded.publication_claim, None);
}

#[test]
fn sealed_records_are_not_rewritten() {
    let (_tmp, store) = seeded_store();
    let reg = SchemaRegistry::load(&store).unwrap();
    let directory = SqliteEmployeeDirectory::new(store.clone());
    let unit_store = UnitStore::new(store);

    let employee = directory.get(BADGE).unwrap();
    let mut unit = units::instantiate(&reg, &unit_store, SIMPLE, None).unwrap();
    let schema = reg.resolve(SIMPLE).unwrap();
    let first = &schema.stages[0].stage_id;
    stages::begin_stage(&mut unit, schema, &employee, first, Default::default(), 1).unwrap();
    stages::complete_stage(&mut unit, schema, first, Default::default(), 5).unwrap();
    unit_store.save(&unit, BADGE, "test.save").unwrap();

    let mut tampered = unit.clone();
    tampered.stage_records[0].completed_at = Some(999);
    tampered.stage_records[0].actual_duration_seconds = Some(998);
    unit_store.save(&tampered, BADGE, "test.tamper").unwrap();

    let loaded = unit_store.load(&unit.uuid).unwrap();
    assert_eq!(loaded.stage_records[0].completed_at, Some(5));
    assert_eq!(loaded.stage_records[0].actual_duration_seconds, Some(4));
}

#[test]
fn stale_copy_cannot_merge_into_a_stored_record() {
    let (_tmp, store) = seeded_store();
    let reg = SchemaRegistry::load(&store).unwrap();
    let directory = SqliteEmployeeDirectory::new(store.clone());
    let unit_store = UnitStore::new(store);

    let employee = directory.get(BADGE).unwrap();
    let created = units::instantiate(&reg, &unit_store, SIMPLE, None).unwrap();
    let schema = reg.resolve(SIMPLE).unwrap();
    let first = &schema.stages[0].stage_id;

    let mut a = unit_store.load(&created.uuid).unwrap();
    let mut b = unit_store.load(&created.uuid).unwrap();
    stages::begin_stage(&mut a, schema, &employee, first, Default::default(), 1).unwrap();
    unit_store.save(&a, BADGE, "stage.begin").unwrap();

    // Same seq, opened later from a copy that never saw the first record.
    stages::begin_stage(&mut b, schema, &employee, first, Default::default(), 2).unwrap();
    let err = unit_store.save(&b, BADGE, "stage.begin").unwrap_err();
    assert!(matches!(err, UnitpassError::ValidationError(_)));

    let loaded = unit_store.load(&created.uuid).unwrap();
    assert_eq!(loaded.stage_records.len(), 1);
    assert_eq!(loaded.stage_records[0].started_at, 1);
}

#[test]
fn update_writes_nothing_when_the_mutation_fails() {
    let (_tmp, store) = seeded_store();
    let reg = SchemaRegistry::load(&store).unwrap();
    let unit_store = UnitStore::new(store);
    let unit = units::instantiate(&reg, &unit_store, SIMPLE, None).unwrap();

    let err = unit_store
        .update(&unit.uuid, BADGE, "test.update", |u| {
            u.failure_reason = Some("half-applied".to_string());
            Err::<(), _>(UnitpassError::ValidationError("rejected".to_string()))
        })
        .unwrap_err();
    assert!(matches!(err, UnitpassError::ValidationError(_)));
    assert_eq!(unit_store.load(&unit.uuid).unwrap().failure_reason, None);

    let status = unit_store
        .update(&unit.uuid, BADGE, "test.update", |u| {
            u.failure_reason = Some("kept".to_string());
            Ok(u.status())
        })
        .unwrap();
    assert_eq!(status, UnitStatus::Created);
    assert_eq!(
        unit_store.load(&unit.uuid).unwrap().failure_reason.as_deref(),
        Some("kept")
    );
    assert!(matches!(
        unit_store.update("01ARZ3NDEKTSV4RRFFQ69G5FAV", BADGE, "test.update", |_| Ok(())),
        Err(UnitpassError::UnitNotFound(_))
    ));
}

#[path = "../common/mod.rs"]
mod common;

use common::*;
use unitpass::core::error::UnitpassError;
use unitpass::core::model::Employee;
use unitpass::plugins::employees::{self, EmployeeDirectory, SqliteEmployeeDirectory};

#[test]
fn seeded_badge_resolves() {
    let (_tmp, store) = seeded_store();
    let directory = SqliteEmployeeDirectory::new(store);
    let employee = directory.get(BADGE).unwrap();
    assert_eq!(employee.name, "Employee 1");
    assert_eq!(employee.position, "Test employee");
}

#[test]
fn unknown_badge_is_unknown_employee() {
    let (_tmp, store) = seeded_store();
    let directory = SqliteEmployeeDirectory::new(store);
    match directory.get("0000000000") {
        Err(UnitpassError::UnknownEmployee(card)) => assert_eq!(card, "0000000000"),
        other => panic!("expected UnknownEmployee, got {:?}", other),
    }
}

#[test]
fn search_is_case_insensitive_over_all_fields() {
    let (_tmp, store) = seeded_store();
    employees::upsert_employee(
        &store,
        &Employee {
            rfid_card_id: "2222222222".to_string(),
            name: "Alex Smith".to_string(),
            position: "Welder".to_string(),
        },
    )
    .unwrap();
    let directory = SqliteEmployeeDirectory::new(store);

    assert_eq!(directory.search("WELD").unwrap().len(), 1);
    assert_eq!(directory.search("alex").unwrap()[0].rfid_card_id, "2222222222");
    assert_eq!(directory.search("1111").unwrap()[0].rfid_card_id, BADGE);
    assert_eq!(directory.search("").unwrap().len(), 2);
    assert!(directory.search("nobody").unwrap().is_empty());
}

#[test]
fn reimport_updates_in_place() {
    let (tmp, store) = seeded_store();
    let path = tmp.path().join("more.json");
    std::fs::write(
        &path,
        r#"[{"rfid_card_id":"1111111111","name":"Renamed","position":"Lead"}]"#,
    )
    .unwrap();
    assert_eq!(employees::import_employees(&store, &path).unwrap(), 1);

    let directory = SqliteEmployeeDirectory::new(store);
    assert_eq!(directory.get(BADGE).unwrap().name, "Renamed");
    assert_eq!(directory.search("").unwrap().len(), 1);
}

#[test]
fn blank_card_is_rejected() {
    let (_tmp, store) = empty_store();
    let err = employees::upsert_employee(
        &store,
        &Employee {
            rfid_card_id: "  ".to_string(),
            name: "Nobody".to_string(),
            position: "None".to_string(),
        },
    )
    .unwrap_err();
    assert!(matches!(err, UnitpassError::ValidationError(_)));
}

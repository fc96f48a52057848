#[path = "../common/mod.rs"]
mod common;

use common::*;
use unitpass::core::error::UnitpassError;
use unitpass::core::model::{ProductionSchema, SchemaType, StageTemplate};
use unitpass::plugins::registry::{self, SchemaRegistry};

fn stage(id: &str) -> StageTemplate {
    StageTemplate {
        stage_id: id.to_string(),
        name: format!("Stage {}", id),
        stage_type: "Assembly".to_string(),
        description: String::new(),
        equipment: vec![],
        workplace: "Bench".to_string(),
        duration_seconds: 0,
    }
}

fn schema(id: &str, schema_type: SchemaType, components: &[&str]) -> ProductionSchema {
    ProductionSchema {
        schema_id: id.to_string(),
        parent_schema_id: None,
        required_component_schema_ids: components.iter().map(|c| c.to_string()).collect(),
        schema_type,
        unit_name: format!("Unit {}", id),
        stages: vec![stage(&format!("{}-1", id)), stage(&format!("{}-2", id))],
    }
}

#[test]
fn seed_import_is_idempotent() {
    let (_tmp, store) = empty_store();
    let first = registry::import_schemas(&store, &seed_path("schemas.json")).unwrap();
    assert_eq!(first.inserted.len(), 3);
    assert!(first.unchanged.is_empty());

    let second = registry::import_schemas(&store, &seed_path("schemas.json")).unwrap();
    assert!(second.inserted.is_empty());
    assert_eq!(second.unchanged.len(), 3);

    let reg = SchemaRegistry::load(&store).unwrap();
    assert_eq!(reg.len(), 3);
    assert!(reg.resolve(COMPOSITE).unwrap().is_composite());
    assert_eq!(reg.resolve(SIMPLE).unwrap().stages.len(), 3);
}

#[test]
fn schemas_are_immutable() {
    let (tmp, store) = empty_store();
    let original = schema("s1", SchemaType::Simple, &[]);
    let path = write_schemas(tmp.path(), "a.json", &[original.clone()]);
    registry::import_schemas(&store, &path).unwrap();

    let mut changed = original.clone();
    changed.unit_name = "Renamed".to_string();
    let path = write_schemas(tmp.path(), "b.json", &[changed]);
    let err = registry::import_schemas(&store, &path).unwrap_err();
    assert!(matches!(err, UnitpassError::ValidationError(_)));

    let reg = SchemaRegistry::load(&store).unwrap();
    assert_eq!(reg.resolve("s1").unwrap(), &original);
}

#[test]
fn missing_component_reference_writes_nothing() {
    let (tmp, store) = empty_store();
    let path = write_schemas(
        tmp.path(),
        "broken.json",
        &[
            schema("ok", SchemaType::Simple, &[]),
            schema("top", SchemaType::Composite, &["ghost"]),
        ],
    );
    let err = registry::import_schemas(&store, &path).unwrap_err();
    assert!(matches!(err, UnitpassError::SchemaNotFound(_)));
    assert!(SchemaRegistry::load(&store).unwrap().is_empty());
}

#[test]
fn stageless_component_is_rejected_on_import() {
    let (tmp, store) = empty_store();
    let mut part = schema("part", SchemaType::Component, &[]);
    part.stages.clear();
    let path = write_schemas(
        tmp.path(),
        "kit.json",
        &[part, schema("kit", SchemaType::Composite, &["part"])],
    );
    match registry::import_schemas(&store, &path) {
        Err(UnitpassError::ValidationError(msg)) => assert!(msg.contains("part"), "{msg}"),
        other => panic!("expected ValidationError, got {:?}", other),
    }
    assert!(SchemaRegistry::load(&store).unwrap().is_empty());
}

#[test]
fn cycles_are_rejected_with_path() {
    let err = SchemaRegistry::from_schemas(vec![
        schema("a", SchemaType::Composite, &["b"]),
        schema("b", SchemaType::Composite, &["a"]),
    ])
    .unwrap_err();
    match err {
        UnitpassError::CycleDetected { path } => {
            assert_eq!(path.first(), path.last());
            assert!(path.len() >= 3);
            assert!(path.contains(&"a".to_string()) && path.contains(&"b".to_string()));
        }
        other => panic!("expected cycle, got {:?}", other),
    }
}

#[test]
fn dependency_closure_lists_dependencies_first() {
    let reg = SchemaRegistry::from_schemas(vec![
        schema("leaf", SchemaType::Component, &[]),
        schema("mid", SchemaType::Composite, &["leaf"]),
        schema("other", SchemaType::Component, &[]),
        schema("top", SchemaType::Composite, &["mid", "other"]),
    ])
    .unwrap();
    let ids: Vec<&str> = reg
        .dependency_closure("top")
        .unwrap()
        .into_iter()
        .map(|s| s.schema_id.as_str())
        .collect();
    assert_eq!(ids, vec!["leaf", "mid", "other", "top"]);

    assert!(matches!(
        reg.dependency_closure("nope"),
        Err(UnitpassError::SchemaNotFound(_))
    ));
}

#[test]
fn shape_mismatches_are_validation_errors() {
    let err = SchemaRegistry::from_schemas(vec![schema("c", SchemaType::Composite, &[])]).unwrap_err();
    assert!(matches!(err, UnitpassError::ValidationError(_)));

    let err = SchemaRegistry::from_schemas(vec![
        schema("leaf", SchemaType::Component, &[]),
        schema("s", SchemaType::Simple, &["leaf"]),
    ])
    .unwrap_err();
    assert!(matches!(err, UnitpassError::ValidationError(_)));
}

#[test]
fn specializations_follow_parent_schema_id() {
    let mut variant = schema("simple-v2", SchemaType::Simple, &[]);
    variant.parent_schema_id = Some("simple".to_string());
    let reg = SchemaRegistry::from_schemas(vec![schema("simple", SchemaType::Simple, &[]), variant])
        .unwrap();
    let ids: Vec<&str> = reg
        .specializations("simple")
        .into_iter()
        .map(|s| s.schema_id.as_str())
        .collect();
    assert_eq!(ids, vec!["simple-v2"]);
    assert!(reg.specializations("simple-v2").is_empty());
}

#[test]
fn legacy_document_field_names_are_accepted() {
    let doc = r#"{
        "schema_id": "legacy",
        "parent_schema_id": null,
        "required_components_schema_ids": null,
        "schema_type": "Simple",
        "unit_name": "Legacy",
        "production_stages": [
            { "stage_id": "x", "name": "X", "type": "Prep", "duration_seconds": 0 }
        ]
    }"#;
    let parsed: ProductionSchema = serde_json::from_str(doc).unwrap();
    assert!(parsed.required_component_schema_ids.is_empty());
    assert_eq!(parsed.stages.len(), 1);
    assert_eq!(parsed.stages[0].stage_type, "Prep");
}

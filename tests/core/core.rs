use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;
use unitpass::core::broker::DbBroker;
use unitpass::core::config::{self, UnitpassConfig};
use unitpass::core::db;
use unitpass::core::error::{ErrorKind, PublicationError, UnitpassError};
use unitpass::core::locks::UnitLocks;
use unitpass::core::schemas;
use unitpass::core::store::Store;

#[test]
fn db_connect_applies_pragmas() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join(schemas::WORKBENCH_DB_NAME);
    let conn = db::db_connect(&path.to_string_lossy()).expect("db connect");

    let fk_on: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .expect("pragma foreign_keys");
    assert_eq!(fk_on, 1);
    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("pragma journal_mode");
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn broker_audits_success_and_failure() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path();
    let broker = DbBroker::new(root);
    let db_path = root.join(schemas::WORKBENCH_DB_NAME);

    broker
        .with_conn(&db_path, "1111111111", Some("U1"), "test.ok", |conn| {
            conn.execute("CREATE TABLE t (x INTEGER)", [])?;
            Ok(())
        })
        .expect("ok op");
    let err = broker
        .with_conn(&db_path, "unitpass", None, "test.fail", |_conn| {
            Err::<(), _>(UnitpassError::ValidationError("nope".to_string()))
        })
        .unwrap_err();
    assert!(matches!(err, UnitpassError::ValidationError(_)));

    let events = broker.read_events().expect("events");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].op, "test.ok");
    assert_eq!(events[0].actor, "1111111111");
    assert_eq!(events[0].intent_ref.as_deref(), Some("U1"));
    assert_eq!(events[0].db_id, schemas::WORKBENCH_DB_NAME);
    assert_eq!(events[0].status, "success");
    assert_eq!(events[1].status, "error");
    assert_ne!(events[0].event_id, events[1].event_id);
}

#[test]
fn broker_audit_lines_survive_concurrent_writers() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().to_path_buf();
    let db_path = root.join(schemas::WORKBENCH_DB_NAME);
    db::db_connect(&db_path.to_string_lossy()).expect("create db");
    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let root = root.clone();
            let db_path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let broker = DbBroker::new(&root);
                barrier.wait();
                for _ in 0..5 {
                    broker
                        .with_conn(&db_path, &format!("w{}", i), None, "test.read", |conn| {
                            Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?)
                        })
                        .expect("read");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join");
    }

    let events = DbBroker::new(&root).read_events().expect("events");
    assert_eq!(events.len(), workers * 5);
}

#[test]
fn config_defaults_when_missing_and_written_once() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path());

    assert_eq!(config::load_config(&store).unwrap(), UnitpassConfig::default());
    assert!(config::write_default_config(&store).unwrap());
    assert!(!config::write_default_config(&store).unwrap());
    assert_eq!(config::load_config(&store).unwrap(), UnitpassConfig::default());

    std::fs::write(store.config_path(), "[ledger\nnetwork = 1").unwrap();
    assert!(matches!(
        config::load_config(&store),
        Err(UnitpassError::ConfigError(_))
    ));
}

#[test]
fn store_resolution_and_paths() {
    let cwd = PathBuf::from("/work");
    let explicit = Store::resolve(Some(PathBuf::from("/data/line1")), &cwd);
    assert_eq!(explicit.root, PathBuf::from("/data/line1"));
    assert_eq!(
        explicit.db_path(),
        PathBuf::from("/data/line1").join(schemas::WORKBENCH_DB_NAME)
    );
    assert_eq!(
        explicit.resolve_path(std::path::Path::new("cas")),
        PathBuf::from("/data/line1/cas")
    );
    assert_eq!(
        explicit.resolve_path(std::path::Path::new("/abs/cas")),
        PathBuf::from("/abs/cas")
    );
}

#[test]
fn error_kinds_map_to_exit_codes() {
    let not_found = UnitpassError::UnitNotFound("u".to_string());
    assert_eq!(not_found.kind(), ErrorKind::NotFound);
    assert_eq!(not_found.exit_code(), 2);

    let state = UnitpassError::NotReady {
        unit_uuid: "u".to_string(),
        status: "Created".to_string(),
    };
    assert_eq!(state.kind(), ErrorKind::State);
    assert!(!state.is_retryable());

    let publication: UnitpassError = PublicationError::Ledger("down".to_string()).into();
    assert_eq!(publication.kind(), ErrorKind::Publication);
    assert_eq!(publication.exit_code(), 3);
    assert!(publication.is_retryable());

    let cycle = UnitpassError::CycleDetected {
        path: vec!["a".to_string(), "b".to_string(), "a".to_string()],
    };
    assert_eq!(cycle.to_string(), "Schema dependency cycle detected: a -> b -> a");
    assert_eq!(UnitpassError::ConfigError("x".into()).exit_code(), 1);
}

#[test]
fn unit_locks_are_per_unit() {
    let locks = UnitLocks::new();
    let nested = locks
        .with_unit("a", || locks.with_unit("b", || Ok(locks.len())))
        .expect("distinct units never contend");
    assert_eq!(nested, 2);
    assert!(locks.is_empty());
}

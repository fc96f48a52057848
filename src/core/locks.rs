//! Per-unit mutual exclusion.
//!
//! Stage execution on one unit must be serialized to keep the "one open record"
//! and ordering invariants; distinct units (siblings included) never contend.
//! Each unit gets its own mutex, created lazily and dropped again once no caller
//! holds or waits on it. The table lock is held only long enough to find, insert
//! or remove an entry.
//!
//! These locks only order callers inside one process. Across processes the
//! read-modify-write of a unit runs in an IMMEDIATE SQLite transaction
//! (`UnitStore::update`).

use crate::core::error::UnitpassError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct UnitLocks {
    entries: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UnitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    // The map only holds lock handles, so a poisoned table is still consistent.
    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry(&self, unit_uuid: &str) -> Arc<Mutex<()>> {
        self.table()
            .entry(unit_uuid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the entry when only the table and `held` still point at it.
    /// Handles are cloned under the table lock, so the count cannot grow meanwhile.
    fn release(&self, unit_uuid: &str, held: Arc<Mutex<()>>) {
        let mut entries = self.table();
        if Arc::strong_count(&held) == 2 {
            entries.remove(unit_uuid);
        }
        // Let go of our handle before the table unlocks so the next releaser sees it gone.
        drop(held);
    }

    /// Run `f` while holding the lock of `unit_uuid`.
    pub fn with_unit<F, R>(&self, unit_uuid: &str, f: F) -> Result<R, UnitpassError>
    where
        F: FnOnce() -> Result<R, UnitpassError>,
    {
        let entry = self.entry(unit_uuid);
        let out = {
            // Unit state lives in the database and every write is transactional, so a
            // panic in another holder cannot leave anything half-applied behind this guard.
            let _guard: MutexGuard<'_, ()> =
                entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f()
        };
        self.release(unit_uuid, entry);
        out
    }

    /// Number of units currently locked or waited on.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
